//! `loanportal-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod page;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, FieldErrors};
pub use id::{LoanId, PermissionId, RoleId, SessionId, UserId};
pub use page::{Page, PageRequest};
pub use value_object::ValueObject;
