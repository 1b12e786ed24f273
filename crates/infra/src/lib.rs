//! Infrastructure layer: persistence adapters, read caches and the
//! application services that drive the domain crates.

pub mod cache;
pub mod services;
pub mod store;

pub use cache::ListCache;
pub use services::{ServiceError, ServiceResult, ServiceSettings, Services, seed_defaults};
pub use store::{InMemoryStore, PostgresStore, Store, StoreError, StoreTx};
