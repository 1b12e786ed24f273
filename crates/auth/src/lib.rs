//! `loanportal-auth`: authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: callers load roles and permissions and
//! hand them in; everything here is a pure decision or a crypto primitive.

pub mod authorize;
pub mod claims;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod token;

pub use authorize::{
    AccessRequest, AuthzError, LoanAction, LoanPolicy, PermissionAction, PermissionPolicy,
    RoleAction, RolePolicy, SuperAdminStanding, UserAction, UserPolicy, authorize,
};
pub use claims::{ClaimsError, JwtClaims, validate_claims};
pub use password::{PasswordError, hash_password, verify_password, verify_stored};
pub use permissions::{Capability, CORE_PERMISSIONS, Permission, PermissionSet, group_by_module};
pub use principal::{Principal, RoleGrant};
pub use roles::Role;
pub use token::{Hs256TokenCodec, TokenCodec, TokenError};
