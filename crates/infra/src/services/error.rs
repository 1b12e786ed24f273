use thiserror::Error;
use tracing::error;

use loanportal_auth::{AuthzError, PasswordError, TokenError};
use loanportal_core::{DomainError, FieldErrors};

use crate::store::StoreError;

/// Failure classes surfaced by application services.
///
/// Each variant maps to exactly one HTTP status at the API boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Valid request blocked by current state.
    #[error("{0}")]
    Conflict(String),

    /// Detail is for logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn unauthenticated() -> Self {
        Self::Unauthenticated("Unauthenticated.".to_string())
    }
}

impl From<FieldErrors> for ServiceError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(errors) => Self::Validation(errors),
            DomainError::InvariantViolation(msg) | DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::InvalidId(_) | DomainError::NotFound => {
                Self::NotFound("Resource not found".to_string())
            }
            DomainError::Unauthorized => Self::Forbidden("This action is unauthorized.".to_string()),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Forbidden(msg) => Self::Forbidden(msg),
            AuthzError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(msg) | StoreError::Referenced(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Corrupt(_) | StoreError::Backend(_) => {
                error!(error = %err, "store failure");
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(msg) => Self::Internal(msg),
            TokenError::Decode(_) | TokenError::Claims(_) => Self::unauthenticated(),
        }
    }
}

impl From<PasswordError> for ServiceError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.to_string())
    }
}
