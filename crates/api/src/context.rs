use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use loanportal_auth::Principal;
use loanportal_infra::services::Authenticated;
use loanportal_infra::ServiceError;

use crate::app::errors::ApiError;

/// Authenticated caller for a request.
///
/// Inserted by the auth middleware; protected handlers take it as an
/// extractor.
#[derive(Debug, Clone)]
pub struct PrincipalContext {
    auth: Authenticated,
}

impl PrincipalContext {
    pub fn new(auth: Authenticated) -> Self {
        Self { auth }
    }

    pub fn principal(&self) -> &Principal {
        &self.auth.principal
    }

    pub fn authenticated(&self) -> &Authenticated {
        &self.auth
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for PrincipalContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PrincipalContext>()
            .cloned()
            .ok_or_else(|| ServiceError::unauthenticated().into())
    }
}
