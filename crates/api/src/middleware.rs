use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::info;

use loanportal_infra::ServiceError;
use loanportal_infra::services::SessionService;

use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionService,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())?;
    let auth = state.sessions.authenticate(token).await?;

    req.extensions_mut().insert(PrincipalContext::new(auth));

    Ok(next.run(req).await)
}

/// Logs one line per completed request.
pub async fn trace_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let latency_ms = started.elapsed().as_millis() as u64;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );
    response
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ServiceError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(ServiceError::unauthenticated)?;

    let header = header.to_str().map_err(|_| ServiceError::unauthenticated())?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or_else(ServiceError::unauthenticated)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(ServiceError::unauthenticated());
    }

    Ok(token)
}
