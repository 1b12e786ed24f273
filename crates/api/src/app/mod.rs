//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request DTOs, extractors and the success envelope
//! - `errors.rs`: error envelope and status mapping

use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tracing::{info, warn};

use loanportal_auth::Hs256TokenCodec;
use loanportal_infra::{InMemoryStore, PostgresStore, Services, Store, seed_defaults};

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Connects the configured store, seeds default roles and permissions, then
/// wires the services into the router.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to the database")?;
            info!("using postgres store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    seed_defaults(store.as_ref(), &config.seed_admin)
        .await
        .context("failed to seed default roles and permissions")?;

    let tokens = Arc::new(Hs256TokenCodec::new(config.jwt_secret.as_bytes()));
    let services = Services::new(store, tokens, config.service_settings());
    Ok(router(services))
}

/// Router over already-built services.
pub fn router(services: Services) -> Router {
    let auth_state = middleware::AuthState {
        sessions: services.sessions.clone(),
    };

    // Protected routes: require a live bearer session.
    let protected = routes::protected().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::trace_requests))
                .layer(Extension(Arc::new(services))),
        )
}
