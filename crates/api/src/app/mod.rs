//! HTTP application wiring.
//!
//! - `services.rs`: store, bus, read models, background workers
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request/response shapes and body validation
//! - `errors.rs`: the uniform error body

use std::sync::Arc;

use axum::{Extension, Router, routing::{get, post}};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, StartupError};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> Result<(Router, Arc<AppServices>), StartupError> {
    let jwt = Arc::new(hims_auth::Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(config).await?);

    // Protected routes: require a bearer token; tenant comes from its claims.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .route("/auth/login", post(routes::auth::login))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(Arc::clone(&services))));

    Ok((router, services))
}
