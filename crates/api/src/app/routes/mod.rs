use axum::{Router, routing::get};

pub mod auth;
pub mod invoices;
pub mod payments;
pub mod system;
pub mod users;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/audit", get(system::audit))
        .nest("/users", users::router())
        .nest("/invoices", invoices::router())
        .nest("/payments", payments::router())
}
