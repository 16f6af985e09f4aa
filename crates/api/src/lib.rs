//! HTTP API for the billing ledger: routing, auth middleware, request
//! validation and error mapping over `hims-infra`.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
