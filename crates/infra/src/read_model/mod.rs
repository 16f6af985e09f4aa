//! Tenant-partitioned key/value storage backing the billing read models.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
