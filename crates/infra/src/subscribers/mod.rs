//! Bus consumers that sit outside the write path.

pub mod audit;

pub use audit::{AuditEntry, AuditTrail};
