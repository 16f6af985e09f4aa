//! `hims-core`: domain building blocks shared by every billing crate.
//!
//! Pure types only: identifiers, the aggregate contract, the domain error and
//! money. Nothing in here touches storage or the network.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
pub use money::{CurrencyCode, MinorUnits};
