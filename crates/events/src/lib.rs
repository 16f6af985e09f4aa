//! `hims-events`: event envelope and publish/subscribe mechanics.
//!
//! Committed ledger records are wrapped in an [`EventEnvelope`] and fanned out
//! through an [`EventBus`] to asynchronous consumers (projections, the audit
//! trail, the realtime stream). The bus only distributes; the event store is
//! the source of truth.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
