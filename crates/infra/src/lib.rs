//! `hims-infra`: ledger storage, command execution, read models and the
//! reconciliation service.
//!
//! The write path is [`reconciliation::ReconciliationService`] on top of
//! [`command_dispatcher::CommandDispatcher`] and an [`event_store::EventStore`].
//! The read path is [`projections::BillingReadModels`] behind
//! [`query::InvoiceQueries`].

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod query;
pub mod read_model;
pub mod reconciliation;
pub mod subscribers;
pub mod users;
pub mod workers;


pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use projections::{BillingReadModels, InvoiceReadModel, PaymentLogEntry, ProjectionError};
pub use query::{BillingSummary, InvoiceDetail, InvoiceFilter, InvoiceQueries, InvoiceView, SortOrder};
pub use reconciliation::{
    FailedPaymentRequest, LineItem, NewInvoice, PaymentRequest, Reconciled, ReconciliationError,
    ReconciliationService, RetryPolicy,
};
pub use subscribers::{AuditEntry, AuditTrail};
pub use users::{UserDirectory, UserDirectoryError};
