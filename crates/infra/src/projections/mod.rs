//! Billing read models fed from invoice streams.

pub mod invoices;
pub mod payments;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use hims_billing::{InvoiceId, PaymentId};
use hims_core::{AggregateId, TenantId};
use hims_events::EventEnvelope;

use crate::event_store::{EventStore, EventStoreError};
use crate::read_model::InMemoryTenantStore;

pub use invoices::{InvoiceProjectionError, InvoiceReadModel, InvoicesProjection};
pub use payments::{PaymentLogEntry, PaymentProjectionError, PaymentsProjection};

pub type InvoiceStore = Arc<InMemoryTenantStore<InvoiceId, InvoiceReadModel>>;
pub type PaymentStore = Arc<InMemoryTenantStore<PaymentId, PaymentLogEntry>>;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Invoices(#[from] InvoiceProjectionError),

    #[error(transparent)]
    Payments(#[from] PaymentProjectionError),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Both billing views, updated together.
///
/// Fed from two directions: the bus (asynchronous, may redeliver) and
/// [`BillingReadModels::catch_up`] right after a commit, which is what makes a
/// reconciliation visible to the very next query.
#[derive(Debug)]
pub struct BillingReadModels {
    pub invoices: InvoicesProjection<InvoiceStore>,
    pub payments: PaymentsProjection<PaymentStore>,
}

impl Default for BillingReadModels {
    fn default() -> Self {
        Self::new()
    }
}

impl BillingReadModels {
    pub fn new() -> Self {
        Self {
            invoices: InvoicesProjection::new(Arc::new(InMemoryTenantStore::new())),
            payments: PaymentsProjection::new(Arc::new(InMemoryTenantStore::new())),
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.invoices.apply_envelope(envelope)?;
        self.payments.apply_envelope(envelope)?;
        Ok(())
    }

    /// Apply whatever part of one stream the views have not seen yet.
    pub fn catch_up<S: EventStore + ?Sized>(
        &self,
        store: &S,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<(), ProjectionError> {
        for stored in store.load_stream(tenant_id, aggregate_id)? {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }

    /// Drop both views and replay every stream in commit order.
    pub fn rebuild<S: EventStore + ?Sized>(&self, store: &S) -> Result<usize, ProjectionError> {
        self.invoices.clear();
        self.payments.clear();
        let all = store.load_all()?;
        let count = all.len();
        for stored in all {
            self.apply_envelope(&stored.to_envelope())?;
        }
        tracing::info!(records = count, "billing read models rebuilt");
        Ok(count)
    }
}
