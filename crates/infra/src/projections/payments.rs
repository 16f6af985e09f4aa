//! Payment log read model: one row per payment attempt, completed or failed.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use hims_billing::{AGGREGATE_TYPE, InvoiceEvent, InvoiceId, Payment, PaymentId, PaymentMethod, PaymentStatus};
use hims_core::{AggregateId, MinorUnits, TenantId};
use hims_events::EventEnvelope;

use crate::read_model::TenantStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLogEntry {
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub patient_id: String,
    pub patient_name: String,
    pub amount: MinorUnits,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentProjectionError {
    #[error("failed to deserialize invoice record: {0}")]
    Deserialize(String),

    #[error("gap in invoice stream (last applied={last}, received={found})")]
    Gap { last: u64, found: u64 },
}

#[derive(Debug, Clone)]
struct Patient {
    id: String,
    name: String,
}

#[derive(Debug, Default)]
struct Cursors {
    last_seq: HashMap<(TenantId, AggregateId), u64>,
    patients: HashMap<(TenantId, AggregateId), Patient>,
}

#[derive(Debug)]
pub struct PaymentsProjection<S>
where
    S: TenantStore<PaymentId, PaymentLogEntry>,
{
    store: S,
    cursors: RwLock<Cursors>,
}

impl<S> PaymentsProjection<S>
where
    S: TenantStore<PaymentId, PaymentLogEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(Cursors::default()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, payment_id: &PaymentId) -> Option<PaymentLogEntry> {
        self.store.get(tenant_id, payment_id)
    }

    /// Newest first, optionally restricted to one invoice.
    pub fn list(&self, tenant_id: TenantId, invoice_id: Option<InvoiceId>) -> Vec<PaymentLogEntry> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|p| invoice_id.is_none_or(|id| p.invoice_id == id))
            .collect();
        rows.sort_by(|a, b| {
            b.paid_at
                .cmp(&a.paid_at)
                .then_with(|| b.payment_id.cmp(&a.payment_id))
        });
        rows
    }

    pub fn clear(&self) {
        self.store.clear_all();
        if let Ok(mut cursors) = self.cursors.write() {
            *cursors = Cursors::default();
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PaymentProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let key = (envelope.tenant_id(), envelope.aggregate_id());
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors.write().unwrap_or_else(|p| p.into_inner());
        let last = cursors.last_seq.get(&key).copied().unwrap_or(0);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(PaymentProjectionError::Gap { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PaymentProjectionError::Deserialize(e.to_string()))?;

        match ev {
            InvoiceEvent::InvoiceCreated(e) => {
                cursors.patients.insert(
                    key,
                    Patient {
                        id: e.patient_id,
                        name: e.patient_name,
                    },
                );
            }
            InvoiceEvent::PaymentApplied(e) => {
                let patient = cursors.patients.get(&key).cloned();
                self.record(key.0, e.invoice_id, e.payment, patient);
            }
            InvoiceEvent::PaymentFailed(e) => {
                let patient = cursors.patients.get(&key).cloned();
                self.record(key.0, e.invoice_id, e.payment, patient);
            }
        }

        cursors.last_seq.insert(key, seq);
        Ok(())
    }

    fn record(&self, tenant_id: TenantId, invoice_id: InvoiceId, payment: Payment, patient: Option<Patient>) {
        let (patient_id, patient_name) = patient.map(|p| (p.id, p.name)).unwrap_or_default();
        self.store.upsert(
            tenant_id,
            payment.payment_id,
            PaymentLogEntry {
                payment_id: payment.payment_id,
                invoice_id,
                patient_id,
                patient_name,
                amount: payment.amount,
                method: payment.method,
                status: payment.status,
                transaction_id: payment.transaction_id,
                notes: payment.notes,
                failure_reason: payment.failure_reason,
                paid_at: payment.paid_at,
            },
        );
    }
}
