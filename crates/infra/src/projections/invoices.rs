//! Invoice read model.
//!
//! One row per invoice, keyed by `InvoiceId`, holding what the list and
//! detail views need. The row's `version` is the sequence number of the last
//! record folded into it and serves as the per-stream cursor: records at or
//! below it are redeliveries and are skipped; a record more than one ahead
//! means something was missed and is reported as a gap.
//!
//! Status is not stored. Paid amount and failure flag are, and the status is
//! derived at read time against the caller's clock (see [`crate::query`]).

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use hims_billing::{AGGREGATE_TYPE, InvoiceEvent, InvoiceId, InvoiceLine, InvoiceStatus, balance};
use hims_core::{CurrencyCode, MinorUnits, TenantId};
use hims_events::EventEnvelope;

use crate::read_model::TenantStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub tenant_id: TenantId,
    pub patient_id: String,
    pub patient_name: String,
    pub currency: CurrencyCode,
    pub lines: Vec<InvoiceLine>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: MinorUnits,
    pub paid_amount: MinorUnits,
    pub has_failed_attempt: bool,
    pub payment_count: u32,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl InvoiceReadModel {
    pub fn outstanding_balance(&self) -> MinorUnits {
        self.total_amount.saturating_sub(self.paid_amount)
    }

    pub fn status(&self, now: DateTime<Utc>) -> InvoiceStatus {
        balance::derive_status(
            self.total_amount,
            self.paid_amount,
            self.has_failed_attempt,
            self.due_date,
            now,
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvoiceProjectionError {
    #[error("failed to deserialize invoice record: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("gap in invoice stream (last applied={last}, received={found})")]
    Gap { last: u64, found: u64 },

    #[error("record for unknown invoice {0}")]
    UnknownInvoice(InvoiceId),
}

#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    // Serializes read-modify-write so concurrent catch-ups cannot regress a row.
    write: Mutex<()>,
}

impl<S> InvoicesProjection<S>
where
    S: TenantStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            write: Mutex::new(()),
        }
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(tenant_id, invoice_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<InvoiceReadModel> {
        self.store.list(tenant_id)
    }

    /// Last sequence number applied for this invoice (0 if unseen).
    pub fn cursor(&self, tenant_id: TenantId, invoice_id: &InvoiceId) -> u64 {
        self.store
            .get(tenant_id, invoice_id)
            .map(|rm| rm.version)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.store.clear_all();
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InvoiceProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let invoice_id = InvoiceId::new(envelope.aggregate_id());
        let seq = envelope.sequence_number();

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| InvoiceProjectionError::Deserialize(e.to_string()))?;
        let event_tenant = match &ev {
            InvoiceEvent::InvoiceCreated(e) => e.tenant_id,
            InvoiceEvent::PaymentApplied(e) => e.tenant_id,
            InvoiceEvent::PaymentFailed(e) => e.tenant_id,
        };
        if event_tenant != tenant_id {
            return Err(InvoiceProjectionError::TenantIsolation(
                "record tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if ev.invoice_id() != invoice_id {
            return Err(InvoiceProjectionError::TenantIsolation(
                "record invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let _guard = self.write.lock().unwrap_or_else(|p| p.into_inner());
        let current = self.store.get(tenant_id, &invoice_id);
        let last = current.as_ref().map(|rm| rm.version).unwrap_or(0);
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 {
            return Err(InvoiceProjectionError::Gap { last, found: seq });
        }

        let next = match (ev, current) {
            (InvoiceEvent::InvoiceCreated(e), _) => InvoiceReadModel {
                invoice_id: e.invoice_id,
                tenant_id: e.tenant_id,
                patient_id: e.patient_id,
                patient_name: e.patient_name,
                currency: e.currency,
                lines: e.lines,
                invoice_date: e.invoice_date,
                due_date: e.due_date,
                total_amount: e.total_amount,
                paid_amount: 0,
                has_failed_attempt: false,
                payment_count: 0,
                last_payment_at: None,
                created_at: e.occurred_at,
                version: seq,
            },
            (InvoiceEvent::PaymentApplied(e), Some(mut rm)) => {
                rm.paid_amount = e.paid_amount;
                rm.payment_count += 1;
                rm.last_payment_at = Some(e.payment.paid_at);
                rm.version = seq;
                rm
            }
            (InvoiceEvent::PaymentFailed(_), Some(mut rm)) => {
                rm.has_failed_attempt = true;
                rm.version = seq;
                rm
            }
            (_, None) => return Err(InvoiceProjectionError::UnknownInvoice(invoice_id)),
        };

        self.store.upsert(tenant_id, invoice_id, next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use hims_billing::{
        ChargeCategory, InvoiceCreated, Payment, PaymentApplied, PaymentId, PaymentMethod,
        PaymentStatus,
    };
    use uuid::Uuid;

    use super::*;
    use crate::read_model::InMemoryTenantStore;

    type Projection = InvoicesProjection<InMemoryTenantStore<InvoiceId, InvoiceReadModel>>;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap()
    }

    fn envelope(tenant_id: TenantId, ev: &InvoiceEvent, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            ev.invoice_id().aggregate_id(),
            AGGREGATE_TYPE,
            "test",
            seq,
            at(),
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn created(tenant_id: TenantId, invoice_id: InvoiceId) -> InvoiceEvent {
        InvoiceEvent::InvoiceCreated(InvoiceCreated {
            tenant_id,
            invoice_id,
            patient_id: "P-9".to_string(),
            patient_name: "Jose Rizal".to_string(),
            currency: CurrencyCode::PHP,
            lines: vec![InvoiceLine {
                line_no: 1,
                description: "CBC".to_string(),
                category: ChargeCategory::Laboratory,
                quantity: 1,
                unit_price: 1_000,
                pharmacy_id: None,
            }],
            invoice_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 2, 28).unwrap(),
            total_amount: 1_000,
            occurred_at: at(),
        })
    }

    fn applied(tenant_id: TenantId, invoice_id: InvoiceId, amount: u64, paid: u64) -> InvoiceEvent {
        InvoiceEvent::PaymentApplied(PaymentApplied {
            tenant_id,
            invoice_id,
            payment: Payment {
                payment_id: PaymentId::new(),
                amount,
                method: PaymentMethod::GCash,
                status: PaymentStatus::Completed,
                transaction_id: None,
                notes: None,
                failure_reason: None,
                paid_at: at(),
            },
            total_amount: 1_000,
            paid_amount: paid,
            outstanding_balance: 1_000 - paid,
            overpaid_by: 0,
            status: InvoiceStatus::PartiallyPaid,
            occurred_at: at(),
        })
    }

    #[test]
    fn redelivered_records_are_ignored() {
        let projection = Projection::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let invoice_id = InvoiceId::generate();

        let first = envelope(tenant_id, &created(tenant_id, invoice_id), 1);
        let second = envelope(tenant_id, &applied(tenant_id, invoice_id, 400, 400), 2);
        projection.apply_envelope(&first).unwrap();
        projection.apply_envelope(&second).unwrap();
        projection.apply_envelope(&second).unwrap();
        projection.apply_envelope(&first).unwrap();

        let rm = projection.get(tenant_id, &invoice_id).unwrap();
        assert_eq!(rm.paid_amount, 400);
        assert_eq!(rm.outstanding_balance(), 600);
        assert_eq!(rm.payment_count, 1);
        assert_eq!(rm.version, 2);
    }

    #[test]
    fn skipped_record_is_reported_as_gap() {
        let projection = Projection::new(InMemoryTenantStore::new());
        let tenant_id = TenantId::new();
        let invoice_id = InvoiceId::generate();

        projection
            .apply_envelope(&envelope(tenant_id, &created(tenant_id, invoice_id), 1))
            .unwrap();
        let err = projection
            .apply_envelope(&envelope(tenant_id, &applied(tenant_id, invoice_id, 1, 1), 3))
            .unwrap_err();
        assert_eq!(err, InvoiceProjectionError::Gap { last: 1, found: 3 });
    }

    #[test]
    fn envelope_for_other_tenant_is_refused() {
        let projection = Projection::new(InMemoryTenantStore::new());
        let invoice_id = InvoiceId::generate();
        let ev = created(TenantId::new(), invoice_id);

        let err = projection
            .apply_envelope(&envelope(TenantId::new(), &ev, 1))
            .unwrap_err();
        assert!(matches!(err, InvoiceProjectionError::TenantIsolation(_)));
    }
}
