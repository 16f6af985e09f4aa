//! Append-only audit trail of billing actions.
//!
//! Fed from the bus, so it lags the write by a moment. Records are keyed by
//! event id; a redelivered record is recognized and dropped.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hims_billing::{AGGREGATE_TYPE, InvoiceEvent, InvoiceId, PaymentId};
use hims_core::{MinorUnits, TenantId};
use hims_events::EventEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub action: String,
    pub invoice_id: InvoiceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    pub amount: MinorUnits,
    pub detail: String,
}

#[derive(Debug, Default)]
struct Log {
    seen: HashSet<Uuid>,
    by_tenant: HashMap<TenantId, Vec<AuditEntry>>,
}

#[derive(Debug, Default)]
pub struct AuditTrail {
    log: RwLock<Log>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the record was new.
    pub fn record(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, serde_json::Error> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(false);
        }
        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())?;

        let entry = match ev {
            InvoiceEvent::InvoiceCreated(e) => AuditEntry {
                event_id: envelope.event_id(),
                recorded_at: envelope.recorded_at(),
                action: envelope.event_type().to_string(),
                invoice_id: e.invoice_id,
                payment_id: None,
                amount: e.total_amount,
                detail: format!("invoice for patient {} ({} lines)", e.patient_id, e.lines.len()),
            },
            InvoiceEvent::PaymentApplied(e) => AuditEntry {
                event_id: envelope.event_id(),
                recorded_at: envelope.recorded_at(),
                action: envelope.event_type().to_string(),
                invoice_id: e.invoice_id,
                payment_id: Some(e.payment.payment_id),
                amount: e.payment.amount,
                detail: format!(
                    "{} payment; paid {} of {}, status {}",
                    e.payment.method, e.paid_amount, e.total_amount, e.status
                ),
            },
            InvoiceEvent::PaymentFailed(e) => AuditEntry {
                event_id: envelope.event_id(),
                recorded_at: envelope.recorded_at(),
                action: envelope.event_type().to_string(),
                invoice_id: e.invoice_id,
                payment_id: Some(e.payment.payment_id),
                amount: e.payment.amount,
                detail: e.payment.failure_reason.unwrap_or_default(),
            },
        };

        let mut log = self.log.write().unwrap_or_else(|p| p.into_inner());
        if !log.seen.insert(entry.event_id) {
            return Ok(false);
        }
        log.by_tenant
            .entry(envelope.tenant_id())
            .or_default()
            .push(entry);
        Ok(true)
    }

    /// In arrival order.
    pub fn entries(&self, tenant_id: TenantId) -> Vec<AuditEntry> {
        self.log
            .read()
            .map(|log| log.by_tenant.get(&tenant_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}
