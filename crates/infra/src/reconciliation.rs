//! Payment reconciliation service.
//!
//! Every write goes through the [`CommandDispatcher`] against the invoice's
//! own stream, so two payments for the same invoice serialize on the stream
//! version: the loser of a race gets a concurrency error, reloads and
//! recomputes from the fresh payment log. That loop is bounded by
//! [`RetryPolicy`]. Store outages get the same treatment.
//!
//! After every successful dispatch the read models are caught up before the
//! call returns, so the next query sees the payment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use hims_billing::{
    AGGREGATE_TYPE, ApplyPayment, BillingConfig, ChargeCategory, CreateInvoice, Invoice,
    InvoiceCommand, InvoiceEvent, InvoiceId, InvoiceLine, Payment, PaymentId, PaymentMethod,
    RecordFailedPayment,
};
use hims_core::{AggregateId, MinorUnits, TenantId};
use hims_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::event_store::{EventStore, EventStoreError};
use crate::projections::BillingReadModels;
use crate::query::InvoiceView;

/// Bounded exponential backoff for stale-version and store-outage retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval,
            max_interval: initial_interval.saturating_mul(40).max(initial_interval),
        }
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    #[error("overpayment rejected: {0}")]
    OverpaymentRejected(String),

    #[error("invoice was modified concurrently; gave up after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("billing ledger unavailable: {0}")]
    PersistenceFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconciliationError {
    /// Stable name of the failure, surfaced in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconciliationError::InvalidAmount(_) => "InvalidAmount",
            ReconciliationError::Validation(_) => "Validation",
            ReconciliationError::InvoiceNotFound(_) => "InvoiceNotFound",
            ReconciliationError::OverpaymentRejected(_) => "OverpaymentRejected",
            ReconciliationError::ConcurrencyConflict { .. } => "ConcurrencyConflict",
            ReconciliationError::PersistenceFailure(_) => "PersistenceFailure",
            ReconciliationError::Internal(_) => "Internal",
        }
    }

    /// The caller may resubmit the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconciliationError::ConcurrencyConflict { .. } | ReconciliationError::PersistenceFailure(_)
        )
    }

    fn from_dispatch(err: DispatchError, invoice_id: InvoiceId, attempts: u32) -> Self {
        match err {
            DispatchError::Validation(msg) => ReconciliationError::Validation(msg),
            DispatchError::NotFound => ReconciliationError::InvoiceNotFound(invoice_id),
            DispatchError::LimitExceeded(msg) => ReconciliationError::OverpaymentRejected(msg),
            DispatchError::Concurrency(_) => ReconciliationError::ConcurrencyConflict { attempts },
            DispatchError::Store(EventStoreError::Unavailable(msg)) => {
                ReconciliationError::PersistenceFailure(msg)
            }
            other => ReconciliationError::Internal(other.to_string()),
        }
    }
}

/// One charge on a new invoice, before numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub description: String,
    pub category: ChargeCategory,
    pub quantity: u32,
    pub unit_price: MinorUnits,
    pub pharmacy_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvoice {
    pub patient_id: String,
    pub patient_name: String,
    pub lines: Vec<LineItem>,
    /// Defaults to the caller's current date.
    pub invoice_date: Option<NaiveDate>,
    pub due_date: NaiveDate,
}

/// Signed on purpose: a negative amount is a caller error we report, not a
/// value the type system silently refuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub invoice_id: InvoiceId,
    pub amount: i64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPaymentRequest {
    pub invoice_id: InvoiceId,
    pub amount: i64,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub reason: String,
}

/// Outcome of a payment write: the invoice as it stands after the commit and
/// the payment that was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciled {
    pub invoice: InvoiceView,
    pub payment: Payment,
}

pub struct ReconciliationService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    config: BillingConfig,
    retry: RetryPolicy,
    read_models: Arc<BillingReadModels>,
}

impl<S, B> ReconciliationService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: CommandDispatcher<S, B>,
        config: BillingConfig,
        retry: RetryPolicy,
        read_models: Arc<BillingReadModels>,
    ) -> Self {
        Self {
            dispatcher,
            config,
            retry,
            read_models,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn read_models(&self) -> &Arc<BillingReadModels> {
        &self.read_models
    }

    pub fn store(&self) -> &S {
        self.dispatcher.store()
    }

    #[tracing::instrument(skip(self, new), fields(tenant_id = %tenant_id, lines = new.lines.len()))]
    pub fn create_invoice(
        &self,
        tenant_id: TenantId,
        new: NewInvoice,
        now: DateTime<Utc>,
    ) -> Result<InvoiceView, ReconciliationError> {
        let invoice_id = InvoiceId::generate();
        let lines = new
            .lines
            .into_iter()
            .zip(1u32..)
            .map(|(item, line_no)| InvoiceLine {
                line_no,
                description: item.description.trim().to_string(),
                category: item.category,
                quantity: item.quantity,
                unit_price: item.unit_price,
                pharmacy_id: item.pharmacy_id,
            })
            .collect();

        let command = InvoiceCommand::CreateInvoice(CreateInvoice {
            tenant_id,
            invoice_id,
            patient_id: new.patient_id,
            patient_name: new.patient_name,
            lines,
            invoice_date: new.invoice_date.unwrap_or_else(|| now.date_naive()),
            due_date: new.due_date,
            occurred_at: now,
        });

        let dispatched = self.run(tenant_id, invoice_id, command)?;
        let view = self.view(&dispatched.aggregate, now)?;
        tracing::info!(
            invoice_id = %invoice_id,
            total_amount = view.total_amount,
            "invoice created"
        );
        Ok(view)
    }

    /// Apply one completed payment. The payment id is fixed before the first
    /// attempt, so a retry after an ambiguous outcome cannot record it twice.
    #[tracing::instrument(
        skip(self, req),
        fields(tenant_id = %tenant_id, invoice_id = %req.invoice_id, amount = req.amount)
    )]
    pub fn apply_payment(
        &self,
        tenant_id: TenantId,
        req: PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, ReconciliationError> {
        let amount = positive_amount(req.amount)?;
        let payment_id = PaymentId::new();
        let command = InvoiceCommand::ApplyPayment(ApplyPayment {
            tenant_id,
            invoice_id: req.invoice_id,
            payment_id,
            amount,
            method: req.method,
            transaction_id: non_blank(req.transaction_id),
            notes: non_blank(req.notes),
            occurred_at: now,
        });

        let dispatched = self.run(tenant_id, req.invoice_id, command)?;
        let invoice = &dispatched.aggregate;
        let balance = invoice.balance(now);
        if balance.overpaid_by > 0 {
            tracing::warn!(
                invoice_id = %req.invoice_id,
                overpaid_by = balance.overpaid_by,
                allowance = self.config.overpayment_allowance,
                "invoice overpaid within allowance"
            );
        }

        let payment = find_payment(invoice, payment_id)?;
        tracing::info!(
            invoice_id = %req.invoice_id,
            payment_id = %payment_id,
            paid_amount = balance.paid_amount,
            outstanding_balance = balance.outstanding_balance,
            status = %balance.status,
            "payment reconciled"
        );
        Ok(Reconciled {
            invoice: self.view(invoice, now)?,
            payment,
        })
    }

    /// Record a declined or failed attempt. The paid amount does not move.
    #[tracing::instrument(
        skip(self, req),
        fields(tenant_id = %tenant_id, invoice_id = %req.invoice_id, amount = req.amount)
    )]
    pub fn record_failed_payment(
        &self,
        tenant_id: TenantId,
        req: FailedPaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, ReconciliationError> {
        let amount = positive_amount(req.amount)?;
        let payment_id = PaymentId::new();
        let command = InvoiceCommand::RecordFailedPayment(RecordFailedPayment {
            tenant_id,
            invoice_id: req.invoice_id,
            payment_id,
            amount,
            method: req.method,
            transaction_id: non_blank(req.transaction_id),
            reason: req.reason,
            occurred_at: now,
        });

        let dispatched = self.run(tenant_id, req.invoice_id, command)?;
        let payment = find_payment(&dispatched.aggregate, payment_id)?;
        tracing::info!(
            invoice_id = %req.invoice_id,
            payment_id = %payment_id,
            reason = payment.failure_reason.as_deref().unwrap_or_default(),
            "failed payment recorded"
        );
        Ok(Reconciled {
            invoice: self.view(&dispatched.aggregate, now)?,
            payment,
        })
    }

    /// Rehydrate straight from the ledger, bypassing the read models.
    pub fn load(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<Invoice, ReconciliationError> {
        let config = self.config;
        let invoice = self
            .dispatcher
            .load(tenant_id, invoice_id.aggregate_id(), |_, id| {
                Invoice::empty(InvoiceId::new(id), config)
            })
            .map_err(|e| ReconciliationError::from_dispatch(e, invoice_id, 1))?;
        if !invoice.is_created() {
            return Err(ReconciliationError::InvoiceNotFound(invoice_id));
        }
        Ok(invoice)
    }

    /// Dispatch with bounded retries, then bring the read models up to date.
    ///
    /// A store failure can hide a commit. When a later attempt finds the
    /// command already in the log it decides nothing, so the records written
    /// by the hidden commit are published from the stream instead, and the
    /// read models are caught up regardless of what this attempt appended.
    fn run(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<Dispatched<Invoice>, ReconciliationError> {
        let config = self.config;
        let aggregate_id = invoice_id.aggregate_id();
        let max_attempts = self.retry.max_attempts.max(1);
        let attempts = AtomicU32::new(0);
        let store_failed = AtomicBool::new(false);

        let outcome = backoff::retry(self.retry.backoff(), || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.dispatcher
                .dispatch(
                    tenant_id,
                    aggregate_id,
                    AGGREGATE_TYPE,
                    command.clone(),
                    |_, id: AggregateId| Invoice::empty(InvoiceId::new(id), config),
                )
                .map_err(|err| {
                    if matches!(err, DispatchError::Store(_)) {
                        store_failed.store(true, Ordering::Relaxed);
                    }
                    let create_already_stored = store_failed.load(Ordering::Relaxed)
                        && matches!(command, InvoiceCommand::CreateInvoice(_))
                        && matches!(err, DispatchError::Concurrency(_));
                    if err.is_transient() && attempt < max_attempts && !create_already_stored {
                        tracing::debug!(attempt, error = %err, "retrying invoice command");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
        });

        let attempts = attempts.load(Ordering::Relaxed);
        let store_failed = store_failed.load(Ordering::Relaxed);
        let dispatched = match outcome {
            Ok(dispatched) => dispatched,
            Err(backoff::Error::Permanent(err)) | Err(backoff::Error::Transient { err, .. }) => {
                match self.recover_hidden_create(tenant_id, invoice_id, &command, &err, store_failed) {
                    Some(dispatched) => dispatched,
                    None => {
                        if err.is_transient() {
                            tracing::warn!(attempts, error = %err, "invoice command retries exhausted");
                        }
                        return Err(ReconciliationError::from_dispatch(err, invoice_id, attempts));
                    }
                }
            }
        };

        if dispatched.committed.is_empty() && store_failed {
            self.republish_hidden_commit(tenant_id, invoice_id, &command);
        }

        if let Err(err) = self
            .read_models
            .catch_up(self.dispatcher.store(), tenant_id, aggregate_id)
        {
            tracing::warn!(invoice_id = %invoice_id, error = %err, "read model catch-up failed");
        }
        Ok(dispatched)
    }

    /// Invoice ids are minted per request, so after a store failure a stream
    /// that already holds this invoice can only hold our own create.
    fn recover_hidden_create(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        command: &InvoiceCommand,
        err: &DispatchError,
        store_failed: bool,
    ) -> Option<Dispatched<Invoice>> {
        if !store_failed
            || !matches!(command, InvoiceCommand::CreateInvoice(_))
            || !matches!(err, DispatchError::Concurrency(_))
        {
            return None;
        }
        let invoice = self.load(tenant_id, invoice_id).ok()?;
        tracing::info!(invoice_id = %invoice_id, "create found committed after store failure");
        Some(Dispatched {
            aggregate: invoice,
            committed: vec![],
        })
    }

    fn republish_hidden_commit(&self, tenant_id: TenantId, invoice_id: InvoiceId, command: &InvoiceCommand) {
        let outcome = self
            .dispatcher
            .republish(tenant_id, invoice_id.aggregate_id(), |stored| {
                serde_json::from_value::<InvoiceEvent>(stored.payload.clone())
                    .map(|event| records_command(&event, command))
                    .unwrap_or(false)
            });
        match outcome {
            Ok(published) => {
                tracing::info!(invoice_id = %invoice_id, published, "republished records of an unacknowledged commit")
            }
            Err(err) => tracing::warn!(invoice_id = %invoice_id, error = %err, "republish failed"),
        }
    }

    fn view(&self, invoice: &Invoice, now: DateTime<Utc>) -> Result<InvoiceView, ReconciliationError> {
        InvoiceView::from_invoice(invoice, now)
            .ok_or_else(|| ReconciliationError::InvoiceNotFound(invoice.invoice_id()))
    }
}

/// The stored record this command produces when it commits.
fn records_command(event: &InvoiceEvent, command: &InvoiceCommand) -> bool {
    match (event, command) {
        (InvoiceEvent::InvoiceCreated(_), InvoiceCommand::CreateInvoice(_)) => true,
        (InvoiceEvent::PaymentApplied(e), InvoiceCommand::ApplyPayment(c)) => e.payment.payment_id == c.payment_id,
        (InvoiceEvent::PaymentFailed(e), InvoiceCommand::RecordFailedPayment(c)) => {
            e.payment.payment_id == c.payment_id
        }
        _ => false,
    }
}

fn positive_amount(amount: i64) -> Result<MinorUnits, ReconciliationError> {
    match u64::try_from(amount) {
        Ok(amount) if amount > 0 => Ok(amount),
        _ => Err(ReconciliationError::InvalidAmount(format!(
            "payment amount must be positive, got {amount}"
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn find_payment(invoice: &Invoice, payment_id: PaymentId) -> Result<Payment, ReconciliationError> {
    invoice
        .payments()
        .iter()
        .find(|p| p.payment_id == payment_id)
        .cloned()
        .ok_or_else(|| ReconciliationError::Internal(format!("payment {payment_id} missing after commit")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_and_zero_amounts_are_invalid() {
        assert!(matches!(positive_amount(-5), Err(ReconciliationError::InvalidAmount(_))));
        assert!(matches!(positive_amount(0), Err(ReconciliationError::InvalidAmount(_))));
        assert_eq!(positive_amount(250).unwrap(), 250);
    }

    #[test]
    fn only_conflicts_and_outages_are_retryable() {
        assert!(ReconciliationError::ConcurrencyConflict { attempts: 5 }.is_retryable());
        assert!(ReconciliationError::PersistenceFailure("down".into()).is_retryable());
        assert!(!ReconciliationError::InvalidAmount("x".into()).is_retryable());
        assert!(!ReconciliationError::InvoiceNotFound(InvoiceId::generate()).is_retryable());
        assert!(!ReconciliationError::OverpaymentRejected("x".into()).is_retryable());
    }

    #[test]
    fn dispatch_errors_map_to_failure_kinds() {
        let id = InvoiceId::generate();
        assert_eq!(
            ReconciliationError::from_dispatch(DispatchError::NotFound, id, 1),
            ReconciliationError::InvoiceNotFound(id)
        );
        assert_eq!(
            ReconciliationError::from_dispatch(DispatchError::Concurrency("stale".into()), id, 5).kind(),
            "ConcurrencyConflict"
        );
        assert_eq!(
            ReconciliationError::from_dispatch(
                DispatchError::Store(EventStoreError::Unavailable("timeout".into())),
                id,
                5
            )
            .kind(),
            "PersistenceFailure"
        );
    }

    #[test]
    fn retry_policy_never_drops_below_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.max_interval >= policy.initial_interval);
    }
}
