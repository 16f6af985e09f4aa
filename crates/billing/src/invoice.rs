//! Invoice aggregate.
//!
//! One event stream per invoice: `InvoiceCreated` first, then one record per
//! payment attempt. A `PaymentApplied` record carries both the new payment and
//! the invoice's recomputed balance, so the payment and the invoice update are
//! committed by a single append.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use hims_core::{Aggregate, AggregateId, AggregateRoot, CurrencyCode, DomainError, MinorUnits, TenantId};
use hims_events::Event;

use crate::balance::{self, Balance, InvoiceStatus};
use crate::config::BillingConfig;
use crate::payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};

/// Stream type recorded next to every invoice record.
pub const AGGREGATE_TYPE: &str = "billing.invoice";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub AggregateId);

impl InvoiceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

impl core::str::FromStr for InvoiceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<AggregateId>().map(Self)
    }
}

/// What a line item charges for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChargeCategory {
    Consultation,
    Laboratory,
    Radiology,
    Procedure,
    Room,
    Pharmacy,
    Supplies,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub description: String,
    #[serde(default)]
    pub category: ChargeCategory,
    pub quantity: u32,
    /// Price per unit in minor currency units.
    pub unit_price: MinorUnits,
    /// Dispensing pharmacy, for medication charges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pharmacy_id: Option<String>,
}

impl InvoiceLine {
    pub fn line_total(&self) -> Option<MinorUnits> {
        u64::from(self.quantity).checked_mul(self.unit_price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    config: BillingConfig,
    tenant_id: Option<TenantId>,
    patient_id: String,
    patient_name: String,
    currency: CurrencyCode,
    lines: Vec<InvoiceLine>,
    invoice_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    total_amount: MinorUnits,
    payments: Vec<Payment>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Invoice {
    /// Blank instance for rehydration. `config` supplies the overpayment policy
    /// and the currency for new invoices.
    pub fn empty(id: InvoiceId, config: BillingConfig) -> Self {
        Self {
            id,
            config,
            tenant_id: None,
            patient_id: String::new(),
            patient_name: String::new(),
            currency: config.currency,
            lines: Vec::new(),
            invoice_date: None,
            due_date: None,
            total_amount: 0,
            payments: Vec::new(),
            created_at: None,
            version: 0,
        }
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn patient_name(&self) -> &str {
        &self.patient_name
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn invoice_date(&self) -> Option<NaiveDate> {
        self.invoice_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn total_amount(&self) -> MinorUnits {
        self.total_amount
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Authoritative paid amount: the sum over completed payments.
    pub fn paid_amount(&self) -> MinorUnits {
        balance::paid_amount(&self.payments)
    }

    pub fn balance(&self, now: DateTime<Utc>) -> Balance {
        balance::calculate(
            self.total_amount,
            &self.payments,
            self.due_date.unwrap_or(NaiveDate::MAX),
            now,
            &self.config,
        )
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub patient_id: String,
    pub patient_name: String,
    pub lines: Vec<InvoiceLine>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: MinorUnits,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailedPayment {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: MinorUnits,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    CreateInvoice(CreateInvoice),
    ApplyPayment(ApplyPayment),
    RecordFailedPayment(RecordFailedPayment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCreated {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub patient_id: String,
    pub patient_name: String,
    pub currency: CurrencyCode,
    pub lines: Vec<InvoiceLine>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: MinorUnits,
    pub occurred_at: DateTime<Utc>,
}

/// A completed payment and the invoice state it produced.
///
/// `paid_amount`, `outstanding_balance` and `status` are what the calculator
/// returned at `occurred_at`; rehydration still recomputes from the payment
/// log rather than trusting these figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplied {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub total_amount: MinorUnits,
    pub paid_amount: MinorUnits,
    pub outstanding_balance: MinorUnits,
    pub overpaid_by: MinorUnits,
    pub status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceCreated(InvoiceCreated),
    PaymentApplied(PaymentApplied),
    PaymentFailed(PaymentFailed),
}

impl InvoiceEvent {
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.invoice_id,
            InvoiceEvent::PaymentApplied(e) => e.invoice_id,
            InvoiceEvent::PaymentFailed(e) => e.invoice_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated(_) => "billing.invoice.created",
            InvoiceEvent::PaymentApplied(_) => "billing.invoice.payment_applied",
            InvoiceEvent::PaymentFailed(_) => "billing.invoice.payment_failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceCreated(e) => e.occurred_at,
            InvoiceEvent::PaymentApplied(e) => e.occurred_at,
            InvoiceEvent::PaymentFailed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceCreated(e) => {
                self.id = e.invoice_id;
                self.tenant_id = Some(e.tenant_id);
                self.patient_id = e.patient_id.clone();
                self.patient_name = e.patient_name.clone();
                self.currency = e.currency;
                self.lines = e.lines.clone();
                self.invoice_date = Some(e.invoice_date);
                self.due_date = Some(e.due_date);
                self.total_amount = e.total_amount;
                self.payments.clear();
                self.created_at = Some(e.occurred_at);
            }
            InvoiceEvent::PaymentApplied(e) => self.payments.push(e.payment.clone()),
            InvoiceEvent::PaymentFailed(e) => self.payments.push(e.payment.clone()),
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::CreateInvoice(cmd) => self.handle_create(cmd),
            InvoiceCommand::ApplyPayment(cmd) => self.handle_apply_payment(cmd),
            InvoiceCommand::RecordFailedPayment(cmd) => self.handle_failed_payment(cmd),
        }
    }
}

impl Invoice {
    fn ensure_target(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if !self.is_created() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != invoice_id {
            return Err(DomainError::invariant("invoice_id mismatch"));
        }
        Ok(())
    }

    fn has_payment(&self, payment_id: PaymentId) -> bool {
        self.payments.iter().any(|p| p.payment_id == payment_id)
    }

    fn handle_create(&self, cmd: &CreateInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.is_created() {
            return Err(DomainError::conflict("invoice already exists"));
        }

        let patient_id = cmd.patient_id.trim();
        let patient_name = cmd.patient_name.trim();
        if patient_id.is_empty() {
            return Err(DomainError::validation("patient_id is required"));
        }
        if patient_name.is_empty() {
            return Err(DomainError::validation("patient_name is required"));
        }
        if cmd.due_date < cmd.invoice_date {
            return Err(DomainError::validation(
                "due_date cannot be earlier than invoice_date",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot create invoice without line items",
            ));
        }

        let mut total: MinorUnits = 0;
        for line in &cmd.lines {
            if line.description.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "line {} has an empty description",
                    line.line_no
                )));
            }
            if line.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "line {} quantity must be positive",
                    line.line_no
                )));
            }
            if line.unit_price == 0 {
                return Err(DomainError::validation(format!(
                    "line {} unit_price must be positive",
                    line.line_no
                )));
            }
            let line_total = line
                .line_total()
                .ok_or_else(|| DomainError::validation("invoice line amount overflow"))?;
            total = total
                .checked_add(line_total)
                .ok_or_else(|| DomainError::validation("invoice total overflow"))?;
        }

        Ok(vec![InvoiceEvent::InvoiceCreated(InvoiceCreated {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            patient_id: patient_id.to_string(),
            patient_name: patient_name.to_string(),
            currency: self.config.currency,
            lines: cmd.lines.clone(),
            invoice_date: cmd.invoice_date,
            due_date: cmd.due_date,
            total_amount: total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_payment(&self, cmd: &ApplyPayment) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        // Redelivered command: the payment is already in the log.
        if self.has_payment(cmd.payment_id) {
            return Ok(vec![]);
        }

        let payment = Payment {
            payment_id: cmd.payment_id,
            amount: cmd.amount,
            method: cmd.method,
            status: PaymentStatus::Completed,
            transaction_id: cmd.transaction_id.clone(),
            notes: cmd.notes.clone(),
            failure_reason: None,
            paid_at: cmd.occurred_at,
        };

        let mut candidate = self.payments.clone();
        candidate.push(payment.clone());
        let due_date = self.due_date.unwrap_or(NaiveDate::MAX);
        let balance = balance::calculate(
            self.total_amount,
            &candidate,
            due_date,
            cmd.occurred_at,
            &self.config,
        );

        if !balance.within_allowance {
            return Err(DomainError::limit_exceeded(format!(
                "payment of {} would exceed invoice total {} by {} (allowance {})",
                cmd.amount, self.total_amount, balance.overpaid_by, self.config.overpayment_allowance
            )));
        }

        Ok(vec![InvoiceEvent::PaymentApplied(PaymentApplied {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            payment,
            total_amount: self.total_amount,
            paid_amount: balance.paid_amount,
            outstanding_balance: balance.outstanding_balance,
            overpaid_by: balance.overpaid_by,
            status: balance.status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_failed_payment(
        &self,
        cmd: &RecordFailedPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        self.ensure_target(cmd.tenant_id, cmd.invoice_id)?;

        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("failure reason is required"));
        }
        if self.has_payment(cmd.payment_id) {
            return Ok(vec![]);
        }

        Ok(vec![InvoiceEvent::PaymentFailed(PaymentFailed {
            tenant_id: cmd.tenant_id,
            invoice_id: cmd.invoice_id,
            payment: Payment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                status: PaymentStatus::Failed,
                transaction_id: cmd.transaction_id.clone(),
                notes: None,
                failure_reason: Some(cmd.reason.trim().to_string()),
                paid_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}
