//! Invoice query façade over the billing read models.
//!
//! Read only. Status is never stored; every view derives it from the row's
//! amounts, failure flag and due date against the `now` the caller passes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use hims_billing::{Invoice, InvoiceId, InvoiceLine, InvoiceStatus};
use hims_core::{AggregateRoot, CurrencyCode, MinorUnits, TenantId};

use crate::projections::{BillingReadModels, InvoiceReadModel, PaymentLogEntry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    /// Inclusive lower bound on the invoice date.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on the invoice date.
    pub to: Option<NaiveDate>,
    pub patient_id: Option<String>,
    /// Case-insensitive substring of patient name, patient id or invoice id.
    pub text: Option<String>,
    pub sort: SortOrder,
}

impl InvoiceFilter {
    fn matches(&self, view: &InvoiceView) -> bool {
        if self.status.is_some_and(|s| s != view.status) {
            return false;
        }
        if self.from.is_some_and(|from| view.invoice_date < from) {
            return false;
        }
        if self.to.is_some_and(|to| view.invoice_date > to) {
            return false;
        }
        if let Some(pid) = self.patient_id.as_deref() {
            if view.patient_id != pid.trim() {
                return false;
            }
        }
        match self.text.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                view.patient_name.to_lowercase().contains(&q)
                    || view.patient_id.to_lowercase().contains(&q)
                    || view.invoice_id.to_string().contains(&q)
            }
            _ => true,
        }
    }
}

/// What callers see of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceView {
    pub invoice_id: InvoiceId,
    pub patient_id: String,
    pub patient_name: String,
    pub currency: CurrencyCode,
    pub lines: Vec<InvoiceLine>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: MinorUnits,
    pub paid_amount: MinorUnits,
    pub outstanding_balance: MinorUnits,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl InvoiceView {
    pub fn from_read_model(rm: &InvoiceReadModel, now: DateTime<Utc>) -> Self {
        Self {
            invoice_id: rm.invoice_id,
            patient_id: rm.patient_id.clone(),
            patient_name: rm.patient_name.clone(),
            currency: rm.currency,
            lines: rm.lines.clone(),
            invoice_date: rm.invoice_date,
            due_date: rm.due_date,
            total_amount: rm.total_amount,
            paid_amount: rm.paid_amount,
            outstanding_balance: rm.outstanding_balance(),
            status: rm.status(now),
            created_at: rm.created_at,
            version: rm.version,
        }
    }

    /// Straight from a rehydrated aggregate. `None` for an invoice that was
    /// never created.
    pub fn from_invoice(invoice: &Invoice, now: DateTime<Utc>) -> Option<Self> {
        let (invoice_date, due_date, created_at) =
            (invoice.invoice_date()?, invoice.due_date()?, invoice.created_at()?);
        let balance = invoice.balance(now);
        Some(Self {
            invoice_id: invoice.invoice_id(),
            patient_id: invoice.patient_id().to_string(),
            patient_name: invoice.patient_name().to_string(),
            currency: invoice.currency(),
            lines: invoice.lines().to_vec(),
            invoice_date,
            due_date,
            total_amount: invoice.total_amount(),
            paid_amount: balance.paid_amount,
            outstanding_balance: balance.outstanding_balance,
            status: balance.status,
            created_at,
            version: invoice.version(),
        })
    }
}

/// One invoice with its payment log, newest payment first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: InvoiceView,
    pub payments: Vec<PaymentLogEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingSummary {
    pub invoice_count: usize,
    pub total_billed: MinorUnits,
    pub total_collected: MinorUnits,
    pub total_outstanding: MinorUnits,
    pub overdue_count: usize,
    pub overdue_amount: MinorUnits,
}

pub struct InvoiceQueries<'a> {
    models: &'a BillingReadModels,
}

impl<'a> InvoiceQueries<'a> {
    pub fn new(models: &'a BillingReadModels) -> Self {
        Self { models }
    }

    pub fn list(&self, tenant_id: TenantId, filter: &InvoiceFilter, now: DateTime<Utc>) -> Vec<InvoiceView> {
        let mut views: Vec<_> = self
            .models
            .invoices
            .list(tenant_id)
            .iter()
            .map(|rm| InvoiceView::from_read_model(rm, now))
            .filter(|v| filter.matches(v))
            .collect();

        views.sort_by(|a, b| {
            a.invoice_date
                .cmp(&b.invoice_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.invoice_id.cmp(&b.invoice_id))
        });
        if filter.sort == SortOrder::Desc {
            views.reverse();
        }
        views
    }

    pub fn get(&self, tenant_id: TenantId, invoice_id: InvoiceId, now: DateTime<Utc>) -> Option<InvoiceDetail> {
        let rm = self.models.invoices.get(tenant_id, &invoice_id)?;
        Some(InvoiceDetail {
            invoice: InvoiceView::from_read_model(&rm, now),
            payments: self.models.payments.list(tenant_id, Some(invoice_id)),
        })
    }

    pub fn payments(&self, tenant_id: TenantId, invoice_id: Option<InvoiceId>) -> Vec<PaymentLogEntry> {
        self.models.payments.list(tenant_id, invoice_id)
    }

    pub fn summary(&self, tenant_id: TenantId, now: DateTime<Utc>) -> BillingSummary {
        self.models
            .invoices
            .list(tenant_id)
            .iter()
            .fold(BillingSummary::default(), |mut acc, rm| {
                let outstanding = rm.outstanding_balance();
                acc.invoice_count += 1;
                acc.total_billed = acc.total_billed.saturating_add(rm.total_amount);
                acc.total_collected = acc.total_collected.saturating_add(rm.paid_amount);
                acc.total_outstanding = acc.total_outstanding.saturating_add(outstanding);
                if rm.status(now) == InvoiceStatus::Overdue {
                    acc.overdue_count += 1;
                    acc.overdue_amount = acc.overdue_amount.saturating_add(outstanding);
                }
                acc
            })
    }
}
