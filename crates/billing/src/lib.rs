//! `hims-billing`: invoice and payment domain for hospital billing.
//!
//! - [`balance`]: pure balance calculator (paid, outstanding, status)
//! - [`invoice`]: event-sourced invoice aggregate carrying its payment log
//! - [`payment`]: payment records, tender methods and statuses
//! - [`config`]: explicit billing policy

pub mod balance;
pub mod config;
pub mod invoice;
pub mod payment;

pub use balance::{Balance, InvoiceStatus};
pub use config::BillingConfig;
pub use invoice::{
    AGGREGATE_TYPE, ApplyPayment, ChargeCategory, CreateInvoice, Invoice, InvoiceCommand,
    InvoiceCreated, InvoiceEvent, InvoiceId, InvoiceLine, PaymentApplied, PaymentFailed,
    RecordFailedPayment,
};
pub use payment::{Payment, PaymentId, PaymentMethod, PaymentStatus};
