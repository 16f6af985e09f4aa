use serde::{Deserialize, Serialize};

use hims_core::{CurrencyCode, MinorUnits};

/// Billing policy handed explicitly to the balance calculator and the invoice
/// aggregate. There is no global default lookup; callers decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Currency stamped on invoices at creation.
    pub currency: CurrencyCode,
    /// How far (in minor units) the paid amount may exceed the invoice total.
    /// Zero rejects every overpayment.
    pub overpayment_allowance: MinorUnits,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::PHP,
            overpayment_allowance: 0,
        }
    }
}

impl BillingConfig {
    pub fn with_overpayment_allowance(mut self, allowance: MinorUnits) -> Self {
        self.overpayment_allowance = allowance;
        self
    }
}
