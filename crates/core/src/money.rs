//! Money representation.
//!
//! Amounts are integer counts of the currency's minor unit (centavos for PHP).
//! Every balance computation goes through `u64` arithmetic, so there is exactly
//! one numeric path and no rounding.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Amount in minor currency units.
pub type MinorUnits = u64;

/// ISO 4217 alphabetic currency code (three ASCII uppercase letters).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    pub const PHP: CurrencyCode = CurrencyCode(*b"PHP");

    pub fn as_str(&self) -> &str {
        // Constructed only from ASCII uppercase bytes.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::PHP
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bytes = upper.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(DomainError::validation(format!(
                "currency code must be three letters, got {s:?}"
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_code_is_normalized_to_uppercase() {
        let code: CurrencyCode = " usd ".parse().unwrap();
        assert_eq!(code.as_str(), "USD");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"USD\"");
    }

    #[test]
    fn currency_code_rejects_bad_shapes() {
        assert!("PESO".parse::<CurrencyCode>().is_err());
        assert!("P1P".parse::<CurrencyCode>().is_err());
        assert!(serde_json::from_str::<CurrencyCode>("\"ph\"").is_err());
    }
}
