//! Process configuration from environment variables (optionally seeded from a
//! `.env` file by `main`).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use hims_billing::BillingConfig;
use hims_core::{CurrencyCode, TenantId};
use hims_infra::RetryPolicy;

const DEV_JWT_SECRET: &str = "hims-dev-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub tenant_id: TenantId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub jwt_ttl: chrono::Duration,
    pub bcrypt_cost: u32,
    pub billing: BillingConfig,
    pub retry: RetryPolicy,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub persistence: Persistence,
}

impl AppConfig {
    /// In-memory stores, fast hashing, no seeded users. Meant for tests.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: jwt_secret.into(),
            jwt_ttl: chrono::Duration::minutes(60),
            bcrypt_cost: 4,
            billing: BillingConfig::default(),
            retry: RetryPolicy::new(5, Duration::from_millis(2)),
            bootstrap_admin: None,
            persistence: Persistence::InMemory,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let currency = match var("BILLING_CURRENCY") {
            Some(code) => CurrencyCode::from_str(&code).map_err(|e| ConfigError::Invalid {
                name: "BILLING_CURRENCY",
                value: code.clone(),
                reason: e.to_string(),
            })?,
            None => CurrencyCode::PHP,
        };
        let billing = BillingConfig {
            currency,
            overpayment_allowance: parse_or(&var, "BILLING_OVERPAYMENT_ALLOWANCE", 0u64)?,
        };

        let retry = RetryPolicy::new(
            parse_or(&var, "BILLING_MAX_ATTEMPTS", 5u32)?,
            Duration::from_millis(parse_or(&var, "BILLING_RETRY_BASE_MS", 5u64)?),
        );

        let bootstrap_admin = match (var("HIMS_BOOTSTRAP_ADMIN_EMAIL"), var("HIMS_BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email,
                password,
                tenant_id: match var("HIMS_BOOTSTRAP_TENANT") {
                    Some(t) => t.parse().map_err(|e: hims_core::DomainError| ConfigError::Invalid {
                        name: "HIMS_BOOTSTRAP_TENANT",
                        value: t.clone(),
                        reason: e.to_string(),
                    })?,
                    None => TenantId::new(),
                },
            }),
            (Some(_), None) => return Err(ConfigError::Missing("HIMS_BOOTSTRAP_ADMIN_PASSWORD")),
            _ => None,
        };

        let persistence = if parse_or(&var, "USE_PERSISTENT_STORES", false)? {
            Persistence::Postgres {
                database_url: var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            }
        } else {
            Persistence::InMemory
        };

        Ok(Self {
            bind_addr: parse_or(&var, "HIMS_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            jwt_secret,
            jwt_ttl: chrono::Duration::minutes(parse_or(&var, "JWT_TTL_MINUTES", 1440i64)?),
            bcrypt_cost: parse_or(&var, "BCRYPT_COST", 10u32)?,
            billing,
            retry,
            bootstrap_admin,
            persistence,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match var(name) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.billing, BillingConfig::default());
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.bcrypt_cost, 10);
        assert_eq!(cfg.jwt_ttl, chrono::Duration::minutes(1440));
        assert_eq!(cfg.persistence, Persistence::InMemory);
        assert!(cfg.bootstrap_admin.is_none());
    }

    #[test]
    fn billing_and_bootstrap_values_are_read() {
        let tenant = TenantId::new();
        let tenant_str = tenant.to_string();
        let cfg = AppConfig::from_lookup(lookup(&[
            ("BILLING_OVERPAYMENT_ALLOWANCE", "500"),
            ("BILLING_MAX_ATTEMPTS", "8"),
            ("HIMS_BOOTSTRAP_ADMIN_EMAIL", "admin@hospital.ph"),
            ("HIMS_BOOTSTRAP_ADMIN_PASSWORD", "change-me-now"),
            ("HIMS_BOOTSTRAP_TENANT", tenant_str.as_str()),
        ]))
        .unwrap();
        assert_eq!(cfg.billing.overpayment_allowance, 500);
        assert_eq!(cfg.retry.max_attempts, 8);
        assert_eq!(cfg.bootstrap_admin.unwrap().tenant_id, tenant);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[("BCRYPT_COST", "lots")])).unwrap_err();
        assert!(err.to_string().contains("BCRYPT_COST"));

        let err = AppConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }
}
