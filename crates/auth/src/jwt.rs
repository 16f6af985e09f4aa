//! HS256 token signing and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use hims_core::TenantId;

use crate::{JwtClaims, PrincipalId, Role, TokenValidationError, validate_claims};

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("malformed or badly signed token: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

fn validation() -> Validation {
    // Expiry lives in `expires_at` (RFC 3339), not the numeric `exp` claim,
    // so the time window is checked by `validate_claims` instead.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    validation
}

#[derive(Clone)]
pub struct Hs256JwtValidator {
    key: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let data = decode::<JwtClaims>(token, &self.key, &validation())?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

/// Signs tokens for successful logins.
#[derive(Clone)]
pub struct Hs256JwtIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl Hs256JwtIssuer {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        sub: PrincipalId,
        tenant_id: TenantId,
        roles: Vec<Role>,
        now: DateTime<Utc>,
    ) -> Result<String, JwtError> {
        let claims = JwtClaims {
            sub,
            tenant_id,
            roles,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_validates_with_same_secret() {
        let issuer = Hs256JwtIssuer::new(SECRET, Duration::minutes(30));
        let validator = Hs256JwtValidator::new(SECRET);
        let tenant_id = TenantId::new();
        let now = Utc::now();

        let token = issuer
            .issue(PrincipalId::new(), tenant_id, vec![Role::ACCOUNTANT], now)
            .unwrap();
        let claims = validator.validate(&token, now).unwrap();

        assert_eq!(claims.tenant_id, tenant_id);
        assert_eq!(claims.roles, vec![Role::ACCOUNTANT]);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let token = Hs256JwtIssuer::new(SECRET, Duration::minutes(30))
            .issue(PrincipalId::new(), TenantId::new(), vec![], now)
            .unwrap();

        let err = Hs256JwtValidator::new("other").validate(&token, now).unwrap_err();
        assert!(matches!(err, JwtError::Decode(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - Duration::hours(2);
        let token = Hs256JwtIssuer::new(SECRET, Duration::hours(1))
            .issue(PrincipalId::new(), TenantId::new(), vec![Role::ADMIN], issued)
            .unwrap();

        let err = Hs256JwtValidator::new(SECRET)
            .validate(&token, Utc::now())
            .unwrap_err();
        assert!(matches!(err, JwtError::Claims(TokenValidationError::Expired)));
    }
}
