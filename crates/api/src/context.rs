//! Request-scoped identity, inserted by the auth middleware.

use hims_auth::{JwtClaims, PrincipalId, Role};
use hims_core::TenantId;

/// The hospital a request acts for. Taken from the token, never from the
/// request body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn from_claims(claims: &JwtClaims) -> (TenantContext, Self) {
        (
            TenantContext::new(claims.tenant_id),
            Self::new(claims.sub, claims.roles.clone()),
        )
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
