use std::collections::HashSet;

use thiserror::Error;

use hims_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// Principal resolved for one request: identity, the tenant it acts in, and
/// its membership there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Pure permission check inside the principal's active tenant.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let granted: HashSet<&str> = principal
        .membership
        .permissions
        .iter()
        .map(Permission::as_str)
        .collect();

    if granted.contains(Permission::WILDCARD.as_str()) || granted.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}
