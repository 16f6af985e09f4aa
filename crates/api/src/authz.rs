//! Role to permission policy and the per-request permission check.

use hims_auth::{AuthzError, Permission, Principal, Role, TenantMembership, authorize};

use crate::context::{PrincipalContext, TenantContext};

/// Permissions a role grants. Unknown roles grant nothing.
pub fn permissions_for_role(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "admin" => vec![Permission::WILDCARD],
        "accountant" => vec![
            Permission::INVOICES_CREATE,
            Permission::INVOICES_READ,
            Permission::PAYMENTS_APPLY,
            Permission::PAYMENTS_RECORD_FAILURE,
            Permission::PAYMENTS_READ,
        ],
        "cashier" => vec![
            Permission::INVOICES_READ,
            Permission::PAYMENTS_APPLY,
            Permission::PAYMENTS_RECORD_FAILURE,
            Permission::PAYMENTS_READ,
        ],
        "pharmacist" | "doctor" | "nurse" => vec![Permission::INVOICES_READ],
        _ => vec![],
    }
}

pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out: Vec<Permission> = roles.iter().flat_map(permissions_for_role).collect();
    out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    out.dedup();
    out
}

/// Check one permission for the current request, before any work is done.
pub fn require(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    permission: &Permission,
) -> Result<(), AuthzError> {
    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership: TenantMembership {
            tenant_id: tenant.tenant_id(),
            roles: principal.roles().to_vec(),
            permissions: permissions_from_roles(principal.roles()),
        },
    };
    authorize(&principal, permission)
}

#[cfg(test)]
mod tests {
    use hims_auth::PrincipalId;
    use hims_core::TenantId;

    use super::*;

    fn ctx(roles: Vec<Role>) -> (TenantContext, PrincipalContext) {
        (
            TenantContext::new(TenantId::new()),
            PrincipalContext::new(PrincipalId::new(), roles),
        )
    }

    #[test]
    fn cashier_can_pay_but_not_bill() {
        let (t, p) = ctx(vec![Role::CASHIER]);
        assert!(require(&t, &p, &Permission::PAYMENTS_APPLY).is_ok());
        assert!(require(&t, &p, &Permission::INVOICES_CREATE).is_err());
    }

    #[test]
    fn clinical_roles_only_read_invoices() {
        for role in [Role::PHARMACIST, Role::DOCTOR, Role::NURSE] {
            let (t, p) = ctx(vec![role]);
            assert!(require(&t, &p, &Permission::INVOICES_READ).is_ok());
            assert!(require(&t, &p, &Permission::PAYMENTS_APPLY).is_err());
            assert!(require(&t, &p, &Permission::PAYMENTS_READ).is_err());
        }
    }

    #[test]
    fn admin_wildcard_covers_user_management_and_audit() {
        let (t, p) = ctx(vec![Role::ADMIN]);
        assert!(require(&t, &p, &Permission::USERS_MANAGE).is_ok());
        assert!(require(&t, &p, &Permission::AUDIT_READ).is_ok());
    }

    #[test]
    fn accountant_does_not_manage_users() {
        let (t, p) = ctx(vec![Role::ACCOUNTANT]);
        assert!(require(&t, &p, &Permission::INVOICES_CREATE).is_ok());
        assert!(require(&t, &p, &Permission::USERS_MANAGE).is_err());
    }

    #[test]
    fn overlapping_roles_are_deduplicated() {
        let perms = permissions_from_roles(&[Role::CASHIER, Role::ACCOUNTANT]);
        assert_eq!(perms.len(), 5);
    }
}
