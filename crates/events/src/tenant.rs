use hims_core::TenantId;

use crate::EventEnvelope;

/// Messages that belong to exactly one tenant. Tenant-pinned consumers (the
/// realtime stream, per-tenant workers) drop anything that does not match.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;

    fn belongs_to(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        EventEnvelope::tenant_id(self)
    }
}
