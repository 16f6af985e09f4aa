use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Sse, sse::Event as SseEvent},
};

use hims_auth::Permission;
use hims_infra::AuditEntry;

use crate::app::errors::ApiError;
use crate::app::services::{self, AppServices};
use crate::authz::{self, permissions_from_roles};
use crate::context::{PrincipalContext, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenant_id": tenant.tenant_id().to_string(),
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "permissions": permissions_from_roles(principal.roles())
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>(),
    }))
}

/// Billing notifications for the caller's hospital as server-sent events.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>>, ApiError> {
    authz::require(&tenant, &principal, &Permission::INVOICES_READ)?;
    Ok(services::tenant_sse_stream(&services, tenant.tenant_id()))
}

pub async fn audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    authz::require(&tenant, &principal, &Permission::AUDIT_READ)?;
    Ok(Json(services.audit.entries(tenant.tenant_id())))
}
