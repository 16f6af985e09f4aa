use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::get,
};
use chrono::Utc;

use hims_auth::Permission;
use hims_billing::InvoiceId;
use hims_infra::{BillingSummary, InvoiceDetail, InvoiceQueries, InvoiceView};

use crate::app::dto::{CreateInvoiceRequest, InvoiceListQuery, ValidatedJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/summary", get(summary))
        .route("/:id", get(get_invoice))
}

pub(crate) fn parse_invoice_id(raw: &str) -> Result<InvoiceId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::validation(format!("invalid invoice id '{raw}'")))
}

/// POST /invoices
///
/// The total is computed from the lines; clients never send it.
pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<ValidatedJson<CreateInvoiceRequest>, ApiError>,
) -> Result<(StatusCode, Json<InvoiceView>), ApiError> {
    authz::require(&tenant, &principal, &Permission::INVOICES_CREATE)?;
    let ValidatedJson(body) = body?;

    let tenant_id = tenant.tenant_id();
    let new = body.into_new_invoice();
    let view = services
        .blocking(move |s| Ok(s.reconciliation.create_invoice(tenant_id, new, Utc::now())?))
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /invoices?status=&from=&to=&patient_id=&q=&sort=
pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<InvoiceListQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Vec<InvoiceView>>, ApiError> {
    authz::require(&tenant, &principal, &Permission::INVOICES_READ)?;
    let Query(query) = query?;
    let filter = query.into_filter()?;
    let invoices = InvoiceQueries::new(services.read_models()).list(tenant.tenant_id(), &filter, Utc::now());
    Ok(Json(invoices))
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<BillingSummary>, ApiError> {
    authz::require(&tenant, &principal, &Permission::INVOICES_READ)?;
    Ok(Json(
        InvoiceQueries::new(services.read_models()).summary(tenant.tenant_id(), Utc::now()),
    ))
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<InvoiceDetail>, ApiError> {
    authz::require(&tenant, &principal, &Permission::INVOICES_READ)?;
    let invoice_id = parse_invoice_id(&id)?;
    InvoiceQueries::new(services.read_models())
        .get(tenant.tenant_id(), invoice_id, Utc::now())
        .map(Json)
        .ok_or_else(|| ApiError::not_found("invoice"))
}
