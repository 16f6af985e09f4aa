use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;

use hims_auth::Permission;
use hims_infra::{FailedPaymentRequest, InvoiceQueries, PaymentLogEntry, PaymentRequest, Reconciled};

use crate::app::dto::{ApplyPaymentRequest, PaymentListQuery, RecordFailedPaymentRequest, ValidatedJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_payments).post(apply_payment))
        .route("/failed", post(record_failed_payment))
}

/// POST /payments
///
/// Responds with the reconciled invoice and the stored payment.
pub async fn apply_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<ValidatedJson<ApplyPaymentRequest>, ApiError>,
) -> Result<(StatusCode, Json<Reconciled>), ApiError> {
    authz::require(&tenant, &principal, &Permission::PAYMENTS_APPLY)?;
    let ValidatedJson(body) = body?;
    let request = PaymentRequest::try_from(body)?;

    let tenant_id = tenant.tenant_id();
    let reconciled = services
        .blocking(move |s| Ok(s.reconciliation.apply_payment(tenant_id, request, Utc::now())?))
        .await?;
    Ok((StatusCode::CREATED, Json(reconciled)))
}

/// POST /payments/failed
pub async fn record_failed_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<ValidatedJson<RecordFailedPaymentRequest>, ApiError>,
) -> Result<(StatusCode, Json<Reconciled>), ApiError> {
    authz::require(&tenant, &principal, &Permission::PAYMENTS_RECORD_FAILURE)?;
    let ValidatedJson(body) = body?;
    let request = FailedPaymentRequest::try_from(body)?;

    let tenant_id = tenant.tenant_id();
    let reconciled = services
        .blocking(move |s| {
            Ok(s.reconciliation
                .record_failed_payment(tenant_id, request, Utc::now())?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reconciled)))
}

/// GET /payments?invoice_id=
pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    query: Result<Query<PaymentListQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<Vec<PaymentLogEntry>>, ApiError> {
    authz::require(&tenant, &principal, &Permission::PAYMENTS_READ)?;
    let Query(query) = query?;
    Ok(Json(
        InvoiceQueries::new(services.read_models()).payments(tenant.tenant_id(), query.invoice_id),
    ))
}
