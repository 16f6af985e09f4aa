use std::sync::Arc;

use axum::{Json, extract::Extension};
use chrono::Utc;

use hims_auth::PrincipalId;

use crate::app::dto::{LoginRequest, LoginResponse, ValidatedJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// POST /auth/login
///
/// Unknown email and wrong password produce the same 401.
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = services
        .blocking(move |s| Ok(s.users.authenticate(&body.email, &body.password)?))
        .await?;

    let now = Utc::now();
    let token = services
        .issuer
        .issue(PrincipalId::from(user.user_id), user.tenant_id, vec![user.role.clone()], now)
        .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))?;

    tracing::info!(tenant_id = %user.tenant_id, user_id = %user.user_id, role = %user.role, "login");
    Ok(Json(LoginResponse {
        token,
        expires_at: now + services.issuer.ttl(),
        user,
    }))
}
