use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::get,
};
use chrono::Utc;

use hims_auth::{NewUser, Permission, PrincipalId, Role, UserAccount};
use hims_core::UserId;

use crate::app::dto::{RegisterUserRequest, UpdateUserRequest, ValidatedJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(register_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::validation(format!("invalid user id '{raw}'")))
}

pub async fn register_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<ValidatedJson<RegisterUserRequest>, ApiError>,
) -> Result<(StatusCode, Json<UserAccount>), ApiError> {
    authz::require(&tenant, &principal, &Permission::USERS_MANAGE)?;
    let ValidatedJson(body) = body?;

    let new = NewUser {
        tenant_id: tenant.tenant_id(),
        email: body.email,
        name: body.name,
        role: Role::new(body.role.trim().to_ascii_lowercase()),
        department: body.department,
        password: body.password,
    };
    let user = services
        .blocking(move |s| Ok(s.users.register(new, Utc::now())?))
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<Vec<UserAccount>>, ApiError> {
    authz::require(&tenant, &principal, &Permission::USERS_MANAGE)?;
    Ok(Json(services.users.list(tenant.tenant_id())))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<UserAccount>, ApiError> {
    authz::require(&tenant, &principal, &Permission::USERS_MANAGE)?;
    let user_id = parse_user_id(&id)?;
    services
        .users
        .get(tenant.tenant_id(), user_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("user"))
}

pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<ValidatedJson<UpdateUserRequest>, ApiError>,
) -> Result<Json<UserAccount>, ApiError> {
    authz::require(&tenant, &principal, &Permission::USERS_MANAGE)?;
    let user_id = parse_user_id(&id)?;
    let ValidatedJson(body) = body?;
    let update = body.into_update()?;
    let tenant_id = tenant.tenant_id();
    let user = services
        .blocking(move |s| Ok(s.users.update(tenant_id, user_id, update)?))
        .await?;
    Ok(Json(user))
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authz::require(&tenant, &principal, &Permission::USERS_MANAGE)?;
    let user_id = parse_user_id(&id)?;
    if PrincipalId::from(user_id) == principal.principal_id() {
        return Err(ApiError::Conflict {
            kind: "SelfDelete",
            message: "you cannot delete your own account".to_string(),
            retryable: false,
        });
    }
    services.users.delete(tenant.tenant_id(), user_id)?;
    Ok(StatusCode::NO_CONTENT)
}
