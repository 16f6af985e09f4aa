//! Error responses.
//!
//! Every failure leaves the API as
//! `{"error": <category>, "kind": <failure kind>, "message": <text>, "retryable": <bool>}`.
//!
//! | category | status |
//! |---|---|
//! | `validation_error` | 400 |
//! | `unauthorized` | 401 |
//! | `forbidden` | 403 |
//! | `not_found` | 404 |
//! | `conflict` | 409 |
//! | `internal_error` | 500 |
//! | `persistence_error` | 503 |

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use hims_auth::AuthzError;
use hims_infra::{ReconciliationError, UserDirectoryError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { kind: &'static str, message: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{message}")]
    NotFound { kind: &'static str, message: String },

    #[error("{message}")]
    Conflict {
        kind: &'static str,
        message: String,
        retryable: bool,
    },

    #[error("{message}")]
    Persistence { kind: &'static str, message: String },

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    kind: &'a str,
    message: String,
    retryable: bool,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            kind: "Validation",
            message: message.into(),
        }
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound {
            kind: "NotFound",
            message: format!("{what} not found"),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Persistence { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody<'_> {
        let (error, kind, retryable) = match self {
            ApiError::Validation { kind, .. } => ("validation_error", *kind, false),
            ApiError::Unauthorized(_) => ("unauthorized", "Unauthorized", false),
            ApiError::Forbidden(_) => ("forbidden", "Forbidden", false),
            ApiError::NotFound { kind, .. } => ("not_found", *kind, false),
            ApiError::Conflict { kind, retryable, .. } => ("conflict", *kind, *retryable),
            ApiError::Persistence { kind, .. } => ("persistence_error", *kind, true),
            ApiError::Internal(_) => ("internal_error", "Internal", false),
        };
        ErrorBody {
            error,
            kind,
            message: self.to_string(),
            retryable,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

impl From<ReconciliationError> for ApiError {
    fn from(err: ReconciliationError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        match err {
            ReconciliationError::InvalidAmount(_) | ReconciliationError::Validation(_) => {
                ApiError::Validation { kind, message }
            }
            ReconciliationError::InvoiceNotFound(_) => ApiError::NotFound { kind, message },
            ReconciliationError::OverpaymentRejected(_) => ApiError::Conflict {
                kind,
                message,
                retryable: false,
            },
            ReconciliationError::ConcurrencyConflict { .. } => ApiError::Conflict {
                kind,
                message,
                retryable: true,
            },
            ReconciliationError::PersistenceFailure(_) => ApiError::Persistence { kind, message },
            ReconciliationError::Internal(_) => ApiError::Internal(message),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::Forbidden(err.to_string())
    }
}

impl From<UserDirectoryError> for ApiError {
    fn from(err: UserDirectoryError) -> Self {
        match err {
            UserDirectoryError::DuplicateEmail(_) => ApiError::Conflict {
                kind: "DuplicateEmail",
                message: err.to_string(),
                retryable: false,
            },
            UserDirectoryError::NotFound => ApiError::not_found("user"),
            UserDirectoryError::InvalidCredentials => ApiError::Unauthorized(err.to_string()),
            UserDirectoryError::Invalid(_) => ApiError::validation(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::Validation {
            kind: "MalformedBody",
            message: err.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(err: QueryRejection) -> Self {
        ApiError::Validation {
            kind: "MalformedQuery",
            message: err.body_text(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use hims_billing::InvoiceId;

    use super::*;

    #[test]
    fn reconciliation_failures_map_to_status_and_retryability() {
        let cases = [
            (ReconciliationError::InvalidAmount("-5".into()), StatusCode::BAD_REQUEST, false),
            (ReconciliationError::InvoiceNotFound(InvoiceId::generate()), StatusCode::NOT_FOUND, false),
            (ReconciliationError::OverpaymentRejected("x".into()), StatusCode::CONFLICT, false),
            (ReconciliationError::ConcurrencyConflict { attempts: 5 }, StatusCode::CONFLICT, true),
            (ReconciliationError::PersistenceFailure("down".into()), StatusCode::SERVICE_UNAVAILABLE, true),
        ];
        for (err, status, retryable) in cases {
            let kind = err.kind();
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            let body = api.body();
            assert_eq!(body.kind, kind);
            assert_eq!(body.retryable, retryable);
        }
    }

    #[test]
    fn login_failure_is_unauthorized() {
        let api = ApiError::from(UserDirectoryError::InvalidCredentials);
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(api.body().error, "unauthorized");
    }
}
