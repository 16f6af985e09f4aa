use axum::Json;
use axum::extract::{FromRequest, Request};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use validator::Validate;

use hims_auth::{Role, UserAccount, UserUpdate};
use hims_billing::{ChargeCategory, InvoiceId, InvoiceStatus, PaymentMethod};
use hims_infra::{FailedPaymentRequest, InvoiceFilter, LineItem, NewInvoice, PaymentRequest, SortOrder};

use crate::app::errors::ApiError;

// -------------------------
// Extractor
// -------------------------

/// JSON body that has been deserialized and then checked with `validator`.
#[derive(Debug)]
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Self(value))
    }
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterUserRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 120, message = "name must be 1 to 120 characters"))]
    pub name: String,
    pub role: String,
    pub department: Option<String>,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
}

/// Every field optional; at least one must be present.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[validate(email(message = "invalid email address"))]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 120, message = "name must be 1 to 120 characters"))]
    pub name: Option<String>,
    pub role: Option<String>,
    pub department: Option<String>,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn into_update(self) -> Result<UserUpdate, ApiError> {
        let update = UserUpdate {
            email: self.email,
            name: self.name,
            role: self.role.map(|r| Role::new(r.trim().to_ascii_lowercase())),
            department: self.department,
            password: self.password,
        };
        if update.is_empty() {
            return Err(ApiError::validation("nothing to update"));
        }
        Ok(update)
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LineItemRequest {
    #[validate(length(min = 1, max = 200, message = "description must be 1 to 200 characters"))]
    pub description: String,
    #[serde(default)]
    pub category: ChargeCategory,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: u32,
    #[serde(alias = "unit_price")]
    pub unit_price: u64,
    #[serde(default, alias = "pharmacy_id")]
    pub pharmacy_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    #[serde(alias = "patient_id")]
    #[validate(length(min = 1, max = 64, message = "patientId must be 1 to 64 characters"))]
    pub patient_id: String,
    #[serde(alias = "patient_name")]
    #[validate(length(min = 1, max = 200, message = "patientName must be 1 to 200 characters"))]
    pub patient_name: String,
    #[validate(length(min = 1, message = "at least one line item is required"))]
    #[validate(nested)]
    pub lines: Vec<LineItemRequest>,
    #[serde(default, alias = "invoice_date")]
    pub invoice_date: Option<NaiveDate>,
    #[serde(alias = "due_date")]
    pub due_date: NaiveDate,
}

impl CreateInvoiceRequest {
    pub fn into_new_invoice(self) -> NewInvoice {
        NewInvoice {
            patient_id: self.patient_id.trim().to_string(),
            patient_name: self.patient_name.trim().to_string(),
            lines: self
                .lines
                .into_iter()
                .map(|l| LineItem {
                    description: l.description,
                    category: l.category,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    pharmacy_id: l.pharmacy_id,
                })
                .collect(),
            invoice_date: self.invoice_date,
            due_date: self.due_date,
        }
    }
}

/// `amount` stays signed so that a negative figure reaches the service and
/// comes back as `InvalidAmount` rather than a parse failure. `invoice_id`
/// stays raw for the same reason: an id that names no invoice is a 404.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ApplyPaymentRequest {
    #[serde(alias = "invoice_id")]
    pub invoice_id: String,
    pub amount: i64,
    #[serde(alias = "payment_method")]
    pub method: PaymentMethod,
    #[serde(default, alias = "transaction_id")]
    #[validate(length(max = 128))]
    pub transaction_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// A referenced invoice id that does not parse cannot name an invoice.
fn referenced_invoice(raw: &str) -> Result<InvoiceId, ApiError> {
    raw.trim().parse().map_err(|_| ApiError::NotFound {
        kind: "InvoiceNotFound",
        message: format!("invoice {raw} not found"),
    })
}

impl TryFrom<ApplyPaymentRequest> for PaymentRequest {
    type Error = ApiError;

    fn try_from(req: ApplyPaymentRequest) -> Result<Self, Self::Error> {
        Ok(PaymentRequest {
            invoice_id: referenced_invoice(&req.invoice_id)?,
            amount: req.amount,
            method: req.method,
            transaction_id: req.transaction_id,
            notes: req.notes,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RecordFailedPaymentRequest {
    #[serde(alias = "invoice_id")]
    pub invoice_id: String,
    pub amount: i64,
    #[serde(alias = "payment_method")]
    pub method: PaymentMethod,
    #[serde(default, alias = "transaction_id")]
    #[validate(length(max = 128))]
    pub transaction_id: Option<String>,
    #[validate(length(min = 1, max = 500, message = "reason must be 1 to 500 characters"))]
    pub reason: String,
}

impl TryFrom<RecordFailedPaymentRequest> for FailedPaymentRequest {
    type Error = ApiError;

    fn try_from(req: RecordFailedPaymentRequest) -> Result<Self, Self::Error> {
        Ok(FailedPaymentRequest {
            invoice_id: referenced_invoice(&req.invoice_id)?,
            amount: req.amount,
            method: req.method,
            transaction_id: req.transaction_id,
            reason: req.reason,
        })
    }
}

// -------------------------
// Query strings
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub patient_id: Option<String>,
    pub q: Option<String>,
    pub sort: Option<SortOrder>,
}

impl InvoiceListQuery {
    pub fn into_filter(self) -> Result<InvoiceFilter, ApiError> {
        let status = self
            .status
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<InvoiceStatus>())
            .transpose()
            .map_err(|e: hims_core::DomainError| ApiError::validation(e.to_string()))?;
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ApiError::validation("from must not be after to"));
            }
        }
        Ok(InvoiceFilter {
            status,
            from: self.from,
            to: self.to,
            patient_id: self.patient_id.filter(|p| !p.trim().is_empty()),
            text: self.q.filter(|q| !q.trim().is_empty()),
            sort: self.sort.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentListQuery {
    pub invoice_id: Option<InvoiceId>,
}

// -------------------------
// Responses
// -------------------------

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub user: UserAccount,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn payment_body_accepts_camel_and_snake_case() {
        let id = InvoiceId::generate();
        let camel: ApplyPaymentRequest = serde_json::from_value(json!({
            "invoiceId": id.to_string(), "amount": 100, "method": "GCash", "transactionId": "tx-1"
        }))
        .unwrap();
        let snake: ApplyPaymentRequest = serde_json::from_value(json!({
            "invoice_id": id.to_string(), "amount": 100, "method": "Credit Card", "transaction_id": "tx-1"
        }))
        .unwrap();
        assert_eq!(camel.invoice_id, snake.invoice_id);
        assert_eq!(snake.method, PaymentMethod::CreditCard);
    }

    #[test]
    fn unparseable_invoice_reference_is_not_found() {
        let req: ApplyPaymentRequest = serde_json::from_value(json!({
            "invoiceId": "INV-0042", "amount": 100, "method": "Cash"
        }))
        .unwrap();
        let err = PaymentRequest::try_from(req).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
        assert!(matches!(err, ApiError::NotFound { kind: "InvoiceNotFound", .. }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_value::<ApplyPaymentRequest>(json!({
            "invoiceId": InvoiceId::generate().to_string(), "amount": 1, "method": "Cash", "paidAmount": 1
        }))
        .unwrap_err();
        assert!(err.to_string().contains("paidAmount"));
    }

    #[test]
    fn invoice_without_lines_fails_validation() {
        let req: CreateInvoiceRequest = serde_json::from_value(json!({
            "patientId": "P-1", "patientName": "Juan", "lines": [], "dueDate": "2026-01-31"
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn zero_quantity_line_fails_validation() {
        let req: CreateInvoiceRequest = serde_json::from_value(json!({
            "patientId": "P-1", "patientName": "Juan", "dueDate": "2026-01-31",
            "lines": [{"description": "CBC", "category": "Laboratory", "quantity": 0, "unitPrice": 500}]
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn user_update_needs_a_field_and_a_valid_password() {
        assert!(UpdateUserRequest::default().into_update().is_err());

        let req: UpdateUserRequest = serde_json::from_value(json!({"role": " Cashier "})).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.into_update().unwrap().role, Some(Role::CASHIER));

        let req: UpdateUserRequest = serde_json::from_value(json!({"password": "short"})).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn list_query_parses_lenient_status_and_rejects_inverted_range() {
        let q = InvoiceListQuery {
            status: Some("partially paid".into()),
            ..Default::default()
        };
        assert_eq!(
            q.into_filter().unwrap().status,
            Some(InvoiceStatus::PartiallyPaid)
        );

        let q = InvoiceListQuery {
            from: NaiveDate::from_ymd_opt(2026, 3, 1),
            to: NaiveDate::from_ymd_opt(2026, 2, 1),
            ..Default::default()
        };
        assert!(q.into_filter().is_err());
    }
}
