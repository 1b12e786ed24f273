//! Request bodies, query strings and the success envelope.

use std::str::FromStr;

use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use loanportal_core::FieldErrors;
use loanportal_infra::ServiceError;
use loanportal_infra::services::{
    Credentials, ListParams, LoanSubmission, NewPermission, NewRole, NewUser, PasswordChange,
    PermissionUpdate, ProfileUpdate, Registration, RoleUpdate, StatusDecision, UserUpdate,
};

use super::errors::{ApiError, ApiResult};

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EnvelopeBody<'a, T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    data: T,
}

/// Success half of the response envelope.
pub struct Envelope<T> {
    status: StatusCode,
    message: Option<&'static str>,
    data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            message: None,
            data,
        }
    }

    pub fn created(message: &'static str, data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            message: Some(message),
            data,
        }
    }

    pub fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl Envelope<Value> {
    /// `data: null` with a message, for operations that return nothing.
    pub fn done(message: &'static str) -> Self {
        Self::ok(Value::Null).with_message(message)
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let body = EnvelopeBody {
            success: true,
            message: self.message,
            data: self.data,
        };
        (self.status, axum::Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON body whose rejections use the error envelope (422).
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(FieldErrors::single("body", rejection.body_text()).into()),
        }
    }
}

/// Parses a path id; anything that does not parse is reported as missing.
pub fn path_id<T: FromStr>(raw: &str, what: &str) -> ApiResult<T> {
    raw.parse()
        .map_err(|_| ApiError(ServiceError::not_found(what)))
}

/// `?page=&per_page=&search=`; unparsable numbers fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub search: Option<String>,
}

impl From<ListQuery> for ListParams {
    fn from(query: ListQuery) -> Self {
        let number = |raw: Option<String>| raw.and_then(|v| v.trim().parse().ok());
        Self {
            page: number(query.page),
            per_page: number(query.per_page),
            search: query
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Text form of a JSON scalar so numbers and numeric strings validate alike.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn reference_list(values: Option<Vec<Value>>) -> Option<Vec<String>> {
    values.map(|values| {
        values
            .into_iter()
            .map(|v| scalar_text(v).unwrap_or_default())
            .collect()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl From<RegisterRequest> for Registration {
    fn from(req: RegisterRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            password: req.password,
            password_confirmation: req.password_confirmation,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl From<LoginRequest> for Credentials {
    fn from(req: LoginRequest) -> Self {
        Self {
            email: req.email,
            password: req.password,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl From<ProfileRequest> for ProfileUpdate {
    fn from(req: ProfileRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl From<ChangePasswordRequest> for PasswordChange {
    fn from(req: ChangePasswordRequest) -> Self {
        Self {
            current_password: req.current_password,
            password: req.password,
            password_confirmation: req.password_confirmation,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loans
// ─────────────────────────────────────────────────────────────────────────────

/// Amount and tenure may arrive as JSON numbers or strings. Any `status`
/// field in the body is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ApplyLoanRequest {
    pub amount: Option<Value>,
    pub tenure: Option<Value>,
    pub purpose: Option<String>,
}

impl From<ApplyLoanRequest> for LoanSubmission {
    fn from(req: ApplyLoanRequest) -> Self {
        Self {
            amount: req.amount.and_then(scalar_text),
            tenure: req.tenure.and_then(scalar_text),
            purpose: req.purpose,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
    pub admin_comment: Option<String>,
}

impl From<UpdateStatusRequest> for StatusDecision {
    fn from(req: UpdateStatusRequest) -> Self {
        Self {
            status: req.status,
            admin_comment: req.admin_comment,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory management
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct UserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role_id: Option<Value>,
}

impl From<UserRequest> for NewUser {
    fn from(req: UserRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            password: req.password,
            role_id: req.role_id.and_then(scalar_text),
        }
    }
}

impl From<UserRequest> for UserUpdate {
    fn from(req: UserRequest) -> Self {
        Self {
            name: req.name,
            email: req.email,
            password: req.password,
            role_id: req.role_id.and_then(scalar_text),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: Option<Value>,
}

/// Permission references are ids or names.
#[derive(Debug, Default, Deserialize)]
pub struct AssignPermissionsRequest {
    pub permissions: Option<Vec<Value>>,
}

impl AssignPermissionsRequest {
    pub fn references(self) -> Option<Vec<String>> {
        reference_list(self.permissions)
    }
}

impl AssignRoleRequest {
    pub fn role_id(self) -> Option<String> {
        self.role_id.and_then(scalar_text)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleRequest {
    pub name: Option<String>,
    pub permissions: Option<Vec<Value>>,
}

impl From<RoleRequest> for NewRole {
    fn from(req: RoleRequest) -> Self {
        Self {
            name: req.name,
            permissions: reference_list(req.permissions),
        }
    }
}

impl From<RoleRequest> for RoleUpdate {
    fn from(req: RoleRequest) -> Self {
        Self {
            name: req.name,
            permissions: reference_list(req.permissions),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PermissionRequest {
    pub name: Option<String>,
    pub guard_name: Option<String>,
}

impl From<PermissionRequest> for NewPermission {
    fn from(req: PermissionRequest) -> Self {
        Self {
            name: req.name,
            guard_name: req.guard_name,
        }
    }
}

impl From<PermissionRequest> for PermissionUpdate {
    fn from(req: PermissionRequest) -> Self {
        Self {
            name: req.name,
            guard_name: req.guard_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loanportal_core::LoanId;
    use serde_json::json;

    #[test]
    fn numeric_and_string_amounts_submit_the_same_text() {
        let from_number: ApplyLoanRequest =
            serde_json::from_value(json!({"amount": 50000, "tenure": 24, "purpose": "Roof"})).unwrap();
        let from_string: ApplyLoanRequest =
            serde_json::from_value(json!({"amount": "50000", "tenure": "24", "purpose": "Roof"})).unwrap();
        assert_eq!(LoanSubmission::from(from_number), LoanSubmission::from(from_string));
    }

    #[test]
    fn status_in_application_body_is_ignored() {
        let req: ApplyLoanRequest = serde_json::from_value(json!({
            "amount": 100, "tenure": 1, "purpose": "x", "status": "APPROVED"
        }))
        .unwrap();
        assert_eq!(LoanSubmission::from(req).amount.as_deref(), Some("100"));
    }

    #[test]
    fn list_query_tolerates_garbage() {
        let params = ListParams::from(ListQuery {
            page: Some("two".into()),
            per_page: Some(" 5 ".into()),
            search: Some("   ".into()),
        });
        assert_eq!(params.page, None);
        assert_eq!(params.per_page, Some(5));
        assert_eq!(params.search, None);
    }

    #[test]
    fn malformed_path_ids_are_not_found() {
        let err = path_id::<LoanId>("not-a-uuid", "Loan").unwrap_err();
        assert_eq!(err.0, ServiceError::NotFound("Loan not found".into()));
    }

    #[test]
    fn null_permission_references_become_unresolvable() {
        let req: AssignPermissionsRequest =
            serde_json::from_value(json!({"permissions": ["loan.view", null, 7]})).unwrap();
        assert_eq!(
            req.references(),
            Some(vec!["loan.view".to_string(), String::new(), "7".to_string()])
        );
    }
}
