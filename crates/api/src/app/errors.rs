use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::error;

use loanportal_core::FieldErrors;
use loanportal_infra::ServiceError;

/// Error half of the response envelope.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        Self(ServiceError::Validation(errors))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.0 {
            ServiceError::Validation(errors) => {
                let errors = serde_json::to_value(&errors).unwrap_or(Value::Null);
                json_error(status, "The given data was invalid.", Some(errors))
            }
            ServiceError::Internal(detail) => {
                error!(%detail, "request failed");
                json_error(status, "Server Error", None)
            }
            ServiceError::Unauthenticated(message)
            | ServiceError::Forbidden(message)
            | ServiceError::NotFound(message)
            | ServiceError::Conflict(message) => json_error(status, message, None),
        }
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>, errors: Option<Value>) -> Response {
    let mut body = json!({
        "success": false,
        "message": message.into(),
    });
    if let Some(errors) = errors {
        body["errors"] = errors;
    }
    (status, axum::Json(body)).into_response()
}
