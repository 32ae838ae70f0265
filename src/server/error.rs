use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::error::HubError;

const LOG_TARGET: &str = "server::error";

/// HTTP-facing wrapper around the closed [`HubError`] taxonomy. Business
/// errors pass through with their stable code; internal errors are
/// logged with a correlation id and surfaced opaquely.
#[derive(Debug)]
pub struct ApiError(pub HubError);

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = match &err {
            HubError::Internal(message) => {
                let correlation_id = Uuid::new_v4().to_string();
                error!(
                    target = LOG_TARGET,
                    %correlation_id,
                    %message,
                    "internal server error"
                );
                json!({
                    "error": {
                        "code": err.code(),
                        "message": "internal error",
                        "details": { "correlationId": correlation_id },
                    }
                })
            }
            HubError::Validation { message, fields } if !fields.is_empty() => json!({
                "error": {
                    "code": err.code(),
                    "message": message,
                    "details": fields,
                }
            }),
            HubError::InsufficientFunds {
                required,
                available,
            } => json!({
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                    "details": {
                        "required": required.to_string(),
                        "available": available.to_string(),
                    },
                }
            }),
            other => json!({
                "error": {
                    "code": other.code(),
                    "message": other.to_string(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}
