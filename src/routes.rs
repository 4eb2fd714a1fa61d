mod auth;
mod subscription;
mod testcase;
mod users;

pub use auth::*;
pub use subscription::*;
pub use testcase::*;
pub use users::*;

use actix_web::error::{InternalError, JsonPayloadError, QueryPayloadError};
use actix_web::{HttpRequest, ResponseError};
use serde::Serialize;

use crate::error::ApiError;

/// Envelope of every successful `/api` response.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            data,
            message: message.into(),
            success: true,
        }
    }
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("Rejected JSON payload: {err}");
    let response = ApiError::invalid(format!("Invalid request body: {err}")).error_response();
    InternalError::from_response(err, response).into()
}

pub fn query_error_handler(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = ApiError::invalid(format!("Invalid query string: {err}")).error_response();
    InternalError::from_response(err, response).into()
}

/// Returns the field when it holds something other than whitespace.
pub(crate) fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.trim().is_empty())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(&None), None);
        assert_eq!(non_blank(&Some("  \n".to_string())), None);
        // The value is returned untouched, passwords may carry spaces
        assert_eq!(non_blank(&Some(" pw ".to_string())), Some(" pw "));
    }

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::new(1, "ok")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"statusCode": 200, "data": 1, "message": "ok", "success": true})
        );
    }
}
