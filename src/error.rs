use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to HTTP clients.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A third-party service (mail, OAuth provider, payment gateway) failed
    #[error("{0}")]
    External(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    success: bool,
    code: u16,
    reason: &'static str,
    message: &'a str,
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "ERR_INVALID_ARGUMENT",
            Self::Unauthorized(_) => "ERR_UNAUTHORIZED",
            Self::Forbidden(_) => "ERR_FORBIDDEN",
            Self::NotFound(_) => "ERR_NOT_FOUND",
            Self::External(_) | Self::Database(_) => "ERR_EXTERNAL",
            Self::Internal(_) => "ERR_INTERNAL",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::External(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Details of server-side failures stay in the log
        let message = match self {
            Self::Database(e) => {
                log::error!("Database failure: {e}");
                "Internal server error".to_string()
            }
            Self::Internal(e) => {
                log::error!("Internal failure: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(status).json(ErrorResponse {
            success: false,
            code: status.as_u16(),
            reason: self.reason(),
            message: &message,
        })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
