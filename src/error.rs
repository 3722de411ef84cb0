use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::inference::bridge::PredictorError;

// Taken from https://github.com/tokio-rs/axum/blob/main/examples/anyhow-error-response/src/main.rs
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: ErrorEnvelope,
}

/// Body of every failed API response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ErrorEnvelope {
    pub fn with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        ErrorEnvelope {
            success: false,
            message: message.into(),
            error: Some(detail.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ErrorEnvelope {
    fn from(message: String) -> Self {
        ErrorEnvelope {
            success: false,
            message,
            error: None,
        }
    }
}

impl From<&str> for ErrorEnvelope {
    fn from(message: &str) -> Self {
        ErrorEnvelope::from(message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut res = Json(self.message).into_response();
        *res.status_mut() = self.status;
        res
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        match err.downcast_ref::<PredictorError>() {
            Some(predictor_err) => ApiError {
                status: predictor_err.status(),
                message: ErrorEnvelope::with_detail(
                    "Failed to make prediction",
                    predictor_err.to_string(),
                ),
            },
            None => {
                error!("Request failed: {:#}", err);
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: ErrorEnvelope::from("Server error"),
                }
            }
        }
    }
}

pub type ApiResult<T, E = ApiError> = Result<T, E>;

#[macro_export]
macro_rules! bail_api {
    ($error_message:expr) => {
        return Err($crate::error::ApiError {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            message: $crate::error::ErrorEnvelope::from($error_message),
        })
    };
    ($status_code:expr, $error_message:expr) => {
        return Err($crate::error::ApiError {
            status: $status_code,
            message: $crate::error::ErrorEnvelope::from($error_message),
        })
    };
    ($status:expr, $fmt:expr $(, $arg:expr)*) => {
        return Err($crate::error::ApiError {
            status: $status,
            message: $crate::error::ErrorEnvelope::from(format!($fmt $(, $arg)*)),
        })
    };
}
