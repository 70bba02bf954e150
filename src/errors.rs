use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("LOAD_FAILED: {0}")]
    Load(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("STORE_WRITE: {0}")]
    StoreWrite(String),
    #[error("UNAUTHORIZED: {0}")]
    Unauthorized(String),
    #[error("FORBIDDEN: {0}")]
    Forbidden(String),
    #[error("INVALID_REQUEST: {0}")]
    Validation(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Load(_)
            | Self::StoreWrite(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message without the code prefix, as shown to HTTP callers.
    pub fn message(&self) -> &str {
        match self {
            Self::Load(message)
            | Self::NotFound(message)
            | Self::StoreWrite(message)
            | Self::Unauthorized(message)
            | Self::Forbidden(message)
            | Self::Validation(message)
            | Self::Config(message)
            | Self::Io(message)
            | Self::Internal(message) => message,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message() });
        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
