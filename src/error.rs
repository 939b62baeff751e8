use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid authentication")]
    InvalidAuthentication,

    #[error("missing study: unable to resolve any positive study reference in the query")]
    MissingStudy,

    #[error("storage resolution failed: {0}")]
    StorageResolution(String),

    #[error("unknown storage engine: {0}")]
    UnknownEngine(String),

    #[error("permission denied: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("iterator exhausted: {0}")]
    Exhausted(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
}

impl Error {
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidAuthentication => "InvalidAuthentication",
            Error::MissingStudy => "MissingStudy",
            Error::StorageResolution(_) => "StorageResolution",
            Error::UnknownEngine(_) => "UnknownEngine",
            Error::Authorization(_) => "Authorization",
            Error::NotFound(_) => "NotFound",
            Error::InvalidQuery(_) => "InvalidQuery",
            Error::InvalidInput(_) => "InvalidInput",
            Error::UnsupportedFormat(_) => "UnsupportedFormat",
            Error::UnsupportedOperation(_) => "UnsupportedOperation",
            Error::Exhausted(_) => "Exhausted",
            Error::Timeout(_) => "Timeout",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "InternalError",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidAuthentication => StatusCode::UNAUTHORIZED,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MissingStudy
            | Error::InvalidQuery(_)
            | Error::InvalidInput(_)
            | Error::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedOperation(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::StorageResolution(_)
            | Error::UnknownEngine(_)
            | Error::Exhausted(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = ErrorResponse {
            error: ErrorBody {
                error_type: self.error_type(),
                message: self.to_string(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}
