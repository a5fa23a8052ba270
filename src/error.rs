use axum::http::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Error taxonomy shared by the store, the indexes, the query layer and the
/// coordinator. `Transient` is the only retryable class.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl GraphError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GraphError::Transient(_))
    }

    /// Short machine-readable code used in wire `error` messages.
    pub fn wire_code(&self) -> &'static str {
        match self {
            GraphError::Validation(_) => "validation",
            GraphError::NotFound(_) => "not_found",
            GraphError::Conflict(_) => "conflict",
            GraphError::Unauthorized => "unauthorized",
            GraphError::Forbidden => "forbidden",
            GraphError::Transient(_) => "transient",
            GraphError::Fatal(_) => "fatal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GraphError::Validation(_) => StatusCode::BAD_REQUEST,
            GraphError::NotFound(_) => StatusCode::NOT_FOUND,
            GraphError::Conflict(_) => StatusCode::CONFLICT,
            GraphError::Unauthorized => StatusCode::UNAUTHORIZED,
            GraphError::Forbidden => StatusCode::FORBIDDEN,
            GraphError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            GraphError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert into the `(status, body)` pair axum handlers return.
    pub fn into_response_parts(self) -> (StatusCode, String) {
        (self.status_code(), self.to_string())
    }
}

// Storage-engine errors are retryable from the caller's point of view; the
// write itself has already been rolled back.
impl From<rusqlite::Error> for GraphError {
    fn from(e: rusqlite::Error) -> Self {
        GraphError::Transient(format!("storage: {e}"))
    }
}

impl From<std::io::Error> for GraphError {
    fn from(e: std::io::Error) -> Self {
        GraphError::Transient(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Validation(format!("json: {e}"))
    }
}

impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        GraphError::Transient(format!("http: {e}"))
    }
}
