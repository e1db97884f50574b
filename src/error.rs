use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External error: {0}")]
    External(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Failures that a later attempt may not repeat (startup checks retry these)
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Connectivity(_) | AppError::External(_))
    }

    /// Operator hint attached to permission failures in the logs
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            AppError::Permission(_) => Some(
                "check that the API token is valid and that the bot account has the \
                 required role or power level in the target room",
            ),
            AppError::NotFound(_) => Some("check the group and room identifiers in SYNC_MAPPINGS"),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            AppError::Connectivity(format!("HTTP request failed: {}", error))
        } else if error.is_decode() {
            AppError::External(format!("Unexpected response body: {}", error))
        } else {
            AppError::External(format!("HTTP request error: {}", error))
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::External(format!("JSON error: {}", error))
    }
}

/// Classify a non-success HTTP status from a collaborator API
pub fn status_error(status: reqwest::StatusCode, context: &str, body: &str) -> AppError {
    let detail = format!("{} returned {}: {}", context, status, body.trim());
    match status.as_u16() {
        401 | 403 => AppError::Permission(detail),
        404 => AppError::NotFound(detail),
        408 | 502 | 503 | 504 => AppError::Connectivity(detail),
        _ => AppError::External(detail),
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
