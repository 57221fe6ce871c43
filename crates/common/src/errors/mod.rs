//! Error types for StudySpark services
//!
//! Provides a single error enum shared by every pipeline component with:
//! - Distinct variants for the failure taxonomy (transient provider,
//!   permanent input, parse failure, transport)
//! - Machine-readable error codes
//! - Retry classification used by the retry wrapper

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,

    // Resource errors (4xxx)
    RecordNotFound,
    BlobNotFound,
    MissingFileHandle,

    // External service errors (8xxx)
    ModelError,
    ModelRateLimited,
    ModelUnavailable,
    InvalidModelOutput,
    StorageError,
    UploadFailed,
    TriggerTimeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,

            ErrorCode::RecordNotFound => 4002,
            ErrorCode::BlobNotFound => 4003,
            ErrorCode::MissingFileHandle => 4004,

            ErrorCode::ModelError => 8001,
            ErrorCode::ModelRateLimited => 8002,
            ErrorCode::ModelUnavailable => 8003,
            ErrorCode::InvalidModelOutput => 8004,
            ErrorCode::StorageError => 8005,
            ErrorCode::UploadFailed => 8006,
            ErrorCode::TriggerTimeout => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // Resource errors
    #[error("Processing record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Blob not found: {name}")]
    BlobNotFound { name: String },

    #[error("Document {document_id} has no model file handle, re-upload required")]
    MissingFileHandle { document_id: String },

    // External service errors
    #[error("Model error{}: {message}", .status.map(|s| format!(" {}", s)).unwrap_or_default())]
    Model { status: Option<u16>, message: String },

    #[error("Model returned invalid output: {message}")]
    InvalidModelOutput { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Upload failed: {message}")]
    Upload { message: String },

    #[error("Trigger exceeded its {timeout_secs}s budget")]
    TriggerTimeout { timeout_secs: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Message signatures the model provider uses for rate limiting and
/// transient unavailability.
fn transient_signature() -> &'static Regex {
    static SIGNATURE: OnceLock<Regex> = OnceLock::new();
    SIGNATURE.get_or_init(|| {
        Regex::new(r"(?i)\b429\b|\b503\b|resource exhausted|resource_exhausted|too many requests|unavailable")
            .expect("transient signature regex is valid")
    })
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            AppError::BlobNotFound { .. } => ErrorCode::BlobNotFound,
            AppError::MissingFileHandle { .. } => ErrorCode::MissingFileHandle,
            AppError::Model { status: Some(429), .. } => ErrorCode::ModelRateLimited,
            AppError::Model { status: Some(503), .. } => ErrorCode::ModelUnavailable,
            AppError::Model { .. } => ErrorCode::ModelError,
            AppError::InvalidModelOutput { .. } => ErrorCode::InvalidModelOutput,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::Upload { .. } => ErrorCode::UploadFailed,
            AppError::TriggerTimeout { .. } => ErrorCode::TriggerTimeout,
            AppError::HttpClient(_) => ErrorCode::ModelError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the retry wrapper should re-invoke the failed call.
    ///
    /// Only rate-limit and transient-unavailable failures from the model
    /// provider qualify. Parse failures, missing handles and every other
    /// permanent error propagate on first occurrence.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Model { status: Some(429 | 503), .. } => true,
            AppError::Model { message, .. } => transient_signature().is_match(message),
            AppError::HttpClient(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || matches!(e.status().map(|s| s.as_u16()), Some(429 | 503))
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
