//! StudySpark Common Library
//!
//! Shared code for the StudySpark pipeline components including:
//! - Processing record model and field-level patches
//! - Prompt templates and model output parsing
//! - Generative model client abstraction
//! - Backoff-retry wrapper for model calls
//! - Blob and document store contracts
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod prompts;
pub mod record;
pub mod retry;
pub mod storage;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use model::{FileHandle, GenerativeModel};
pub use record::{Feature, ProcessingRecord, ProcessingStatus, RecordPatch, SummaryMode};
pub use retry::RetryPolicy;
pub use storage::{BlobStore, DocumentStore, Fields};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
