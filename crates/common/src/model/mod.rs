//! Generative model abstraction
//!
//! The pipeline treats the model as an opaque provider: upload a file once,
//! get a reusable handle back, then run any number of prompts against it.
//! Providers:
//! - Gemini (REST, `gemini-2.0-flash` by default)
//! - Mock (deterministic canned JSON for tests and local runs)

mod gemini;
mod mock;

pub use gemini::GeminiClient;
pub use mock::MockModel;

use crate::config::ModelConfig;
use crate::errors::{AppError, Result};
use crate::prompts::Prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// MIME type of every uploaded study document.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Opaque reference to content uploaded to the model provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHandle(String);

impl FileHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for generative model providers
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Register file content with the provider
    async fn upload_file(&self, bytes: &[u8], mime_type: &str) -> Result<FileHandle>;

    /// Run a prompt against previously uploaded content, returning the raw
    /// JSON text of the response
    async fn generate(&self, handle: &FileHandle, prompt: &Prompt) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a model client based on configuration
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn GenerativeModel>> {
    match config.provider.as_str() {
        "gemini" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AppError::Configuration {
                    message: "model.api_key is required for the gemini provider".to_string(),
                })?;
            Ok(Arc::new(GeminiClient::new(config, api_key)?))
        }
        "mock" => Ok(Arc::new(MockModel::new())),
        other => Err(AppError::Configuration {
            message: format!("Unknown model provider: {}", other),
        }),
    }
}
