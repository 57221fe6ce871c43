//! Gemini REST client.

use super::{FileHandle, GenerativeModel, PDF_MIME_TYPE};
use crate::config::ModelConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::prompts::Prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Uploaded files are usable once the provider marks them ACTIVE.
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const FILE_POLL_LIMIT: u32 = 30;

/// Gemini generative model client
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct FileData<'a> {
    mime_type: &'static str,
    file_uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: &ModelConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    /// Turn a non-2xx response into `AppError::Model`, keeping the status
    /// code so the retry wrapper can classify it.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) if !envelope.error.status.is_empty() => {
                format!("{} ({})", envelope.error.message, envelope.error.status)
            }
            Ok(envelope) => envelope.error.message,
            Err(_) => format!("{}: {}", status, body),
        };

        Err(AppError::Model {
            status: Some(status.as_u16()),
            message,
        })
    }

    async fn wait_until_active(&self, file: RemoteFile) -> Result<RemoteFile> {
        poll_until_active(file, FILE_POLL_LIMIT, FILE_POLL_INTERVAL, |name| {
            self.fetch_file(name)
        })
        .await
    }

    async fn fetch_file(&self, name: String) -> Result<RemoteFile> {
        let url = format!("{}/v1beta/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<FileHandle> {
        let url = format!("{}/upload/v1beta/files?uploadType=media", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        let uploaded: UploadResponse = Self::check(response).await?.json().await?;
        let file = self.wait_until_active(uploaded.file).await?;

        Ok(FileHandle::new(file.uri))
    }

    async fn generate_content(&self, handle: &FileHandle, prompt: &Prompt) -> Result<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::File {
                        file_data: FileData {
                            mime_type: PDF_MIME_TYPE,
                            file_uri: handle.as_str(),
                        },
                    },
                    Part::Text { text: prompt.text },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await?;

        let result: GenerateResponse = Self::check(response).await?.json().await?;
        let candidate = result.candidates.into_iter().next().ok_or_else(|| {
            AppError::InvalidModelOutput {
                message: "Model returned no candidates".to_string(),
            }
        })?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AppError::InvalidModelOutput {
                message: format!(
                    "Model returned an empty response (finish reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            });
        }

        Ok(text)
    }
}

/// `Ok(true)` once the file can be used, `Ok(false)` while it is still
/// being processed.
fn is_active(file: &RemoteFile) -> Result<bool> {
    match file.state.as_deref() {
        None | Some("ACTIVE") => Ok(true),
        Some("FAILED") => Err(AppError::Model {
            status: None,
            message: format!("Provider failed to process file {}", file.name),
        }),
        Some(_) => Ok(false),
    }
}

/// Re-fetch `file` until it is active, at most `limit` times.
async fn poll_until_active<F, Fut>(
    mut file: RemoteFile,
    limit: u32,
    interval: Duration,
    mut refresh: F,
) -> Result<RemoteFile>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<RemoteFile>>,
{
    for _ in 0..limit {
        if is_active(&file)? {
            return Ok(file);
        }
        debug!(file = %file.name, state = ?file.state, "Waiting for uploaded file to become active");
        tokio::time::sleep(interval).await;
        file = refresh(file.name.clone()).await?;
    }

    // The last refresh counts too.
    if is_active(&file)? {
        return Ok(file);
    }

    // Reported as unavailable so the whole upload is retried.
    Err(AppError::Model {
        status: Some(503),
        message: format!("File {} is still processing", file.name),
    })
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload_file(&self, bytes: &[u8], mime_type: &str) -> Result<FileHandle> {
        let start = Instant::now();
        let result = self.upload(bytes, mime_type).await;
        metrics::record_model_call(
            "upload_file",
            &self.model,
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        result
    }

    #[instrument(skip(self, handle, prompt), fields(prompt = %prompt.kind))]
    async fn generate(&self, handle: &FileHandle, prompt: &Prompt) -> Result<String> {
        let start = Instant::now();
        let result = self.generate_content(handle, prompt).await;
        metrics::record_model_call(
            "generate",
            &self.model,
            start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
