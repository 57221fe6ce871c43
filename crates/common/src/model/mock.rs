//! Mock model for testing and local runs.

use super::{FileHandle, GenerativeModel};
use crate::errors::Result;
use crate::prompts::{Prompt, PromptKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type UploadFn = dyn Fn(usize) -> Result<FileHandle> + Send + Sync;
type GenerateFn = dyn Fn(PromptKind, usize) -> Result<Option<String>> + Send + Sync;

/// Deterministic model that answers every prompt with canned JSON.
///
/// Behaviour can be overridden per call: the upload hook receives the
/// upload index, the generate hook the prompt kind and how many times that
/// kind was requested before. Returning `Ok(None)` from the generate hook
/// falls back to the canned response.
#[derive(Default)]
pub struct MockModel {
    uploads: AtomicUsize,
    generations: Mutex<HashMap<PromptKind, usize>>,
    latency: Option<Duration>,
    on_upload: Option<Box<UploadFn>>,
    on_generate: Option<Box<GenerateFn>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upload<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) -> Result<FileHandle> + Send + Sync + 'static,
    {
        self.on_upload = Some(Box::new(f));
        self
    }

    pub fn with_generate<F>(mut self, f: F) -> Self
    where
        F: Fn(PromptKind, usize) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.on_generate = Some(Box::new(f));
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Total generate calls across all prompt kinds.
    pub fn generations(&self) -> usize {
        self.lock_generations().values().sum()
    }

    pub fn generations_for(&self, kind: PromptKind) -> usize {
        self.lock_generations().get(&kind).copied().unwrap_or(0)
    }

    fn lock_generations(&self) -> std::sync::MutexGuard<'_, HashMap<PromptKind, usize>> {
        // A poisoned counter map is still a valid count.
        self.generations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Canned, well-formed response for a prompt kind.
    pub fn canned_response(kind: PromptKind) -> String {
        let value = match kind {
            PromptKind::CheatSheet => serde_json::json!({
                "cheat_sheet": [
                    "Newton's second law: F = ma",
                    "Momentum p = mv is conserved in closed systems",
                    "Kinetic energy: KE = 1/2 mv^2"
                ]
            }),
            PromptKind::DetailedSummary => serde_json::json!({
                "definitions": [{"term": "Momentum", "definition": "Product of mass and velocity."}],
                "must_revise": [{"concept": "Conservation laws", "reason": "Appear in every paper."}],
                "important_questions": [{"question": "State Newton's second law.", "importance": "Core definition."}],
                "exam_focus": [{"topic": "Collisions", "strategy": "Write momentum before and after."}],
                "common_mistakes": [{"point": "Mixing up mass and weight", "correction": "Weight is mg, measured in newtons."}]
            }),
            PromptKind::Flashcards => serde_json::json!({
                "flashcards": [
                    {"front": "Momentum", "back": "Mass times velocity"},
                    {"front": "Newton's second law", "back": "Force equals mass times acceleration"}
                ]
            }),
            PromptKind::Quiz => serde_json::json!({
                "quiz": [{
                    "question": "What is the SI unit of force?",
                    "options": ["Joule", "Newton", "Watt", "Pascal"],
                    "answer": "Newton",
                    "explanation": "One newton accelerates 1 kg at 1 m/s^2."
                }]
            }),
        };
        value.to_string()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl GenerativeModel for MockModel {
    async fn upload_file(&self, bytes: &[u8], _mime_type: &str) -> Result<FileHandle> {
        self.simulate_latency().await;
        let index = self.uploads.fetch_add(1, Ordering::SeqCst);

        match &self.on_upload {
            Some(hook) => hook(index),
            None => Ok(FileHandle::new(format!(
                "mock://files/{}-{}",
                index,
                bytes.len()
            ))),
        }
    }

    async fn generate(&self, _handle: &FileHandle, prompt: &Prompt) -> Result<String> {
        self.simulate_latency().await;
        let index = {
            let mut generations = self.lock_generations();
            let count = generations.entry(prompt.kind).or_insert(0);
            *count += 1;
            *count - 1
        };

        if let Some(hook) = &self.on_generate {
            if let Some(response) = hook(prompt.kind, index)? {
                return Ok(response);
            }
        }
        Ok(Self::canned_response(prompt.kind))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
