//! Field-level merge patches for processing records.
//!
//! Every write to a record goes through a patch so that the ingestion and
//! enrichment triggers only ever touch the fields they own.

use super::{fields, Feature, Flashcard, ProcessingStatus, QuizQuestion, Summary, SummaryMode};
use crate::storage::Fields;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    fields: Fields,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn status(self, status: ProcessingStatus) -> Self {
        self.put(fields::STATUS, json!(status))
    }

    /// Mark the whole record failed with a human-readable message.
    pub fn failed(self, message: impl Into<String>) -> Self {
        self.status(ProcessingStatus::Error)
            .put(fields::ERROR, Value::String(message.into()))
    }

    pub fn original_file(self, name: &str) -> Self {
        self.put(fields::ORIGINAL_FILE, json!(name))
    }

    pub fn processed_at(self, at: DateTime<Utc>) -> Self {
        self.put(
            fields::PROCESSED_AT,
            json!(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        )
    }

    pub fn model_file_handle(self, handle: &str) -> Self {
        self.put(fields::MODEL_FILE_HANDLE, json!(handle))
    }

    pub fn summary_mode(self, mode: SummaryMode) -> Self {
        self.put(fields::SUMMARY_MODE, json!(mode))
    }

    pub fn summary(self, summary: &Summary) -> Self {
        self.put(fields::SUMMARY, json!(summary))
    }

    pub fn cheat_sheet_summary(self, summary: &Summary) -> Self {
        self.put(fields::CHEAT_SHEET_SUMMARY, json!(summary))
    }

    pub fn detailed_summary(self, summary: &Summary) -> Self {
        self.put(fields::DETAILED_SUMMARY, json!(summary))
            .put(fields::HAS_DETAILED_SUMMARY, Value::Bool(true))
    }

    pub fn flashcards(self, cards: &[Flashcard]) -> Self {
        self.put(fields::FLASHCARDS, json!(cards))
    }

    pub fn quiz(self, questions: &[QuizQuestion]) -> Self {
        self.put(fields::QUIZ, json!(questions))
    }

    pub fn request(self, feature: Feature, requested: bool) -> Self {
        self.put(feature.request_field(), Value::Bool(requested))
    }

    pub fn feature_error(self, feature: Feature, message: impl Into<String>) -> Self {
        self.put(feature.error_field(), Value::String(message.into()))
    }

    /// Write an explicit null so a stale error no longer shows.
    pub fn clear_feature_error(self, feature: Feature) -> Self {
        self.put(feature.error_field(), Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CheatSheet;

    #[test]
    fn test_patch_only_contains_written_fields() {
        let patch = RecordPatch::new()
            .status(ProcessingStatus::SummaryCompleted)
            .summary(&Summary::CheatSheet(CheatSheet {
                cheat_sheet: vec!["one".into()],
            }));

        let fields = patch.into_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["status"], json!("summary_completed"));
        assert_eq!(fields["summary"], json!({"cheat_sheet": ["one"]}));
    }

    #[test]
    fn test_failed_sets_status_and_message() {
        let fields = RecordPatch::new().failed("boom").into_fields();
        assert_eq!(fields["status"], json!("error"));
        assert_eq!(fields["error"], json!("boom"));
    }

    #[test]
    fn test_request_and_error_fields() {
        let fields = RecordPatch::new()
            .request(Feature::Quiz, false)
            .feature_error(Feature::Quiz, "bad quiz")
            .clear_feature_error(Feature::Flashcards)
            .into_fields();

        assert_eq!(fields["requestQuiz"], json!(false));
        assert_eq!(fields["quizError"], json!("bad quiz"));
        assert_eq!(fields["flashcardsError"], Value::Null);
    }

    #[test]
    fn test_summary_mode_serialization() {
        let fields = RecordPatch::new()
            .summary_mode(SummaryMode::CheatSheet)
            .into_fields();
        assert_eq!(fields["summaryMode"], json!("cheat-sheet"));
    }
}
