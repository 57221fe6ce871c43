//! Processing record model
//!
//! One record per uploaded document, keyed by the document id derived from
//! the blob name. The record lives in the document store as a flat field
//! map; this module gives it a typed view and a field-level patch builder.

mod patch;
mod summary;

pub use patch::RecordPatch;
pub use summary::{
    grade_quiz, CheatSheet, CommonMistake, Definition, DetailedSummary, ExamFocus, Flashcard,
    ImportantQuestion, MustRevise, QuizQuestion, QuizScore, Summary,
};

use crate::errors::{AppError, Result};
use crate::storage::Fields;
use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Field names as stored in the document store.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const ERROR: &str = "error";
    pub const ORIGINAL_FILE: &str = "originalFile";
    pub const PROCESSED_AT: &str = "processedAt";
    pub const MODEL_FILE_HANDLE: &str = "modelFileHandle";
    pub const SUMMARY_MODE: &str = "summaryMode";
    pub const SUMMARY: &str = "summary";
    pub const CHEAT_SHEET_SUMMARY: &str = "cheatSheetSummary";
    pub const DETAILED_SUMMARY: &str = "detailedSummary";
    pub const HAS_DETAILED_SUMMARY: &str = "hasDetailedSummary";
    pub const FLASHCARDS: &str = "flashcards";
    pub const QUIZ: &str = "quiz";
    pub const REQUEST_DETAILED_SUMMARY: &str = "requestDetailedSummary";
    pub const REQUEST_FLASHCARDS: &str = "requestFlashcards";
    pub const REQUEST_QUIZ: &str = "requestQuiz";
    pub const SUMMARY_ERROR: &str = "summaryError";
    pub const FLASHCARDS_ERROR: &str = "flashcardsError";
    pub const QUIZ_ERROR: &str = "quizError";
}

/// Blob metadata key carrying the requested summary mode.
pub const SUMMARY_MODE_METADATA_KEY: &str = "summaryMode";

/// Record status. Moves forward only, except for the sticky terminal `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    SummaryCompleted,
    Error,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::SummaryCompleted | ProcessingStatus::Error)
    }
}

/// Which initial summary variant runs for a document.
///
/// Deserializes leniently: unknown spellings read as `Detailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SummaryMode {
    #[serde(rename = "cheat-sheet")]
    CheatSheet,
    #[default]
    #[serde(rename = "detailed")]
    Detailed,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryMode::CheatSheet => "cheat-sheet",
            SummaryMode::Detailed => "detailed",
        }
    }

    /// Read the mode from upload metadata. Absent or unrecognised values
    /// fall back to `Detailed`.
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("cheat-sheet") | Some("cheat_sheet") | Some("cheatsheet") => SummaryMode::CheatSheet,
            _ => SummaryMode::Detailed,
        }
    }
}

impl<'de> Deserialize<'de> for SummaryMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(SummaryMode::from_metadata(value.as_ref().and_then(|v| v.as_str())))
    }
}

impl fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An artifact that can be requested after the initial summary exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    DetailedSummary,
    Flashcards,
    Quiz,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::DetailedSummary, Feature::Flashcards, Feature::Quiz];

    /// Edge-triggered request flag.
    pub fn request_field(&self) -> &'static str {
        match self {
            Feature::DetailedSummary => fields::REQUEST_DETAILED_SUMMARY,
            Feature::Flashcards => fields::REQUEST_FLASHCARDS,
            Feature::Quiz => fields::REQUEST_QUIZ,
        }
    }

    pub fn data_field(&self) -> &'static str {
        match self {
            Feature::DetailedSummary => fields::DETAILED_SUMMARY,
            Feature::Flashcards => fields::FLASHCARDS,
            Feature::Quiz => fields::QUIZ,
        }
    }

    pub fn error_field(&self) -> &'static str {
        match self {
            Feature::DetailedSummary => fields::SUMMARY_ERROR,
            Feature::Flashcards => fields::FLASHCARDS_ERROR,
            Feature::Quiz => fields::QUIZ_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::DetailedSummary => "detailed_summary",
            Feature::Flashcards => "flashcards",
            Feature::Quiz => "quiz",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a processing record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub status: Option<ProcessingStatus>,
    pub error: Option<String>,
    pub original_file: Option<String>,
    pub processed_at: Option<String>,
    pub model_file_handle: Option<String>,
    pub summary_mode: Option<SummaryMode>,
    pub summary: Option<Summary>,
    pub cheat_sheet_summary: Option<Summary>,
    pub detailed_summary: Option<Summary>,
    pub has_detailed_summary: Option<bool>,
    pub flashcards: Option<Vec<Flashcard>>,
    pub quiz: Option<Vec<QuizQuestion>>,
    pub request_detailed_summary: Option<bool>,
    pub request_flashcards: Option<bool>,
    pub request_quiz: Option<bool>,
    pub summary_error: Option<String>,
    pub flashcards_error: Option<String>,
    pub quiz_error: Option<String>,
}

impl ProcessingRecord {
    /// Parse a document-store snapshot.
    pub fn from_fields(fields: &Fields) -> Result<Self> {
        serde_json::from_value(serde_json::Value::Object(fields.clone())).map_err(|e| {
            AppError::Validation {
                message: format!("Malformed processing record: {}", e),
            }
        })
    }

    /// The model handle, treating an empty string as missing.
    pub fn file_handle(&self) -> Option<&str> {
        self.model_file_handle.as_deref().filter(|h| !h.trim().is_empty())
    }

    /// Whether the artifact for `feature` has been generated.
    pub fn has_artifact(&self, feature: Feature) -> bool {
        match feature {
            Feature::DetailedSummary => {
                self.has_detailed_summary == Some(true) || self.detailed_summary.is_some()
            }
            Feature::Flashcards => self.flashcards.is_some(),
            Feature::Quiz => self.quiz.is_some(),
        }
    }

    pub fn feature_error(&self, feature: Feature) -> Option<&str> {
        match feature {
            Feature::DetailedSummary => self.summary_error.as_deref(),
            Feature::Flashcards => self.flashcards_error.as_deref(),
            Feature::Quiz => self.quiz_error.as_deref(),
        }
    }
}

/// Derive the document id from a blob name by stripping its final extension.
///
/// `notes/lecture.v2.pdf` becomes `notes/lecture.v2`; names without an
/// extension are returned unchanged.
pub fn document_id(object_name: &str) -> String {
    static EXTENSION: OnceLock<Regex> = OnceLock::new();
    let extension = EXTENSION.get_or_init(|| {
        Regex::new(r"\.[^/.]+$").expect("extension regex is valid")
    });
    extension.replace(object_name, "").into_owned()
}

/// Whether a blob name refers to a PDF document.
pub fn is_pdf(object_name: &str) -> bool {
    object_name.to_ascii_lowercase().ends_with(".pdf")
}
