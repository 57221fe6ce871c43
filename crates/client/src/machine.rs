//! Upload session state machine
//!
//! `idle -> uploading -> (error | success) -> analyzing -> (error | complete)`
//!
//! The machine is pure: the async driver feeds it upload progress and
//! record snapshots. Every session-scoped input carries the generation it
//! was started with; inputs from an older generation are ignored, which is
//! what makes a reset to idle safe while a driver is still winding down.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use studyspark_common::{
    errors::{AppError, Result},
    record::{
        document_id, grade_quiz, Feature, ProcessingRecord, ProcessingStatus, QuizScore,
        SummaryMode,
    },
};

/// Shown when the upload transport fails; the detail goes to the log.
pub const UPLOAD_FAILED_MESSAGE: &str = "Upload failed. Please check your connection and try again.";

/// Shown when the record reports an error without a message.
pub const PROCESSING_FAILED_MESSAGE: &str = "Processing failed. Please try uploading the file again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Uploading,
    Success,
    Analyzing,
    Complete,
    Error,
}

/// Everything a view needs to render the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub phase: Phase,
    /// Upload progress, 0-100.
    pub progress: u8,
    pub file_name: Option<String>,
    pub document_id: Option<String>,
    pub mode: Option<SummaryMode>,
    /// Latest processing record seen by the subscription.
    pub record: Option<ProcessingRecord>,
    pub error: Option<String>,
    /// Features requested from this session and not yet settled.
    pub busy: BTreeSet<Feature>,
}

impl SessionSnapshot {
    pub fn is_busy(&self, feature: Feature) -> bool {
        self.busy.contains(&feature)
    }

    /// Grade quiz answers against the current record, if it has a quiz.
    pub fn quiz_score(&self, answers: &[Option<String>]) -> Option<QuizScore> {
        let quiz = self.record.as_ref()?.quiz.as_ref()?;
        Some(grade_quiz(quiz, answers))
    }
}

#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionSnapshot,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.state.generation
    }

    /// Begin a new upload session and return its generation.
    ///
    /// Only allowed when no session is in flight.
    pub fn start(&mut self, file_name: &str, mode: SummaryMode) -> Result<u64> {
        if !matches!(self.state.phase, Phase::Idle | Phase::Complete | Phase::Error) {
            return Err(AppError::Validation {
                message: "An upload is already in progress".to_string(),
            });
        }

        let generation = self.state.generation + 1;
        self.state = SessionSnapshot {
            generation,
            phase: Phase::Uploading,
            file_name: Some(file_name.to_string()),
            document_id: Some(document_id(file_name)),
            mode: Some(mode),
            ..Default::default()
        };
        Ok(generation)
    }

    pub fn progress(&mut self, generation: u64, percent: u8) -> bool {
        if !self.is_current(generation) || self.state.phase != Phase::Uploading {
            return false;
        }
        let percent = percent.min(100);
        if percent <= self.state.progress {
            return false;
        }
        self.state.progress = percent;
        true
    }

    pub fn upload_succeeded(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state.phase != Phase::Uploading {
            return false;
        }
        self.state.phase = Phase::Success;
        self.state.progress = 100;
        true
    }

    pub fn upload_failed(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state.phase != Phase::Uploading {
            return false;
        }
        self.state.phase = Phase::Error;
        self.state.error = Some(UPLOAD_FAILED_MESSAGE.to_string());
        true
    }

    /// The record subscription is live.
    pub fn begin_analysis(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) || self.state.phase != Phase::Success {
            return false;
        }
        self.state.phase = Phase::Analyzing;
        true
    }

    /// Fail the session from any in-flight phase.
    pub fn fail(&mut self, generation: u64, message: impl Into<String>) -> bool {
        if !self.is_current(generation)
            || matches!(self.state.phase, Phase::Idle | Phase::Complete | Phase::Error)
        {
            return false;
        }
        self.state.phase = Phase::Error;
        self.state.error = Some(message.into());
        true
    }

    /// Feed the latest record snapshot (`None` while the record does not
    /// exist yet).
    pub fn apply_snapshot(&mut self, generation: u64, record: Option<ProcessingRecord>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        let Some(record) = record else {
            return false;
        };

        match self.state.phase {
            Phase::Analyzing => {
                if record.status == Some(ProcessingStatus::Error) {
                    self.state.phase = Phase::Error;
                    self.state.error = Some(
                        record
                            .error
                            .clone()
                            .unwrap_or_else(|| PROCESSING_FAILED_MESSAGE.to_string()),
                    );
                } else if record.summary.is_some() {
                    self.state.phase = Phase::Complete;
                }
            }
            Phase::Complete => {}
            // Uploading/success have no subscription yet; error stops waiting.
            _ => return false,
        }

        self.state.record = Some(record);
        self.settle_busy();
        true
    }

    /// A busy feature settles once its data or its error shows up.
    fn settle_busy(&mut self) {
        if let Some(record) = &self.state.record {
            self.state
                .busy
                .retain(|f| !record.has_artifact(*f) && record.feature_error(*f).is_none());
        }
    }

    /// Mark `feature` as requested. Returns the document id to flip the
    /// request flag on.
    pub fn request_feature(&mut self, feature: Feature) -> Result<String> {
        if self.state.phase != Phase::Complete {
            return Err(AppError::Validation {
                message: format!("Cannot request {} before the summary is ready", feature),
            });
        }
        if self.state.busy.contains(&feature) {
            return Err(AppError::Validation {
                message: format!("{} is already being generated", feature),
            });
        }
        if self.state.record.as_ref().is_some_and(|r| r.has_artifact(feature)) {
            return Err(AppError::Validation {
                message: format!("{} has already been generated", feature),
            });
        }

        let document_id = self.state.document_id.clone().ok_or_else(|| AppError::Internal {
            message: "Complete session without a document id".to_string(),
        })?;
        self.state.busy.insert(feature);
        Ok(document_id)
    }

    /// The request flag could not be written; allow asking again.
    pub fn request_failed(&mut self, feature: Feature) -> bool {
        self.state.busy.remove(&feature)
    }

    /// Back to idle. Anything still running for the old generation is
    /// ignored from here on.
    pub fn reset(&mut self) {
        self.state = SessionSnapshot {
            generation: self.state.generation + 1,
            ..Default::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn record(value: serde_json::Value) -> ProcessingRecord {
        serde_json::from_value(value).unwrap()
    }

    fn completed() -> ProcessingRecord {
        record(json!({
            "status": "summary_completed",
            "summary": {"cheat_sheet": ["F = ma"]},
            "modelFileHandle": "mock://files/1"
        }))
    }

    fn analyzing(machine: &mut SessionMachine) -> u64 {
        let generation = machine.start("notes/lecture.pdf", SummaryMode::CheatSheet).unwrap();
        assert!(machine.upload_succeeded(generation));
        assert!(machine.begin_analysis(generation));
        generation
    }

    #[test]
    fn test_happy_path() {
        let mut machine = SessionMachine::new();
        let generation = machine.start("notes/lecture.pdf", SummaryMode::CheatSheet).unwrap();
        assert_eq!(machine.phase(), Phase::Uploading);
        assert_eq!(machine.snapshot().document_id.as_deref(), Some("notes/lecture"));

        assert!(machine.progress(generation, 40));
        assert!(!machine.progress(generation, 20));
        assert!(machine.progress(generation, 250));
        assert_eq!(machine.snapshot().progress, 100);

        assert!(machine.upload_succeeded(generation));
        assert_eq!(machine.phase(), Phase::Success);
        assert!(machine.begin_analysis(generation));
        assert_eq!(machine.phase(), Phase::Analyzing);

        assert!(!machine.apply_snapshot(generation, None));
        assert!(machine.apply_snapshot(generation, Some(record(json!({"status": "processing"})))));
        assert_eq!(machine.phase(), Phase::Analyzing);

        assert!(machine.apply_snapshot(generation, Some(completed())));
        assert_eq!(machine.phase(), Phase::Complete);
    }

    #[test]
    fn test_upload_failure_shows_generic_message() {
        let mut machine = SessionMachine::new();
        let generation = machine.start("a.pdf", SummaryMode::Detailed).unwrap();

        assert!(machine.upload_failed(generation));
        assert_eq!(machine.phase(), Phase::Error);
        assert_eq!(machine.snapshot().error.as_deref(), Some(UPLOAD_FAILED_MESSAGE));
    }

    #[test]
    fn test_record_error_stops_waiting() {
        let mut machine = SessionMachine::new();
        let generation = analyzing(&mut machine);

        let failed = record(json!({"status": "error", "error": "Model returned invalid output"}));
        assert!(machine.apply_snapshot(generation, Some(failed)));
        assert_eq!(machine.phase(), Phase::Error);
        assert_eq!(machine.snapshot().error.as_deref(), Some("Model returned invalid output"));

        assert!(!machine.apply_snapshot(generation, Some(completed())));
        assert_eq!(machine.phase(), Phase::Error);
    }

    #[test]
    fn test_stale_generation_ignored_after_reset() {
        let mut machine = SessionMachine::new();
        let generation = analyzing(&mut machine);

        machine.reset();
        assert_eq!(machine.phase(), Phase::Idle);

        assert!(!machine.apply_snapshot(generation, Some(completed())));
        assert!(!machine.upload_succeeded(generation));
        assert!(!machine.fail(generation, "late"));
        assert_eq!(machine.snapshot().record, None);
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_start_rejected_while_in_flight() {
        let mut machine = SessionMachine::new();
        machine.start("a.pdf", SummaryMode::Detailed).unwrap();
        assert_err!(machine.start("b.pdf", SummaryMode::Detailed));
    }

    #[test]
    fn test_feature_request_guards() {
        let mut machine = SessionMachine::new();
        assert!(machine.request_feature(Feature::Quiz).is_err());

        let generation = analyzing(&mut machine);
        machine.apply_snapshot(generation, Some(completed()));

        assert_eq!(machine.request_feature(Feature::Quiz).unwrap(), "notes/lecture");
        assert!(machine.snapshot().is_busy(Feature::Quiz));
        assert!(machine.request_feature(Feature::Quiz).is_err());

        // Snapshot without the quiz keeps it busy.
        let mut pending = completed();
        pending.request_quiz = Some(true);
        machine.apply_snapshot(generation, Some(pending));
        assert!(machine.snapshot().is_busy(Feature::Quiz));

        let done = record(json!({
            "status": "summary_completed",
            "summary": {"cheat_sheet": ["F = ma"]},
            "requestQuiz": false,
            "quiz": [{"question": "Unit of force?", "options": ["N", "J"], "answer": "N"}]
        }));
        machine.apply_snapshot(generation, Some(done));
        assert!(!machine.snapshot().is_busy(Feature::Quiz));
        assert!(machine.request_feature(Feature::Quiz).is_err());

        let score = machine.snapshot().quiz_score(&[Some("N".into())]).unwrap();
        assert_eq!(score, QuizScore { correct: 1, total: 1 });
    }

    #[test]
    fn test_feature_error_clears_busy() {
        let mut machine = SessionMachine::new();
        let generation = analyzing(&mut machine);
        machine.apply_snapshot(generation, Some(completed()));
        machine.request_feature(Feature::Flashcards).unwrap();

        let mut failed = completed();
        failed.flashcards_error = Some("Model returned invalid output".into());
        machine.apply_snapshot(generation, Some(failed));

        assert!(!machine.snapshot().is_busy(Feature::Flashcards));
    }

    #[test]
    fn test_request_failed_releases_busy() {
        let mut machine = SessionMachine::new();
        let generation = analyzing(&mut machine);
        machine.apply_snapshot(generation, Some(completed()));
        machine.request_feature(Feature::DetailedSummary).unwrap();

        assert!(machine.request_failed(Feature::DetailedSummary));
        assert_ok!(machine.request_feature(Feature::DetailedSummary));
    }
}
