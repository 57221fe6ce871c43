//! Model output parsing and shape validation.
//!
//! Every parse failure is an `AppError::InvalidModelOutput`, which is
//! never retried.

use crate::errors::{AppError, Result};
use crate::record::{CheatSheet, DetailedSummary, Flashcard, QuizQuestion, Summary, SummaryMode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

fn invalid(message: impl Into<String>) -> AppError {
    AppError::InvalidModelOutput {
        message: message.into(),
    }
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn from_model<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| invalid(format!("Model returned malformed {} JSON: {}", what, e)))
}

/// Accepts either `{"<key>": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListPayload<T> {
    Bare(Vec<T>),
    Flashcards { flashcards: Vec<T> },
    Quiz { quiz: Vec<T> },
}

impl<T> ListPayload<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListPayload::Bare(items) => items,
            ListPayload::Flashcards { flashcards } => flashcards,
            ListPayload::Quiz { quiz } => quiz,
        }
    }
}

pub fn parse_cheat_sheet(raw: &str) -> Result<Summary> {
    let sheet: CheatSheet = from_model(raw, "cheat sheet")?;
    let entries: Vec<String> = sheet
        .cheat_sheet
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();

    if entries.is_empty() {
        return Err(invalid("Cheat sheet is empty"));
    }
    Ok(Summary::CheatSheet(CheatSheet {
        cheat_sheet: entries,
    }))
}

pub fn parse_detailed_summary(raw: &str) -> Result<Summary> {
    let summary: DetailedSummary = from_model(raw, "detailed summary")?;
    if summary.is_empty() {
        return Err(invalid("Detailed summary has no content in any section"));
    }
    Ok(Summary::Detailed(summary))
}

/// Parse the summary shape expected for `mode`.
pub fn parse_summary(mode: SummaryMode, raw: &str) -> Result<Summary> {
    match mode {
        SummaryMode::CheatSheet => parse_cheat_sheet(raw),
        SummaryMode::Detailed => parse_detailed_summary(raw),
    }
}

pub fn parse_flashcards(raw: &str) -> Result<Vec<Flashcard>> {
    let cards = from_model::<ListPayload<Flashcard>>(raw, "flashcards")?.into_vec();

    if cards.is_empty() {
        return Err(invalid("Model returned no flashcards"));
    }
    if let Some(pos) = cards
        .iter()
        .position(|c| c.front.trim().is_empty() || c.back.trim().is_empty())
    {
        return Err(invalid(format!("Flashcard {} has an empty side", pos + 1)));
    }
    Ok(cards)
}

/// Parse a quiz, dropping questions whose answer is not among their options.
pub fn parse_quiz(raw: &str) -> Result<Vec<QuizQuestion>> {
    let questions = from_model::<ListPayload<QuizQuestion>>(raw, "quiz")?.into_vec();
    let total = questions.len();

    let valid: Vec<QuizQuestion> = questions
        .into_iter()
        .filter(|q| {
            let ok = q.is_well_formed();
            if !ok {
                warn!(question = %q.question, answer = %q.answer, "Dropping malformed quiz question");
            }
            ok
        })
        .collect();

    if valid.is_empty() {
        return Err(invalid(format!(
            "None of the {} quiz questions had an answer matching its options",
            total
        )));
    }
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```\n"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_summary_by_mode() {
        let cheat = parse_summary(SummaryMode::CheatSheet, r#"{"cheat_sheet": ["F = ma", " "]}"#).unwrap();
        assert_eq!(
            cheat,
            Summary::CheatSheet(CheatSheet {
                cheat_sheet: vec!["F = ma".into()]
            })
        );

        let detailed = parse_summary(
            SummaryMode::Detailed,
            r#"{"exam_focus": [{"topic": "Kinematics", "strategy": "Practice graphs"}]}"#,
        )
        .unwrap();
        assert!(matches!(detailed, Summary::Detailed(ref d) if d.exam_focus.len() == 1));
    }

    #[test]
    fn test_parse_summary_rejects_wrong_shape() {
        assert!(parse_summary(SummaryMode::CheatSheet, r#"{"definitions": []}"#).is_err());
        assert!(parse_summary(SummaryMode::Detailed, r#"{"cheat_sheet": ["x"]}"#).is_err());
        assert!(parse_summary(SummaryMode::Detailed, "not json").is_err());
    }

    #[test]
    fn test_parse_flashcards_wrapped_or_bare() {
        let wrapped = parse_flashcards(r#"{"flashcards": [{"front": "Atom", "back": "Smallest unit"}]}"#).unwrap();
        let bare = parse_flashcards(r#"```json
[{"front": "Atom", "back": "Smallest unit"}]
```"#)
        .unwrap();
        assert_eq!(wrapped, bare);

        assert!(parse_flashcards(r#"{"flashcards": []}"#).is_err());
        assert!(parse_flashcards(r#"[{"front": "Atom", "back": ""}]"#).is_err());
    }

    #[test]
    fn test_parse_quiz_drops_mismatched_answers() {
        let raw = r#"{"quiz": [
            {"question": "2+2?", "options": ["3", "4"], "answer": "4", "explanation": "Arithmetic"},
            {"question": "Sky?", "options": ["Blue", "Green"], "answer": "blue"}
        ]}"#;

        let quiz = parse_quiz(raw).unwrap();
        assert_eq!(quiz.len(), 1);
        assert_eq!(quiz[0].answer, "4");
    }

    #[test]
    fn test_parse_quiz_errors_when_nothing_valid() {
        let raw = r#"[{"question": "Q", "options": ["A"], "answer": "A"}]"#;
        let err = parse_quiz(raw).unwrap_err();
        assert!(matches!(err, AppError::InvalidModelOutput { .. }));
    }
}
