//! Prompt templates for every artifact the model produces, plus the
//! parsers that validate what comes back.

mod parse;

pub use parse::{
    parse_cheat_sheet, parse_detailed_summary, parse_flashcards, parse_quiz, parse_summary,
    strip_code_fence,
};

use crate::record::{Feature, SummaryMode};
use serde::{Deserialize, Serialize};
use std::fmt;

const CHEAT_SHEET_PROMPT: &str = r#"You are preparing a last-minute revision cheat sheet from the attached PDF.
Return ONLY a JSON object of this exact shape:
{"cheat_sheet": ["...", "..."]}
Rules:
- 8 to 15 entries, each a single terse line of at most 20 words.
- Prefer formulas, key terms and facts a student must memorise.
- No introductions, no markdown, no numbering."#;

const DETAILED_SUMMARY_PROMPT: &str = r#"You are an expert tutor writing an exam guide for the attached PDF.
Return ONLY a JSON object with exactly these five keys:
{
  "definitions": [{"term": "...", "definition": "..."}],
  "must_revise": [{"concept": "...", "reason": "..."}],
  "important_questions": [{"question": "...", "importance": "..."}],
  "exam_focus": [{"topic": "...", "strategy": "..."}],
  "common_mistakes": [{"point": "...", "correction": "..."}]
}
Rules:
- 3 to 8 entries per section, grounded only in the document.
- Keep every string to one or two sentences.
- No markdown inside strings."#;

const FLASHCARDS_PROMPT: &str = r#"Create study flashcards from the attached PDF.
Return ONLY a JSON object of this exact shape:
{"flashcards": [{"front": "term or question", "back": "answer"}]}
Rules:
- Between 10 and 15 cards.
- Each "back" is at most 15 words.
- Cover the most important concepts; no duplicates."#;

const QUIZ_PROMPT: &str = r#"Create a multiple-choice quiz from the attached PDF.
Return ONLY a JSON object of this exact shape:
{"quiz": [{"question": "...", "options": ["...", "...", "...", "..."], "answer": "...", "explanation": "..."}]}
Rules:
- Between 5 and 10 questions, each with 4 options.
- "answer" MUST be character-for-character identical to one of the "options".
- "explanation" says in one sentence why the answer is correct."#;

/// The fixed prompt variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    CheatSheet,
    DetailedSummary,
    Flashcards,
    Quiz,
}

impl PromptKind {
    /// Initial summary prompt for an upload mode.
    pub fn for_mode(mode: SummaryMode) -> Self {
        match mode {
            SummaryMode::CheatSheet => PromptKind::CheatSheet,
            SummaryMode::Detailed => PromptKind::DetailedSummary,
        }
    }

    /// Enrichment prompt for a requested feature. The detailed summary
    /// reuses the ingestion template.
    pub fn for_feature(feature: Feature) -> Self {
        match feature {
            Feature::DetailedSummary => PromptKind::DetailedSummary,
            Feature::Flashcards => PromptKind::Flashcards,
            Feature::Quiz => PromptKind::Quiz,
        }
    }

    pub fn template(&self) -> &'static str {
        match self {
            PromptKind::CheatSheet => CHEAT_SHEET_PROMPT,
            PromptKind::DetailedSummary => DETAILED_SUMMARY_PROMPT,
            PromptKind::Flashcards => FLASHCARDS_PROMPT,
            PromptKind::Quiz => QUIZ_PROMPT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::CheatSheet => "cheat_sheet",
            PromptKind::DetailedSummary => "detailed_summary",
            PromptKind::Flashcards => "flashcards",
            PromptKind::Quiz => "quiz",
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt ready to send alongside a file handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: &'static str,
}

impl Prompt {
    pub fn new(kind: PromptKind) -> Self {
        Self {
            kind,
            text: kind.template(),
        }
    }

    pub fn for_mode(mode: SummaryMode) -> Self {
        Self::new(PromptKind::for_mode(mode))
    }

    pub fn for_feature(feature: Feature) -> Self {
        Self::new(PromptKind::for_feature(feature))
    }
}
