//! Study artifact payloads: summaries, flashcards and quiz questions.

use serde::{Deserialize, Serialize};

/// Summary payload. The shape depends on the mode that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Summary {
    CheatSheet(CheatSheet),
    Detailed(DetailedSummary),
    /// Plain-text summary written by older versions of the pipeline.
    Text(String),
}

impl Summary {
    pub fn is_cheat_sheet(&self) -> bool {
        matches!(self, Summary::CheatSheet(_))
    }
}

/// Ultra-terse bullet list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheatSheet {
    pub cheat_sheet: Vec<String>,
}

/// Five-section exam guide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedSummary {
    #[serde(default)]
    pub definitions: Vec<Definition>,
    #[serde(default)]
    pub must_revise: Vec<MustRevise>,
    #[serde(default)]
    pub important_questions: Vec<ImportantQuestion>,
    #[serde(default)]
    pub exam_focus: Vec<ExamFocus>,
    #[serde(default)]
    pub common_mistakes: Vec<CommonMistake>,
}

impl DetailedSummary {
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
            && self.must_revise.is_empty()
            && self.important_questions.is_empty()
            && self.exam_focus.is_empty()
            && self.common_mistakes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustRevise {
    pub concept: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportantQuestion {
    pub question: String,
    #[serde(default)]
    pub importance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamFocus {
    pub topic: String,
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonMistake {
    pub point: String,
    pub correction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    /// Always equal to one of `options`.
    pub answer: String,
    #[serde(default)]
    pub explanation: String,
}

impl QuizQuestion {
    /// Whether the answer is one of at least two listed options.
    pub fn is_well_formed(&self) -> bool {
        self.options.len() >= 2 && self.options.iter().any(|o| o == &self.answer)
    }
}

/// Result of grading a quiz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
}

/// Grade selected options against the quiz answers.
///
/// `answers[i]` is the option picked for question `i`; missing or `None`
/// entries count as wrong.
pub fn grade_quiz(questions: &[QuizQuestion], answers: &[Option<String>]) -> QuizScore {
    let correct = questions
        .iter()
        .enumerate()
        .filter(|(i, q)| {
            answers
                .get(*i)
                .and_then(|a| a.as_deref())
                .is_some_and(|a| a == q.answer)
        })
        .count();

    QuizScore {
        correct,
        total: questions.len(),
    }
}
