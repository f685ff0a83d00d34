//! Quiz data model
//!
//! Quizzes are JSON files next to the section they belong to. Each question
//! carries one of three shapes, selected by its `type` tag:
//! - `multiple-choice-single` (alias `single`)
//! - `true-false`
//! - `multiple-choice-multiple` (alias `multi`)

pub mod engine;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use engine::{QuestionReport, QuizSession};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizData {
    pub title: String,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Question shape, each variant carrying only its own answer key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuestionKind {
    #[serde(
        rename = "multiple-choice-single",
        alias = "single",
        rename_all = "camelCase"
    )]
    Single {
        options: Vec<QuizOption>,
        correct_option_id: String,
    },
    #[serde(rename = "true-false", rename_all = "camelCase")]
    TrueFalse { correct_answer: bool },
    #[serde(
        rename = "multiple-choice-multiple",
        alias = "multi",
        rename_all = "camelCase"
    )]
    Multi {
        options: Vec<QuizOption>,
        correct_option_ids: Vec<String>,
    },
}

impl QuestionKind {
    pub fn options(&self) -> &[QuizOption] {
        match self {
            QuestionKind::Single { options, .. } | QuestionKind::Multi { options, .. } => options,
            QuestionKind::TrueFalse { .. } => &[],
        }
    }

    /// Whether `answer` fully matches the answer key
    pub fn is_correct(&self, answer: Option<&Answer>) -> bool {
        match (self, answer) {
            (QuestionKind::Single { correct_option_id, .. }, Some(Answer::Choice(id))) => {
                id == correct_option_id
            }
            (QuestionKind::TrueFalse { correct_answer }, Some(Answer::Bool(b))) => {
                b == correct_answer
            }
            (QuestionKind::Multi { correct_option_ids, .. }, Some(Answer::Choices(ids))) => {
                ids.len() == correct_option_ids.len()
                    && correct_option_ids.iter().all(|id| ids.contains(id))
            }
            // An unanswered multi question only matches an empty key
            (QuestionKind::Multi { correct_option_ids, .. }, None) => correct_option_ids.is_empty(),
            _ => false,
        }
    }

    /// Human readable answer key
    pub fn correct_answer_text(&self) -> String {
        match self {
            QuestionKind::Single {
                options,
                correct_option_id,
            } => option_text(options, correct_option_id),
            QuestionKind::TrueFalse { correct_answer } => correct_answer.to_string(),
            QuestionKind::Multi {
                options,
                correct_option_ids,
            } => options
                .iter()
                .filter(|o| correct_option_ids.contains(&o.id))
                .map(|o| o.text.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn option_text(options: &[QuizOption], id: &str) -> String {
    options
        .iter()
        .find(|o| o.id == id)
        .map(|o| o.text.clone())
        .unwrap_or_else(|| id.to_string())
}

/// A learner's answer to one question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choice(String),
    Bool(bool),
    Choices(Vec<String>),
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Choice(id) => write!(f, "{}", id),
            Answer::Bool(b) => write!(f, "{}", b),
            Answer::Choices(ids) if ids.is_empty() => write!(f, "None selected"),
            Answer::Choices(ids) => write!(f, "{}", ids.join(", ")),
        }
    }
}

/// Question id to answer
pub type UserAnswers = BTreeMap<String, Answer>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
    #[error("unknown question: {0}")]
    UnknownQuestion(String),

    #[error("question {question} has no option {option}")]
    UnknownOption { question: String, option: String },

    #[error("answer does not fit question {0}")]
    AnswerMismatch(String),

    #[error("quiz already submitted")]
    AlreadySubmitted,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"{
        "title": "Pandas basics",
        "questions": [
            {
                "id": "q1",
                "type": "multiple-choice-single",
                "text": "Which call reads a CSV file?",
                "options": [
                    {"id": "a", "text": "pd.load_csv"},
                    {"id": "b", "text": "pd.read_csv"}
                ],
                "correctOptionId": "b",
                "explanation": "read_csv returns a DataFrame."
            },
            {
                "id": "q2",
                "type": "true-false",
                "text": "A Series is one-dimensional.",
                "correctAnswer": true
            },
            {
                "id": "q3",
                "type": "multi",
                "text": "Which are pandas types?",
                "options": [
                    {"id": "x", "text": "DataFrame"},
                    {"id": "y", "text": "Series"},
                    {"id": "z", "text": "ndarray"}
                ],
                "correctOptionIds": ["x", "y"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_question_shapes() {
        let quiz: QuizData = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(quiz.questions.len(), 3);

        match &quiz.questions[0].kind {
            QuestionKind::Single {
                options,
                correct_option_id,
            } => {
                assert_eq!(options.len(), 2);
                assert_eq!(correct_option_id, "b");
            }
            other => panic!("unexpected kind: {:?}", other),
        }
        assert_eq!(
            quiz.questions[1].kind,
            QuestionKind::TrueFalse {
                correct_answer: true
            }
        );
        assert!(matches!(quiz.questions[2].kind, QuestionKind::Multi { .. }));
        assert!(quiz.questions[1].explanation.is_none());
    }

    #[test]
    fn test_serializes_canonical_tags() {
        let quiz: QuizData = serde_json::from_str(SAMPLE).unwrap();
        let json = serde_json::to_value(&quiz.questions[2]).unwrap();
        assert_eq!(json["type"], "multiple-choice-multiple");
        assert_eq!(json["correctOptionIds"], serde_json::json!(["x", "y"]));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let raw = r#"{"id": "q", "type": "essay", "text": "Explain."}"#;
        assert!(serde_json::from_str::<QuizQuestion>(raw).is_err());
    }

    #[test]
    fn test_correct_answer_text() {
        let quiz: QuizData = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(quiz.questions[0].kind.correct_answer_text(), "pd.read_csv");
        assert_eq!(quiz.questions[1].kind.correct_answer_text(), "true");
        assert_eq!(quiz.questions[2].kind.correct_answer_text(), "DataFrame, Series");
    }
}
