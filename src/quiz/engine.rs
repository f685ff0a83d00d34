//! Quiz session state machine
//!
//! Holds `{current_index, answers, show_results, score}` for one attempt.
//! Nothing here touches the interpreter.

use super::{Answer, QuestionKind, QuizData, QuizError, QuizQuestion, UserAnswers};

type CompletionCallback = Box<dyn FnMut(usize, usize) + Send>;

/// Per-question line of the results view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionReport {
    pub number: usize,
    pub text: String,
    pub user_answer: String,
    pub is_correct: bool,
    /// Only present when the answer was wrong
    pub correct_answer: Option<String>,
    pub explanation: Option<String>,
}

pub struct QuizSession {
    quiz: QuizData,
    current_index: usize,
    answers: UserAnswers,
    show_results: bool,
    score: usize,
    on_complete: Option<CompletionCallback>,
}

impl QuizSession {
    pub fn new(quiz: QuizData) -> Self {
        Self {
            quiz,
            current_index: 0,
            answers: UserAnswers::new(),
            show_results: false,
            score: 0,
            on_complete: None,
        }
    }

    /// Called with `(score, total)` every time the quiz is submitted
    pub fn on_complete(mut self, callback: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn quiz(&self) -> &QuizData {
        &self.quiz
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        self.quiz.questions.get(self.current_index)
    }

    pub fn is_last(&self) -> bool {
        self.current_index + 1 >= self.quiz.questions.len()
    }

    pub fn answers(&self) -> &UserAnswers {
        &self.answers
    }

    pub fn answer(&self, question_id: &str) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    pub fn show_results(&self) -> bool {
        self.show_results
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn total(&self) -> usize {
        self.quiz.questions.len()
    }

    /// Record an answer
    ///
    /// Multi questions toggle a single `Choice` in or out of the selection;
    /// every other combination replaces the stored answer.
    pub fn select_option(&mut self, question_id: &str, answer: Answer) -> Result<(), QuizError> {
        if self.show_results {
            return Err(QuizError::AlreadySubmitted);
        }

        let question = self
            .quiz
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| QuizError::UnknownQuestion(question_id.to_string()))?;

        let check_option = |id: &str| -> Result<(), QuizError> {
            if question.kind.options().iter().any(|o| o.id == id) {
                Ok(())
            } else {
                Err(QuizError::UnknownOption {
                    question: question_id.to_string(),
                    option: id.to_string(),
                })
            }
        };

        let stored = match (&question.kind, answer) {
            (QuestionKind::Single { .. }, Answer::Choice(id)) => {
                check_option(&id)?;
                Answer::Choice(id)
            }
            (QuestionKind::TrueFalse { .. }, Answer::Bool(b)) => Answer::Bool(b),
            (QuestionKind::Multi { .. }, Answer::Choice(id)) => {
                check_option(&id)?;
                let mut selected = match self.answers.get(question_id) {
                    Some(Answer::Choices(ids)) => ids.clone(),
                    _ => Vec::new(),
                };
                match selected.iter().position(|s| *s == id) {
                    Some(pos) => {
                        selected.remove(pos);
                    }
                    None => selected.push(id),
                }
                Answer::Choices(selected)
            }
            (QuestionKind::Multi { .. }, Answer::Choices(ids)) => {
                for id in &ids {
                    check_option(id)?;
                }
                let mut deduped: Vec<String> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !deduped.contains(&id) {
                        deduped.push(id);
                    }
                }
                Answer::Choices(deduped)
            }
            _ => return Err(QuizError::AnswerMismatch(question_id.to_string())),
        };

        self.answers.insert(question_id.to_string(), stored);
        Ok(())
    }

    /// Advance one question, submitting when already on the last one
    pub fn next(&mut self) {
        if self.show_results {
            return;
        }
        if self.is_last() {
            self.submit();
        } else {
            self.current_index += 1;
        }
    }

    pub fn previous(&mut self) {
        if !self.show_results && self.current_index > 0 {
            self.current_index -= 1;
        }
    }

    /// Score the attempt and switch to the results view
    pub fn submit(&mut self) -> usize {
        self.score = self
            .quiz
            .questions
            .iter()
            .filter(|q| q.kind.is_correct(self.answers.get(&q.id)))
            .count();
        self.show_results = true;

        let total = self.total();
        if let Some(callback) = self.on_complete.as_mut() {
            callback(self.score, total);
        }
        self.score
    }

    /// Start over
    pub fn retry(&mut self) {
        self.current_index = 0;
        self.answers.clear();
        self.show_results = false;
        self.score = 0;
    }

    /// One report line per question
    pub fn results(&self) -> Vec<QuestionReport> {
        self.quiz
            .questions
            .iter()
            .enumerate()
            .map(|(idx, q)| {
                let answer = self.answers.get(&q.id);
                let is_correct = q.kind.is_correct(answer);
                QuestionReport {
                    number: idx + 1,
                    text: q.text.clone(),
                    user_answer: describe_answer(&q.kind, answer),
                    is_correct,
                    correct_answer: (!is_correct).then(|| q.kind.correct_answer_text()),
                    explanation: q.explanation.clone(),
                }
            })
            .collect()
    }
}

fn describe_answer(kind: &QuestionKind, answer: Option<&Answer>) -> String {
    match (kind, answer) {
        (QuestionKind::Multi { .. }, None) => "None selected".to_string(),
        (_, None) => "Not answered".to_string(),
        (_, Some(answer)) => answer.to_string(),
    }
}
