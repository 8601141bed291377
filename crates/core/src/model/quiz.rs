use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::QuizId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz total must be > 0")]
    EmptyQuiz,

    #[error("score ({score}) exceeds total ({total})")]
    ScoreOutOfRange { score: u32, total: u32 },
}

/// A single completed quiz, immutable once appended to the history.
///
/// History order is insertion order, which equals chronological order; a
/// record is never mutated in place, only appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRecord {
    quiz_id: QuizId,
    subject: String,
    score: u32,
    total: u32,
    taken_at: DateTime<Utc>,
    duration_seconds: u32,
}

impl QuizRecord {
    /// Builds a validated quiz record.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::EmptyQuiz` for a zero-question quiz and
    /// `QuizError::ScoreOutOfRange` when `score > total`.
    pub fn new(
        quiz_id: QuizId,
        subject: impl Into<String>,
        score: u32,
        total: u32,
        taken_at: DateTime<Utc>,
        duration_seconds: u32,
    ) -> Result<Self, QuizError> {
        if total == 0 {
            return Err(QuizError::EmptyQuiz);
        }
        if score > total {
            return Err(QuizError::ScoreOutOfRange { score, total });
        }
        Ok(Self {
            quiz_id,
            subject: subject.into(),
            score,
            total,
            taken_at,
            duration_seconds,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> &QuizId {
        &self.quiz_id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    #[must_use]
    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    /// True when every question was answered correctly.
    #[must_use]
    pub fn is_perfect(&self) -> bool {
        self.score == self.total
    }

    /// Fraction of questions answered correctly, in [0, 1].
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        f64::from(self.score) / f64::from(self.total)
    }
}
