use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed subject set a fresh record starts with.
///
/// Unknown subject keys may still be created lazily on first activity; this
/// list only seeds the default record shape.
pub const DEFAULT_SUBJECTS: [&str; 4] = ["math", "science", "english", "history"];

/// Per-subject statistics.
///
/// `progress` is derived, never authoritative: it must always equal the
/// metrics engine's score for the other fields and is recomputed after every
/// mutation that could change an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectStat {
    pub progress: u8,
    pub topics_completed: BTreeSet<String>,
    pub next_milestone: Option<String>,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub weekly_sessions: u32,
    pub best_score: u32,
    pub total_quizzes: u32,
    pub average_score: f64,
}

impl SubjectStat {
    /// Zeroed stats with the given milestone label, as used by the default
    /// record shape.
    #[must_use]
    pub fn with_milestone(milestone: &str) -> Self {
        Self {
            next_milestone: Some(milestone.to_string()),
            ..Self::default()
        }
    }

    /// Folds a finished quiz into the running totals and best score.
    ///
    /// Does not touch `progress`; callers recompute it through the metrics
    /// engine afterwards.
    pub fn absorb_quiz(&mut self, score: u32, taken_at: DateTime<Utc>) {
        self.best_score = self.best_score.max(score);
        let prior = f64::from(self.total_quizzes) * self.average_score;
        self.total_quizzes += 1;
        self.average_score = (prior + f64::from(score)) / f64::from(self.total_quizzes);
        self.last_practiced_at = Some(taken_at);
    }
}

/// Fixed topic list for a seeded subject, if it is one of the known four.
#[must_use]
pub fn topics_for(subject: &str) -> Option<&'static [&'static str]> {
    match subject {
        "math" => Some(&["Algebra", "Geometry", "Statistics"]),
        "science" => Some(&["Physics", "Chemistry", "Biology"]),
        "english" => Some(&["Literature", "Grammar", "Writing"]),
        "history" => Some(&["World History", "Geography", "Civics"]),
        _ => None,
    }
}
