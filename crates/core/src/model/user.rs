use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    AchievementGrant, QuizId, QuizRecord, SubjectStat, UserId, DEFAULT_SUBJECTS,
};

/// Display-facing profile stats.
///
/// `level` and `rank` are derived from `total_xp` and the achievement set;
/// they are stored for the wire format but recomputed after every mutation
/// that could change an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub display_name: String,
    pub level: u32,
    pub rank: String,
    #[serde(rename = "totalXP")]
    pub total_xp: u64,
    pub badges: u32,
    pub streak_days: u32,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            display_name: "Guest".to_string(),
            level: 1,
            rank: "Novice".to_string(),
            total_xp: 0,
            badges: 0,
            streak_days: 0,
        }
    }
}

/// Creation and last-update timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    #[must_use]
    pub fn started_at(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            updated_at: now,
        }
    }
}

/// The sole aggregate root: profile, subject stats, quiz history, and
/// achievements for the single local user.
///
/// `id` is `None` until the remote store has created the record; all
/// mutations flow through the sync coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<UserId>,
    pub profile: Profile,
    #[serde(default)]
    pub subjects: BTreeMap<String, SubjectStat>,
    #[serde(default)]
    pub quiz_history: Vec<QuizRecord>,
    #[serde(default)]
    pub achievements: Vec<AchievementGrant>,
    pub activity: Activity,
}

impl UserRecord {
    /// The fixed default shape created at first cold start: zeroed stats and
    /// the seeded four-subject set.
    #[must_use]
    pub fn initial(now: DateTime<Utc>) -> Self {
        let mut subjects = BTreeMap::new();
        for (subject, milestone) in DEFAULT_SUBJECTS.iter().zip([
            "Quadratic Equations",
            "Chemical Reactions",
            "Essay Writing",
            "World Wars",
        ]) {
            subjects.insert((*subject).to_string(), SubjectStat::with_milestone(milestone));
        }

        Self {
            id: None,
            profile: Profile::default(),
            subjects,
            quiz_history: Vec::new(),
            achievements: Vec::new(),
            activity: Activity::started_at(now),
        }
    }

    /// Subject stats for `subject`, creating a zeroed entry lazily.
    pub fn subject_mut(&mut self, subject: &str) -> &mut SubjectStat {
        self.subjects.entry(subject.to_string()).or_default()
    }

    /// True when the history already contains `quiz_id`.
    #[must_use]
    pub fn has_quiz(&self, quiz_id: &QuizId) -> bool {
        self.quiz_history.iter().any(|q| q.quiz_id() == quiz_id)
    }
}
