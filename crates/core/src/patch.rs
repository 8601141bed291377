//! Partial updates to a [`UserRecord`] and the single merge rule applied to
//! them.
//!
//! Every optimistic apply, ledger replay, and remote response goes through
//! the same `apply_to` semantics: top-level fields are taken wholesale when
//! present, except `profile`, `subjects`, and `activity`, which merge one
//! level deeper. Array-valued fields (`quizHistory`, `achievements`) are
//! replaced wholesale — callers pre-append, they never send deltas.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AchievementGrant, QuizRecord, SubjectStat, UserId, UserRecord};

/// Field-level partial update of [`crate::model::Profile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(rename = "totalXP", skip_serializing_if = "Option::is_none")]
    pub total_xp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badges: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streak_days: Option<u32>,
}

/// Field-level partial update of [`crate::model::Activity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A partial update to the user record.
///
/// Also the shape of a remote partial-update response: the server's view of
/// at least the fields it was sent, deserialized with absent fields as
/// `None` so that "remote wins on any field it returns" is the same merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfilePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<BTreeMap<String, SubjectStat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_history: Option<Vec<QuizRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievements: Option<Vec<AchievementGrant>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityPatch>,
}

impl ProfilePatch {
    fn apply_to(&self, profile: &mut crate::model::Profile) {
        if let Some(name) = &self.display_name {
            profile.display_name = name.clone();
        }
        if let Some(level) = self.level {
            profile.level = level;
        }
        if let Some(rank) = &self.rank {
            profile.rank = rank.clone();
        }
        if let Some(xp) = self.total_xp {
            profile.total_xp = xp;
        }
        if let Some(badges) = self.badges {
            profile.badges = badges;
        }
        if let Some(streak) = self.streak_days {
            profile.streak_days = streak;
        }
    }
}

impl UserPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the patch carries no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn with_profile(mut self, profile: ProfilePatch) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Adds a per-key subject replacement; keys not mentioned are untouched.
    #[must_use]
    pub fn with_subject(mut self, subject: &str, stat: SubjectStat) -> Self {
        self.subjects
            .get_or_insert_with(BTreeMap::new)
            .insert(subject.to_string(), stat);
        self
    }

    /// Replaces the full quiz history (caller pre-appends).
    #[must_use]
    pub fn with_quiz_history(mut self, history: Vec<QuizRecord>) -> Self {
        self.quiz_history = Some(history);
        self
    }

    /// Replaces the full achievement set (caller pre-appends).
    #[must_use]
    pub fn with_achievements(mut self, achievements: Vec<AchievementGrant>) -> Self {
        self.achievements = Some(achievements);
        self
    }

    /// Stamps `activity.updatedAt`.
    #[must_use]
    pub fn touched_at(mut self, now: DateTime<Utc>) -> Self {
        self.activity
            .get_or_insert_with(ActivityPatch::default)
            .updated_at = Some(now);
        self
    }

    /// Applies the patch in place. Fields the patch carries win; everything
    /// else is left as-is.
    pub fn apply_to(&self, record: &mut UserRecord) {
        if let Some(id) = &self.id {
            record.id = Some(id.clone());
        }
        if let Some(profile) = &self.profile {
            profile.apply_to(&mut record.profile);
        }
        if let Some(subjects) = &self.subjects {
            for (key, stat) in subjects {
                record.subjects.insert(key.clone(), stat.clone());
            }
        }
        if let Some(history) = &self.quiz_history {
            record.quiz_history = history.clone();
        }
        if let Some(achievements) = &self.achievements {
            record.achievements = achievements.clone();
        }
        if let Some(activity) = &self.activity {
            if let Some(created) = activity.created_at {
                record.activity.created_at = created;
            }
            if let Some(updated) = activity.updated_at {
                record.activity.updated_at = updated;
            }
        }
    }
}

impl UserRecord {
    /// Returns a copy of the record with `patch` applied.
    #[must_use]
    pub fn merged(&self, patch: &UserPatch) -> UserRecord {
        let mut next = self.clone();
        patch.apply_to(&mut next);
        next
    }
}
