use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::AchievementId;

/// An achievement granted to the user, unique by id.
///
/// Once `earned` is true for an id it is never revoked or granted again;
/// re-evaluating the same state yields no new grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementGrant {
    pub id: AchievementId,
    pub earned: bool,
    pub earned_at: Option<DateTime<Utc>>,
    pub xp_reward: u32,
}

impl AchievementGrant {
    /// A grant earned now, carrying its XP reward.
    #[must_use]
    pub fn earned_at(id: AchievementId, at: DateTime<Utc>, xp_reward: u32) -> Self {
        Self {
            id,
            earned: true,
            earned_at: Some(at),
            xp_reward,
        }
    }
}

/// True when the set already contains an earned grant for `id`.
#[must_use]
pub fn already_earned(grants: &[AchievementGrant], id: &AchievementId) -> bool {
    grants.iter().any(|g| g.earned && g.id == *id)
}

/// Number of earned achievements, the input to rank derivation.
#[must_use]
pub fn earned_count(grants: &[AchievementGrant]) -> usize {
    grants.iter().filter(|g| g.earned).count()
}
