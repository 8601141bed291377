mod achievement;
mod ids;
mod quiz;
mod subject;
mod user;

pub use achievement::{already_earned, earned_count, AchievementGrant};
pub use ids::{AchievementId, QuizId, UserId};
pub use quiz::{QuizError, QuizRecord};
pub use subject::{topics_for, SubjectStat, DEFAULT_SUBJECTS};
pub use user::{Activity, Profile, UserRecord};
