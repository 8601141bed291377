//! Progress events: the producers that turn user activity into patches.
//!
//! Each producer builds one patch carrying both the raw inputs (XP, subject
//! stats, quiz history) and the derived fields the remote stores alongside
//! them, then hands it to the sync coordinator. Derived values are computed
//! here so the wire payload matches what the metrics engine would derive;
//! the coordinator re-derives after every merge regardless.

use std::sync::Arc;

use tracing::debug;

use progress_core::metrics::{
    derive_level, derive_rank, evaluate_achievements, score_subject_progress, streak_days,
    weekly_goal_progress, WeeklyGoal, WEEKLY_TARGET_DEFAULT, XP_PER_CORRECT_ANSWER,
};
use progress_core::model::{earned_count, topics_for, QuizError, QuizId, QuizRecord, UserRecord};
use progress_core::patch::{ProfilePatch, UserPatch};
use progress_core::time::Clock;

use crate::sync::{SyncCoordinator, SyncOutcome};

/// Tunables for the progress producers.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub xp_per_correct_answer: u64,
    pub weekly_target: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            xp_per_correct_answer: XP_PER_CORRECT_ANSWER,
            weekly_target: WEEKLY_TARGET_DEFAULT,
        }
    }
}

/// Produces progress patches from user activity.
pub struct ProgressService {
    coordinator: Arc<SyncCoordinator>,
    clock: Clock,
    config: ProgressConfig,
}

impl ProgressService {
    #[must_use]
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            clock: Clock::default(),
            config: ProgressConfig::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ProgressConfig) -> Self {
        self.config = config;
        self
    }

    fn current(&self) -> UserRecord {
        self.coordinator
            .current()
            .unwrap_or_else(|| UserRecord::initial(self.clock.now()))
    }

    /// Awards XP for one correctly answered question and marks the subject
    /// as practiced.
    pub async fn record_correct_answer(&self, subject: &str) -> SyncOutcome {
        let now = self.clock.now();
        let record = self.current();

        let total_xp = record.profile.total_xp + self.config.xp_per_correct_answer;
        let level = derive_level(total_xp);
        let rank = derive_rank(level.level, earned_count(&record.achievements));

        let mut stat = record.subjects.get(subject).cloned().unwrap_or_default();
        stat.weekly_sessions += 1;
        stat.last_practiced_at = Some(now);
        stat.progress = score_subject_progress(&stat, now);

        debug!(subject, total_xp, "correct answer recorded");
        let patch = UserPatch::new()
            .with_profile(ProfilePatch {
                total_xp: Some(total_xp),
                level: Some(level.level),
                rank: Some(rank.to_string()),
                ..ProfilePatch::default()
            })
            .with_subject(subject, stat)
            .touched_at(now);

        self.coordinator.apply_patch(patch).await
    }

    /// Records a finished quiz: folds it into the subject stats, evaluates
    /// achievements, and awards base plus bonus XP in a single patch.
    ///
    /// Achievement eligibility is judged on the record as it stands with the
    /// quiz appended but before any bonus XP, so the level-threshold rule
    /// cannot be triggered by its own reward. A perfect score also marks the
    /// subject's next uncompleted topic as done.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError`] when the quiz shape is invalid (zero questions
    /// or a score above the total).
    pub async fn complete_quiz(
        &self,
        subject: &str,
        score: u32,
        total: u32,
        duration_seconds: u32,
    ) -> Result<SyncOutcome, QuizError> {
        let now = self.clock.now();
        let quiz = QuizRecord::new(QuizId::random(), subject, score, total, now, duration_seconds)?;

        let mut record = self.current();
        if record.has_quiz(quiz.quiz_id()) {
            debug!(quiz_id = %quiz.quiz_id(), "quiz already recorded, skipping");
            return Ok(SyncOutcome {
                record,
                issue: None,
                conflicts: Vec::new(),
            });
        }

        record.quiz_history.push(quiz.clone());
        record.profile.total_xp += u64::from(score) * self.config.xp_per_correct_answer;

        {
            let stat = record.subject_mut(subject);
            stat.absorb_quiz(score, now);
            stat.weekly_sessions += 1;
            if quiz.is_perfect() {
                if let Some(topics) = topics_for(subject) {
                    if let Some(next) = topics.iter().find(|t| !stat.topics_completed.contains(**t))
                    {
                        stat.topics_completed.insert((*next).to_string());
                    }
                }
            }
        }

        let grants = evaluate_achievements(&quiz, &record, now);
        let bonus: u64 = grants.iter().map(|g| u64::from(g.xp_reward)).sum();
        record.profile.total_xp += bonus;
        record.achievements.extend(grants.iter().cloned());

        let level = derive_level(record.profile.total_xp);
        let badges = earned_count(&record.achievements);
        let mut stat = record.subjects[subject].clone();
        stat.progress = score_subject_progress(&stat, now);

        debug!(
            subject,
            score,
            total,
            grants = grants.len(),
            total_xp = record.profile.total_xp,
            "quiz completed"
        );
        let patch = UserPatch::new()
            .with_profile(ProfilePatch {
                total_xp: Some(record.profile.total_xp),
                level: Some(level.level),
                rank: Some(derive_rank(level.level, badges).to_string()),
                badges: Some(u32::try_from(badges).unwrap_or(u32::MAX)),
                streak_days: Some(streak_days(&record.quiz_history, now)),
                ..ProfilePatch::default()
            })
            .with_subject(subject, stat)
            .with_quiz_history(record.quiz_history.clone())
            .with_achievements(record.achievements.clone())
            .touched_at(now);

        Ok(self.coordinator.apply_patch(patch).await)
    }

    /// Marks a practice session in a subject without awarding XP.
    pub async fn record_study_session(&self, subject: &str) -> SyncOutcome {
        let now = self.clock.now();
        let record = self.current();

        let mut stat = record.subjects.get(subject).cloned().unwrap_or_default();
        stat.weekly_sessions += 1;
        stat.last_practiced_at = Some(now);
        stat.progress = score_subject_progress(&stat, now);

        debug!(subject, "study session recorded");
        let patch = UserPatch::new().with_subject(subject, stat).touched_at(now);
        self.coordinator.apply_patch(patch).await
    }

    /// Weekly-goal progress for the current record.
    #[must_use]
    pub fn weekly_goal(&self) -> WeeklyGoal {
        let record = self.current();
        weekly_goal_progress(
            &record.quiz_history,
            self.clock.now(),
            self.config.weekly_target,
        )
    }
}
