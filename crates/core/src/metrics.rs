//! Deterministic derived-metrics engine.
//!
//! Pure functions only: subject progress, level/rank derivation, weekly-goal
//! aggregation, streaks, and achievement eligibility are all recomputed from
//! record inputs so local and remote views can never disagree about what
//! state implies. Stored `progress`/`level`/`rank` values are wire caches,
//! never trusted as truth.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

use crate::model::{
    already_earned, earned_count, AchievementGrant, AchievementId, QuizRecord, SubjectStat,
    UserRecord,
};

//
// ─── CONSTANTS ─────────────────────────────────────────────────────────────────
//

/// XP awarded per correctly answered question.
pub const XP_PER_CORRECT_ANSWER: u64 = 25;

/// Fixed XP width of every level tier.
pub const XP_PER_LEVEL: u64 = 1_000;

/// Highest defined level; `pct_to_next` clamps to 100 here.
pub const MAX_LEVEL: u32 = 50;

/// Trailing window for weekly aggregation and the recency bonus.
pub const WEEKLY_WINDOW_DAYS: i64 = 7;

/// Default weekly practice-session goal.
pub const WEEKLY_TARGET_DEFAULT: u32 = 20;

/// A quiz finished faster than this unlocks the speed achievement.
pub const SPEED_THRESHOLD_SECS: u32 = 60;

/// Perfect quizzes needed for the cumulative-perfection achievement.
pub const QUIZ_MASTER_PERFECT_COUNT: usize = 5;

/// Level that unlocks the level-threshold achievement.
pub const HIGH_ACHIEVER_LEVEL: u32 = 5;

/// Quizzes in a single subject needed for its mastery achievement.
pub const SUBJECT_MASTERY_COUNT: usize = 10;

// Subject-progress contribution caps. The four contributions sum to at most
// 100 before the final clamp.
const SESSION_POINTS: u32 = 5;
const SESSION_CAP: u32 = 25;
const BEST_SCORE_POINTS: u32 = 3;
const BEST_SCORE_CAP: u32 = 30;
const TOPIC_POINTS: u32 = 10;
const TOPIC_CAP: u32 = 30;
const RECENCY_BONUS_MAX: f64 = 15.0;

//
// ─── SUBJECT PROGRESS ──────────────────────────────────────────────────────────
//

/// Scores a subject's progress in [0, 100] from its stats alone.
///
/// Weighted sum of four individually capped contributions: session
/// frequency, best score, topics completed, and a recency bonus that decays
/// linearly to zero over a 7-day window (zero when `last_practiced_at` is
/// absent or older). Deterministic for a given `now`; idempotent.
#[must_use]
pub fn score_subject_progress(stat: &SubjectStat, now: DateTime<Utc>) -> u8 {
    let sessions = (stat.weekly_sessions.saturating_mul(SESSION_POINTS)).min(SESSION_CAP);
    let best = (stat.best_score.saturating_mul(BEST_SCORE_POINTS)).min(BEST_SCORE_CAP);
    let topics = (u32::try_from(stat.topics_completed.len())
        .unwrap_or(u32::MAX)
        .saturating_mul(TOPIC_POINTS))
    .min(TOPIC_CAP);

    let recency = recency_bonus(stat.last_practiced_at, now);
    let total = f64::from(sessions) + f64::from(best) + f64::from(topics) + recency;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        total.round().clamp(0.0, 100.0) as u8
    }
}

fn recency_bonus(last_practiced_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(last) = last_practiced_at else {
        return 0.0;
    };
    let elapsed = now.signed_duration_since(last);
    if elapsed < Duration::zero() {
        // clock skew: treat a future timestamp as "just practiced"
        return RECENCY_BONUS_MAX;
    }
    let window_secs = Duration::days(WEEKLY_WINDOW_DAYS).num_seconds();

    #[allow(clippy::cast_precision_loss)]
    let fraction = elapsed.num_seconds() as f64 / window_secs as f64;
    if fraction >= 1.0 {
        0.0
    } else {
        RECENCY_BONUS_MAX * (1.0 - fraction)
    }
}

//
// ─── LEVEL & RANK ──────────────────────────────────────────────────────────────
//

/// Level derived from total XP, with progress toward the next tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub level: u32,
    pub xp_to_next: u64,
    pub pct_to_next: u8,
}

/// Derives the level as a monotonic step function of XP with fixed
/// 1000-point tiers. `pct_to_next` is linear within the current tier and
/// clamps to 100 at [`MAX_LEVEL`].
#[must_use]
pub fn derive_level(total_xp: u64) -> LevelInfo {
    let raw = total_xp / XP_PER_LEVEL + 1;
    if raw >= u64::from(MAX_LEVEL) {
        return LevelInfo {
            level: MAX_LEVEL,
            xp_to_next: 0,
            pct_to_next: 100,
        };
    }

    #[allow(clippy::cast_possible_truncation)]
    let level = raw as u32;

    let into_tier = total_xp % XP_PER_LEVEL;

    #[allow(clippy::cast_possible_truncation)]
    LevelInfo {
        level,
        xp_to_next: XP_PER_LEVEL - into_tier,
        pct_to_next: (into_tier * 100 / XP_PER_LEVEL) as u8,
    }
}

/// Named rank tiers, ordered; each requires a minimum level AND a minimum
/// earned-achievement count.
pub const RANK_TIERS: [(&str, u32, usize); 6] = [
    ("Novice", 1, 0),
    ("Apprentice", 3, 2),
    ("Scholar", 7, 5),
    ("Expert", 12, 9),
    ("Master", 20, 14),
    ("Grandmaster", 35, 20),
];

/// Returns the highest rank tier whose level *and* achievement thresholds
/// are both met. The condition is joint: a high level alone never outranks
/// a missing achievement count.
#[must_use]
pub fn derive_rank(level: u32, achievement_count: usize) -> &'static str {
    RANK_TIERS
        .iter()
        .rev()
        .find(|(_, min_level, min_achievements)| {
            level >= *min_level && achievement_count >= *min_achievements
        })
        .map_or(RANK_TIERS[0].0, |(name, _, _)| name)
}

//
// ─── WEEKLY GOAL & STREAK ──────────────────────────────────────────────────────
//

/// Weekly-goal completion derived from quiz history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyGoal {
    pub completed: u32,
    pub target: u32,
    pub pct: u8,
}

/// Counts quizzes taken within the trailing 7-day window and computes the
/// percentage toward `target`, capped at 100. Duplicate quiz ids count once.
#[must_use]
pub fn weekly_goal_progress(history: &[QuizRecord], now: DateTime<Utc>, target: u32) -> WeeklyGoal {
    let window = Duration::days(WEEKLY_WINDOW_DAYS);
    let mut seen = BTreeSet::new();
    let mut completed: u32 = 0;
    for quiz in history {
        if now.signed_duration_since(quiz.taken_at()) < window && seen.insert(quiz.quiz_id().clone())
        {
            completed += 1;
        }
    }

    let pct = if target == 0 {
        100
    } else {
        #[allow(clippy::cast_possible_truncation)]
        {
            (u64::from(completed) * 100 / u64::from(target)).min(100) as u8
        }
    };

    WeeklyGoal {
        completed,
        target,
        pct,
    }
}

/// Consecutive-day practice streak.
///
/// Day-boundary rule: a streak is the number of consecutive UTC calendar
/// days each containing at least one quiz, ending on the day of the most
/// recent quiz. Multiple quizzes on one day count once. The streak reads as
/// zero when history is empty or the most recent quiz day is earlier than
/// yesterday relative to `now`.
#[must_use]
pub fn streak_days(history: &[QuizRecord], now: DateTime<Utc>) -> u32 {
    let days: BTreeSet<_> = history.iter().map(|q| q.taken_at().date_naive()).collect();
    let Some(&latest) = days.iter().next_back() else {
        return 0;
    };
    if latest < now.date_naive() - Duration::days(1) {
        return 0;
    }

    let mut streak = 0;
    let mut cursor = latest;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

//
// ─── ACHIEVEMENTS ──────────────────────────────────────────────────────────────
//

/// Mastery achievement id for a subject, reusing the original template ids
/// for the seeded subjects.
#[must_use]
pub fn subject_mastery_id(subject: &str) -> AchievementId {
    match subject {
        "math" => "math_prodigy".into(),
        "science" => "science_explorer".into(),
        "english" => "word_smith".into(),
        other => AchievementId::new(format!("{other}_mastery")),
    }
}

/// Evaluates the fixed achievement rule set against the record *after* the
/// new quiz was appended.
///
/// Rules are independent; several may fire in one evaluation. Each is
/// idempotent: anything already earned is skipped, and a duplicate quiz id
/// in history yields no grants at all.
#[must_use]
pub fn evaluate_achievements(
    new_quiz: &QuizRecord,
    record_after: &UserRecord,
    now: DateTime<Utc>,
) -> Vec<AchievementGrant> {
    let occurrences = record_after
        .quiz_history
        .iter()
        .filter(|q| q.quiz_id() == new_quiz.quiz_id())
        .count();
    if occurrences != 1 {
        return Vec::new();
    }

    let mut grants = Vec::new();
    let mut grant = |id: AchievementId, xp: u32| {
        if !already_earned(&record_after.achievements, &id)
            && !grants.iter().any(|g: &AchievementGrant| g.id == id)
        {
            grants.push(AchievementGrant::earned_at(id, now, xp));
        }
    };

    // perfect score on a single quiz
    if new_quiz.is_perfect() {
        grant("perfect_score".into(), 50);
    }

    // cumulative perfect scores
    let perfect_count = distinct_quizzes(record_after)
        .filter(|q| q.is_perfect())
        .count();
    if perfect_count >= QUIZ_MASTER_PERFECT_COUNT {
        grant("quiz_master".into(), 200);
    }

    // single-quiz speed
    if new_quiz.duration_seconds() < SPEED_THRESHOLD_SECS {
        grant("speed_demon".into(), 75);
    }

    // level threshold
    if derive_level(record_after.profile.total_xp).level >= HIGH_ACHIEVER_LEVEL {
        grant("high_achiever".into(), 100);
    }

    // weekly goal fully met
    let goal = weekly_goal_progress(&record_after.quiz_history, now, WEEKLY_TARGET_DEFAULT);
    if goal.completed >= goal.target {
        grant("study_streak".into(), 150);
    }

    // cumulative quizzes in the new quiz's subject
    let in_subject = distinct_quizzes(record_after)
        .filter(|q| q.subject() == new_quiz.subject())
        .count();
    if in_subject >= SUBJECT_MASTERY_COUNT {
        grant(subject_mastery_id(new_quiz.subject()), 125);
    }

    grants
}

/// History iterator with duplicate quiz ids skipped (first wins).
fn distinct_quizzes(record: &UserRecord) -> impl Iterator<Item = &QuizRecord> {
    let mut seen = BTreeSet::new();
    record
        .quiz_history
        .iter()
        .filter(move |q| seen.insert(q.quiz_id().clone()))
}

//
// ─── DERIVED-FIELD REFRESH ─────────────────────────────────────────────────────
//

/// Recomputes every derived field in place: subject progress, level, rank,
/// badge count, and streak.
///
/// Called after every mutation that could change an input, and after
/// adopting a remote view, so stored derived values never drift from what
/// the inputs imply.
pub fn refresh_derived(record: &mut UserRecord, now: DateTime<Utc>) {
    for stat in record.subjects.values_mut() {
        stat.progress = score_subject_progress(stat, now);
    }
    let level = derive_level(record.profile.total_xp);
    record.profile.level = level.level;
    let badges = earned_count(&record.achievements);
    record.profile.rank = derive_rank(level.level, badges).to_string();
    record.profile.badges = u32::try_from(badges).unwrap_or(u32::MAX);
    record.profile.streak_days = streak_days(&record.quiz_history, now);
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
