//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::model::UserId;

/// Errors returned by the remote store client.
///
/// The split drives retry policy: transient failures are retried through
/// the ledger indefinitely, rejections consume an entry's bounded attempt
/// budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RemoteError {
    /// Transport failure or a server-side status worth retrying.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The remote refused the payload; retrying unchanged is unlikely to
    /// succeed.
    #[error("remote rejected request with status {status}")]
    Rejected { status: u16 },
}

impl RemoteError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// A pending update discarded after exhausting its rejection retry budget.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("pending update for user {target_id} discarded after {attempts} rejected attempts")]
pub struct ConflictError {
    pub target_id: UserId,
    pub attempts: u32,
}

/// Non-fatal signal attached to a best-effort sync outcome.
///
/// Sync operations never fail past their boundary; the record they return
/// is always usable and this enum says what, if anything, went sideways.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SyncIssue {
    /// The remote commit failed transiently; the update is queued in the
    /// ledger and the optimistic state stays visible.
    #[error("remote commit deferred to the ledger: {detail}")]
    TransientNetwork { detail: String },

    /// The remote rejected the update; it is queued with one attempt
    /// consumed and will be dropped once the cap is exceeded.
    #[error("remote rejected the update (status {status})")]
    RemoteRejection { status: u16 },

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The durable snapshot could not be written; in-memory state is
    /// current but a reload would fall back to an older snapshot.
    #[error("snapshot cache unavailable: {detail}")]
    SnapshotUnavailable { detail: String },
}

impl SyncIssue {
    #[must_use]
    pub fn from_remote(err: &RemoteError) -> Self {
        match err {
            RemoteError::Transient(detail) => SyncIssue::TransientNetwork {
                detail: detail.clone(),
            },
            RemoteError::Rejected { status } => SyncIssue::RemoteRejection { status: *status },
        }
    }
}

/// Errors emitted by the question-generation collaborator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("question generation is not configured")]
    Disabled,

    #[error("question generation request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("model returned no questions")]
    Empty,

    #[error("model output is not a valid question array: {0}")]
    Malformed(String),
}
