#![forbid(unsafe_code)]

//! Application services: the sync coordinator that moves the user record
//! between memory, durable storage, and the remote store, plus the progress
//! producers and question generation built on top of it.

pub mod error;
pub mod progress;
pub mod quizgen;
pub mod remote;
pub mod store;
pub mod sync;

pub use error::{ConflictError, GenerationError, RemoteError, SyncIssue};
pub use progress::{ProgressConfig, ProgressService};
pub use quizgen::{Question, QuestionConfig, QuestionService};
pub use remote::{HttpRemoteStore, RemoteConfig, RemoteStore};
pub use store::RecordStore;
pub use sync::{FlushReport, SyncCoordinator, SyncOutcome, DEFAULT_RETRY_CAP};

pub use progress_core::time::Clock;
