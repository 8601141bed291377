#![forbid(unsafe_code)]

//! Pure domain layer for the progression store: the user record aggregate,
//! the centralized patch/merge rule, and the deterministic metrics engine.
//! No I/O lives here.

pub mod metrics;
pub mod model;
pub mod patch;
pub mod time;

pub use patch::{ActivityPatch, ProfilePatch, UserPatch};
pub use time::Clock;
