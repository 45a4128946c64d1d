//! Domain models for Hivemind.
//!
//! Canonical definitions for the core entities:
//! - `Version`: one analyzed or analyzable revision of an artifact
//! - `RepositoryBinding`: where an artifact's source lives and what it is pinned to
//! - `UpdateOutcome`: the result of one update or switch attempt
//! - `ProgressEvent`: phase-by-phase progress reports

pub mod binding;
pub mod error;
pub mod outcome;
pub mod progress;
pub mod version;

pub use binding::RepositoryBinding;
pub use error::{ErrorKind, HivemindError, Result};
pub use outcome::UpdateOutcome;
pub use progress::{short_revision, ProgressEvent, ProgressSink, UpdatePhase};
pub use version::{Version, VersionKind};
