//! Domain-level error taxonomy for Hivemind.

use serde::{Deserialize, Serialize};

use crate::domain::progress::UpdatePhase;

/// Coarse classification of a [`HivemindError`], comparable and copyable so
/// attempt outcomes can carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CloneFailed,
    FetchFailed,
    RevisionUnresolved,
    RevisionNotFound,
    CheckoutFailed,
    AnalysisFailed,
    PromoteFailed,
    Cancelled,
    NotBound,
    Busy,
    Registry,
    Staging,
    Config,
    Git,
    Io,
}

/// Hivemind domain errors.
#[derive(Debug, thiserror::Error)]
pub enum HivemindError {
    #[error("clone failed for '{artifact}': {reason}")]
    CloneFailed { artifact: String, reason: String },

    #[error("fetch failed for '{artifact}': {reason}")]
    FetchFailed { artifact: String, reason: String },

    #[error("could not resolve latest revision for '{artifact}' (tried {})", tried.join(", "))]
    RevisionUnresolved { artifact: String, tried: Vec<String> },

    #[error("revision {revision} not found in '{artifact}'")]
    RevisionNotFound { artifact: String, revision: String },

    #[error("checkout of {revision} failed for '{artifact}': {reason}")]
    CheckoutFailed {
        artifact: String,
        revision: String,
        reason: String,
    },

    #[error("failed to launch analysis: {0}")]
    AnalysisLaunch(String),

    #[error("analysis failed (exit code {exit_code}){diagnostics}")]
    AnalysisFailed { exit_code: i32, diagnostics: String },

    #[error("analysis of {revision} left an incomplete output set (missing {})", missing.join(", "))]
    AnalysisIncomplete {
        revision: String,
        missing: Vec<String>,
    },

    #[error("promote of {revision} failed: {reason}")]
    PromoteFailed { revision: String, reason: String },

    #[error("cancelled before {phase}")]
    Cancelled { phase: UpdatePhase },

    #[error("artifact '{0}' has no repository binding")]
    ArtifactNotBound(String),

    #[error("artifact '{0}' already has an update in progress")]
    ArtifactBusy(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("staging error: {0}")]
    Staging(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HivemindError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CloneFailed { .. } => ErrorKind::CloneFailed,
            Self::FetchFailed { .. } => ErrorKind::FetchFailed,
            Self::RevisionUnresolved { .. } => ErrorKind::RevisionUnresolved,
            Self::RevisionNotFound { .. } => ErrorKind::RevisionNotFound,
            Self::CheckoutFailed { .. } => ErrorKind::CheckoutFailed,
            Self::AnalysisLaunch(_)
            | Self::AnalysisFailed { .. }
            | Self::AnalysisIncomplete { .. } => ErrorKind::AnalysisFailed,
            Self::PromoteFailed { .. } => ErrorKind::PromoteFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::ArtifactNotBound(_) => ErrorKind::NotBound,
            Self::ArtifactBusy(_) => ErrorKind::Busy,
            Self::Registry(_) | Self::Serialization(_) => ErrorKind::Registry,
            Self::Staging(_) => ErrorKind::Staging,
            Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Git(_) => ErrorKind::Git,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error is a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Result type for Hivemind domain operations.
pub type Result<T> = std::result::Result<T, HivemindError>;
