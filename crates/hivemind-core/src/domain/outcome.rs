//! Result of one update or switch attempt.

use serde::{Deserialize, Serialize};

use crate::domain::error::{ErrorKind, HivemindError};

/// Outcome of an attempt.
///
/// Cancellation is reported through `cancelled`, not as an error kind the
/// caller needs to handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub artifact: String,
    pub success: bool,
    pub cancelled: bool,
    /// The resolved revision was already current; nothing was written.
    pub already_current: bool,
    /// The revision already had a complete output set; no analysis ran.
    pub reused_analysis: bool,
    pub old_revision: Option<String>,
    pub new_revision: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl UpdateOutcome {
    pub fn completed(
        artifact: &str,
        old_revision: Option<String>,
        new_revision: String,
        reused_analysis: bool,
    ) -> Self {
        Self {
            artifact: artifact.to_string(),
            success: true,
            cancelled: false,
            already_current: false,
            reused_analysis,
            old_revision,
            new_revision: Some(new_revision),
            error: None,
            error_kind: None,
        }
    }

    pub fn already_current(artifact: &str, revision: String) -> Self {
        Self {
            artifact: artifact.to_string(),
            success: true,
            cancelled: false,
            already_current: true,
            reused_analysis: false,
            old_revision: Some(revision.clone()),
            new_revision: Some(revision),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(
        artifact: &str,
        old_revision: Option<String>,
        new_revision: Option<String>,
        err: &HivemindError,
    ) -> Self {
        Self {
            artifact: artifact.to_string(),
            success: false,
            cancelled: err.is_cancelled(),
            already_current: false,
            reused_analysis: false,
            old_revision,
            new_revision,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}
