//! Update phases and the progress events emitted while an attempt runs.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Phases of a single update or switch attempt, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Cloning,
    Fetching,
    Checking,
    Staging,
    Analyzing,
    Committing,
    RepointingCurrent,
    Done,
    Aborted,
}

impl UpdatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdatePhase::Cloning => "cloning",
            UpdatePhase::Fetching => "fetching",
            UpdatePhase::Checking => "checking",
            UpdatePhase::Staging => "staging",
            UpdatePhase::Analyzing => "analyzing",
            UpdatePhase::Committing => "committing",
            UpdatePhase::RepointingCurrent => "repointing_current",
            UpdatePhase::Done => "done",
            UpdatePhase::Aborted => "aborted",
        }
    }

    /// Whether a cancellation request aborts the attempt in this phase.
    ///
    /// Committing and RepointingCurrent run to completion once started.
    pub fn is_interruptible(&self) -> bool {
        matches!(
            self,
            UpdatePhase::Cloning
                | UpdatePhase::Fetching
                | UpdatePhase::Checking
                | UpdatePhase::Staging
                | UpdatePhase::Analyzing
        )
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress report for one artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub artifact: String,
    pub phase: UpdatePhase,
    pub message: String,
    pub new_revision: Option<String>,
    pub old_revision: Option<String>,
    /// Time spent in the current phase.
    pub elapsed: Duration,
}

/// Sending half of the progress channel handed to an attempt.
///
/// A dropped receiver never fails the attempt; events are simply discarded.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a connected sink/receiver pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Abbreviate a revision id for messages.
pub fn short_revision(revision: &str) -> &str {
    match revision.char_indices().nth(12) {
        Some((idx, _)) => &revision[..idx],
        None => revision,
    }
}
