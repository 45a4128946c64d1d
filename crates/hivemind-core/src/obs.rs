//! Structured lifecycle events for update attempts.
//!
//! Every attempt runs inside a `hivemind.attempt` span carrying the artifact
//! name and a per-attempt id; the `emit_*` functions log the milestones
//! operators grep for.

use std::fmt::Display;

use tracing::{info, warn, Instrument, Span};
use uuid::Uuid;

use crate::domain::progress::UpdatePhase;

/// Span scoping one update or switch attempt.
///
/// Attach it to the attempt's future with [`AttemptSpan::instrument`]; an
/// entered guard cannot be held across `.await` in a spawned task.
#[derive(Debug, Clone)]
pub struct AttemptSpan {
    attempt_id: Uuid,
    span: Span,
}

impl AttemptSpan {
    pub fn new(artifact: &str, action: &'static str) -> Self {
        let attempt_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "hivemind.attempt",
            artifact = %artifact,
            action = action,
            attempt_id = %attempt_id,
        );
        Self { attempt_id, span }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn instrument<F: std::future::Future>(&self, future: F) -> tracing::instrument::Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

pub fn emit_attempt_started(artifact: &str, action: &str, target: Option<&str>) {
    info!(event = "attempt.started", artifact = %artifact, action = %action, target = ?target);
}

pub fn emit_phase_entered(artifact: &str, phase: UpdatePhase) {
    info!(event = "attempt.phase", artifact = %artifact, phase = %phase);
}

pub fn emit_analysis_exited(artifact: &str, revision: &str, exit_code: i32, elapsed_ms: u64) {
    info!(
        event = "analysis.exited",
        artifact = %artifact,
        revision = %revision,
        exit_code = exit_code,
        elapsed_ms = elapsed_ms,
    );
}

/// Outcome of moving output files into the version directory.
pub fn emit_files_installed<T, E: Display>(artifact: &str, revision: &str, result: &Result<T, E>) {
    match result {
        Ok(_) => info!(event = "promote.files_installed", artifact = %artifact, revision = %revision),
        Err(e) => warn!(
            event = "promote.files_failed",
            artifact = %artifact,
            revision = %revision,
            error = %e,
        ),
    }
}

/// Outcome of repointing the current-version pointer.
pub fn emit_pointer_repointed<T, E: Display>(artifact: &str, revision: &str, result: &Result<T, E>) {
    match result {
        Ok(_) => info!(event = "promote.repointed", artifact = %artifact, revision = %revision),
        Err(e) => warn!(
            event = "promote.repoint_failed",
            artifact = %artifact,
            revision = %revision,
            error = %e,
        ),
    }
}

pub fn emit_rollback<T, E: Display>(artifact: &str, revision: &str, result: &Result<T, E>) {
    match result {
        Ok(_) => info!(event = "attempt.rolled_back", artifact = %artifact, revision = %revision),
        Err(e) => warn!(
            event = "attempt.rollback_failed",
            artifact = %artifact,
            revision = %revision,
            error = %e,
        ),
    }
}

pub fn emit_attempt_finished(
    artifact: &str,
    success: bool,
    cancelled: bool,
    new_revision: Option<&str>,
    duration_ms: u64,
) {
    info!(
        event = "attempt.finished",
        artifact = %artifact,
        success = success,
        cancelled = cancelled,
        new_revision = ?new_revision,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_attempt_span_instruments_future() {
        let span = AttemptSpan::new("foo", "update");
        let value = AttemptSpan::instrument(&span, async { 7 }).await;
        assert_eq!(value, 7);
        assert_ne!(span.attempt_id(), AttemptSpan::new("foo", "update").attempt_id());
    }
}
