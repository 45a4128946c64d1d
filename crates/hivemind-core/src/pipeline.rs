//! Update/switch orchestration.
//!
//! One attempt walks the phases
//! `Cloning → Fetching → Checking → Staging → Analyzing → Committing →
//! RepointingCurrent → Done`. Any failure or cancellation before
//! `Committing` aborts: the staging workspace is discarded, the working copy
//! is checked out back to the prior revision, and the current pointer is left
//! alone. From `Committing` on, cancellation is ignored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::analysis::{
    verify_outputs, AnalysisExecutor, AnalysisHandle, AnalysisMode, AnalysisRequest,
    AnalysisStatus,
};
use crate::cancel::CancellationToken;
use crate::catalog::VersionCatalog;
use crate::config::HivemindConfig;
use crate::domain::error::{HivemindError, Result};
use crate::domain::outcome::UpdateOutcome;
use crate::domain::progress::{short_revision, ProgressEvent, ProgressSink, UpdatePhase};
use crate::git::{GitMirror, SourceMirror};
use crate::lease::ArtifactLeases;
use crate::obs::{self, AttemptSpan};
use crate::registry::{validate_artifact_name, RepositoryRegistry};
use crate::staging::{StagingCoordinator, StagingWorkspace};
use crate::store::VersionStore;

/// `tokio::time::interval` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What an attempt moves the artifact to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// First resolvable ref of the configured preference list.
    Latest,
    /// A caller-chosen revision.
    Revision(String),
}

impl Target {
    fn action(&self) -> &'static str {
        match self {
            Target::Latest => "update",
            Target::Revision(_) => "switch",
        }
    }
}

enum Completion {
    AlreadyCurrent(String),
    Promoted { revision: String, reused: bool },
}

/// Mutable state of one attempt.
struct Attempt<'a> {
    artifact: &'a str,
    token: &'a CancellationToken,
    sink: &'a ProgressSink,
    phase: UpdatePhase,
    phase_started: Instant,
    old_revision: Option<String>,
    new_revision: Option<String>,
    /// Working-copy HEAD before this attempt touched it.
    prior_head: Option<String>,
    checkout_changed: bool,
    workspace: Option<StagingWorkspace>,
}

impl Attempt<'_> {
    fn report(&self, message: impl Into<String>) {
        self.sink.send(ProgressEvent {
            artifact: self.artifact.to_string(),
            phase: self.phase,
            message: message.into(),
            new_revision: self.new_revision.clone(),
            old_revision: self.old_revision.clone(),
            elapsed: self.phase_started.elapsed(),
        });
    }

    /// Check cancellation, then move to `phase`.
    fn enter(&mut self, phase: UpdatePhase, message: impl Into<String>) -> Result<()> {
        self.token.check(phase)?;
        self.phase = phase;
        self.phase_started = Instant::now();
        obs::emit_phase_entered(self.artifact, phase);
        self.report(message);
        Ok(())
    }

    fn is_committing(&self) -> bool {
        self.phase >= UpdatePhase::Committing
    }

    /// Revision the working copy must return to on abort.
    fn rollback_target(&self) -> Option<&str> {
        self.old_revision
            .as_deref()
            .or(self.prior_head.as_deref())
    }

    fn workspace(&self) -> Result<&StagingWorkspace> {
        self.workspace
            .as_ref()
            .ok_or_else(|| HivemindError::Staging("no staging workspace allocated".to_string()))
    }
}

/// Drives update and switch attempts.
#[derive(Clone)]
pub struct UpdatePipeline {
    registry: RepositoryRegistry,
    mirror: Arc<dyn SourceMirror>,
    store: VersionStore,
    staging: StagingCoordinator,
    executor: AnalysisExecutor,
    leases: ArtifactLeases,
    remote_refs: Vec<String>,
    poll_interval: Duration,
    recent_window: usize,
}

impl UpdatePipeline {
    /// Pipeline over the real git client.
    pub fn from_config(config: &HivemindConfig) -> Self {
        Self::new(config, Arc::new(GitMirror::from_config(config)))
    }

    pub fn new(config: &HivemindConfig, mirror: Arc<dyn SourceMirror>) -> Self {
        Self {
            registry: RepositoryRegistry::new(config.registry_path.clone()),
            mirror,
            store: VersionStore::from_config(config),
            staging: StagingCoordinator::from_config(config),
            executor: AnalysisExecutor::from_config(config),
            leases: ArtifactLeases::new(),
            remote_refs: config.remote_refs.clone(),
            poll_interval: config.analysis.poll_interval().max(MIN_POLL_INTERVAL),
            recent_window: config.recent_commit_window,
        }
    }

    pub fn with_store(mut self, store: VersionStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_executor(mut self, executor: AnalysisExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn mirror(&self) -> &Arc<dyn SourceMirror> {
        &self.mirror
    }

    pub fn leases(&self) -> &ArtifactLeases {
        &self.leases
    }

    pub fn catalog(&self) -> VersionCatalog {
        VersionCatalog::new(self.mirror.clone(), self.store.clone(), self.recent_window)
    }

    /// Move `artifact` to the latest revision of its remote.
    pub async fn update(
        &self,
        artifact: &str,
        token: &CancellationToken,
        sink: &ProgressSink,
    ) -> UpdateOutcome {
        self.run(artifact, Target::Latest, token, sink).await
    }

    /// Move `artifact` to `revision`, analyzing it first if needed.
    pub async fn switch(
        &self,
        artifact: &str,
        revision: &str,
        token: &CancellationToken,
        sink: &ProgressSink,
    ) -> UpdateOutcome {
        self.run(artifact, Target::Revision(revision.to_string()), token, sink)
            .await
    }

    async fn run(
        &self,
        artifact: &str,
        target: Target,
        token: &CancellationToken,
        sink: &ProgressSink,
    ) -> UpdateOutcome {
        let span = AttemptSpan::new(artifact, target.action());
        span.instrument(self.attempt(artifact, target, token, sink))
            .await
    }

    async fn attempt(
        &self,
        artifact: &str,
        target: Target,
        token: &CancellationToken,
        sink: &ProgressSink,
    ) -> UpdateOutcome {
        let started = Instant::now();
        let requested = match &target {
            Target::Latest => None,
            Target::Revision(rev) => Some(rev.as_str()),
        };
        obs::emit_attempt_started(artifact, target.action(), requested);

        let mut attempt = Attempt {
            artifact,
            token,
            sink,
            phase: UpdatePhase::Cloning,
            phase_started: started,
            old_revision: None,
            new_revision: None,
            prior_head: None,
            checkout_changed: false,
            workspace: None,
        };

        // Held until this function returns.
        let lease = validate_artifact_name(artifact).and_then(|()| self.leases.try_acquire(artifact));
        let result = match lease {
            Ok(_lease) => {
                let result = self.drive(&mut attempt, &target).await;
                if let Err(e) = &result {
                    self.abort(&mut attempt, e).await;
                }
                if let Some(mut workspace) = attempt.workspace.take() {
                    workspace.discard();
                }
                result
            }
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(Completion::AlreadyCurrent(revision)) => {
                attempt.phase = UpdatePhase::Done;
                attempt.report(format!("Already at {}", short_revision(&revision)));
                UpdateOutcome::already_current(artifact, revision)
            }
            Ok(Completion::Promoted { revision, reused }) => {
                attempt.phase = UpdatePhase::Done;
                attempt.report(format!("Now at {}", short_revision(&revision)));
                UpdateOutcome::completed(artifact, attempt.old_revision.clone(), revision, reused)
            }
            Err(e) => {
                attempt.phase = UpdatePhase::Aborted;
                attempt.report(if e.is_cancelled() {
                    "Cancelled".to_string()
                } else {
                    format!("Failed: {e}")
                });
                UpdateOutcome::failed(
                    artifact,
                    attempt.old_revision.clone(),
                    attempt.new_revision.clone(),
                    &e,
                )
            }
        };

        obs::emit_attempt_finished(
            artifact,
            outcome.success,
            outcome.cancelled,
            outcome.new_revision.as_deref(),
            started.elapsed().as_millis() as u64,
        );
        outcome
    }

    async fn drive(&self, att: &mut Attempt<'_>, target: &Target) -> Result<Completion> {
        let artifact = att.artifact;

        att.enter(UpdatePhase::Cloning, "Preparing working copy")?;
        let binding = self.registry.require(artifact)?;
        if self.mirror.ensure_clone(artifact, &binding).await? {
            att.report(format!("Cloned {}", binding.remote));
        }

        att.enter(UpdatePhase::Fetching, "Fetching remote refs")?;
        self.mirror.fetch(artifact).await?;

        att.enter(UpdatePhase::Checking, "Resolving target revision")?;
        att.old_revision = self.store.current_revision(artifact)?;
        att.prior_head = self.mirror.head_revision(artifact).await?;
        let new_revision = match target {
            Target::Latest => self.mirror.resolve_first(artifact, &self.remote_refs).await?,
            Target::Revision(rev) => self.mirror.resolve_revision(artifact, rev).await?,
        };
        att.new_revision = Some(new_revision.clone());
        if att.old_revision.as_deref() == Some(new_revision.as_str()) {
            // An earlier failed promote can leave the checkout ahead of the
            // current version.
            if att.prior_head.as_deref() != Some(new_revision.as_str()) {
                warn!(
                    artifact,
                    head = ?att.prior_head,
                    revision = %new_revision,
                    "working copy differs from current version; restoring it"
                );
                self.mirror.checkout(artifact, &new_revision).await?;
            }
            return Ok(Completion::AlreadyCurrent(new_revision));
        }

        att.enter(
            UpdatePhase::Staging,
            format!(
                "Staging {} -> {}",
                att.old_revision.as_deref().map_or("none", short_revision),
                short_revision(&new_revision)
            ),
        )?;
        let baseline = self.store.current_dir(artifact)?;
        att.workspace = Some(
            self.staging
                .create_workspace(artifact, &new_revision, baseline.as_deref())?,
        );
        if att.prior_head.as_deref() != Some(new_revision.as_str()) {
            // A failed checkout may still have touched the tree.
            att.checkout_changed = true;
            self.mirror.checkout(artifact, &new_revision).await?;
        }

        let reused = self.store.is_complete(artifact, &new_revision);
        if reused {
            att.token.check(UpdatePhase::Analyzing)?;
            debug!(artifact, revision = %new_revision, "output set already complete; skipping analysis");
        } else {
            att.enter(
                UpdatePhase::Analyzing,
                format!("Analyzing {}", short_revision(&new_revision)),
            )?;
            self.analyze(att, &new_revision).await?;
        }

        att.enter(UpdatePhase::Committing, "Installing version files")?;
        if !reused {
            let output_dir = att.workspace()?.output_dir().to_path_buf();
            let installed = self.store.install_files(artifact, &new_revision, &output_dir);
            obs::emit_files_installed(artifact, &new_revision, &installed);
            installed?;
        }

        att.enter(UpdatePhase::RepointingCurrent, "Repointing current version")?;
        let repointed = self.store.repoint(artifact, &new_revision);
        obs::emit_pointer_repointed(artifact, &new_revision, &repointed);
        repointed?;

        // The pointer is authoritative; a stale pin is repaired by the next
        // successful attempt.
        if let Err(e) = self.registry.pin_revision(artifact, &new_revision) {
            warn!(artifact, revision = %new_revision, error = %e, "failed to record pinned revision");
        }

        Ok(Completion::Promoted {
            revision: new_revision,
            reused,
        })
    }

    async fn analyze(&self, att: &mut Attempt<'_>, revision: &str) -> Result<()> {
        let outputs = self.executor.outputs().clone();
        let source_dir = self.mirror.working_copy(att.artifact);
        let mode = {
            let workspace = att.workspace()?;
            AnalysisMode::for_output_dir(workspace.output_dir(), &outputs)
        };

        let mut handle = {
            let workspace = att.workspace()?;
            self.executor
                .run(AnalysisRequest {
                    artifact: att.artifact,
                    revision,
                    source_dir: &source_dir,
                    workspace,
                    mode,
                })
                .await?
        };
        att.report(format!(
            "Running {mode} analysis of {}",
            short_revision(revision)
        ));

        if let Some(pid) = handle.pid() {
            att.token.register_process(pid);
        }
        let supervised = self.supervise(att, &mut handle, revision).await;
        att.token.clear_process();
        let exit_code = supervised?;

        let report = handle.finish().await;
        obs::emit_analysis_exited(
            att.artifact,
            revision,
            exit_code,
            att.phase_started.elapsed().as_millis() as u64,
        );
        report?;

        verify_outputs(att.workspace()?, mode, &outputs)?;
        att.token.check(UpdatePhase::Analyzing)
    }

    /// Poll until the process exits; terminate it on cancellation.
    async fn supervise(
        &self,
        att: &Attempt<'_>,
        handle: &mut AnalysisHandle,
        revision: &str,
    ) -> Result<i32> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if let AnalysisStatus::Exited(code) = handle.poll()? {
                return Ok(code);
            }
            att.report(format!(
                "Analyzing {} ({}s)",
                short_revision(revision),
                att.phase_started.elapsed().as_secs()
            ));

            tokio::select! {
                _ = ticker.tick() => {}
                _ = att.token.cancelled() => {}
            }

            if att.token.is_cancelled() {
                att.report("Stopping analysis");
                let code = handle.terminate().await?;
                info!(artifact = att.artifact, revision, exit_code = code, "analysis stopped on cancellation");
                return Err(HivemindError::Cancelled {
                    phase: UpdatePhase::Analyzing,
                });
            }
        }
    }

    /// Undo the attempt's working-copy changes. Never touches the pointer.
    async fn abort(&self, att: &mut Attempt<'_>, error: &HivemindError) {
        if error.is_cancelled() {
            info!(artifact = att.artifact, phase = %att.phase, "attempt cancelled");
        } else {
            warn!(artifact = att.artifact, phase = %att.phase, error = %error, "attempt failed");
        }

        if att.is_committing() {
            warn!(
                artifact = att.artifact,
                revision = ?att.new_revision,
                "failure after commit began; working copy left at the new revision"
            );
            return;
        }
        if !att.checkout_changed {
            return;
        }
        let Some(target) = att.rollback_target().map(str::to_string) else {
            return;
        };
        let restored = self.mirror.checkout(att.artifact, &target).await;
        obs::emit_rollback(att.artifact, &target, &restored);
        if restored.is_ok() {
            att.checkout_changed = false;
        }
    }
}
