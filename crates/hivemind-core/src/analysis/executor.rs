//! Spawning and supervising the analysis process.

use std::fmt;
use std::fs;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analysis::prompt::{DefaultTemplate, InstructionContext, InstructionTemplate};
use crate::analysis::tail::{self, SharedTail, TailBuffer};
use crate::analysis::AnalysisMode;
use crate::config::{AnalysisConfig, HivemindConfig, OutputSet};
use crate::domain::error::{HivemindError, Result};
use crate::staging::StagingWorkspace;

/// How long output capture may lag behind process exit before it is cut off.
/// A grandchild that inherited the pipes can otherwise hold them open.
const CAPTURE_SETTLE: Duration = Duration::from_secs(2);

/// Inputs for one analysis run.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub artifact: &'a str,
    pub revision: &'a str,
    pub source_dir: &'a Path,
    pub workspace: &'a StagingWorkspace,
    pub mode: AnalysisMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Running,
    Exited(i32),
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub revision: String,
    pub exit_code: i32,
    pub elapsed: Duration,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
}

/// Launches the configured analysis program.
#[derive(Clone)]
pub struct AnalysisExecutor {
    config: AnalysisConfig,
    outputs: OutputSet,
    template: Arc<dyn InstructionTemplate>,
}

impl fmt::Debug for AnalysisExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisExecutor")
            .field("config", &self.config)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl AnalysisExecutor {
    pub fn new(config: AnalysisConfig, outputs: OutputSet) -> Self {
        Self {
            config,
            outputs,
            template: Arc::new(DefaultTemplate),
        }
    }

    pub fn from_config(config: &HivemindConfig) -> Self {
        Self::new(config.analysis.clone(), config.output_files.clone())
    }

    pub fn with_template(mut self, template: Arc<dyn InstructionTemplate>) -> Self {
        self.template = template;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    /// Spawn the analysis process and start feeding it instructions.
    pub async fn run(&self, request: AnalysisRequest<'_>) -> Result<AnalysisHandle> {
        let workspace_dir = request.workspace.root();
        let output_dir = request.workspace.output_dir();
        let vars = [
            ("source_dir", request.source_dir.to_string_lossy().into_owned()),
            ("workspace_dir", workspace_dir.to_string_lossy().into_owned()),
            ("output_dir", output_dir.to_string_lossy().into_owned()),
            ("revision", request.revision.to_string()),
            ("artifact", request.artifact.to_string()),
        ];
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| expand_placeholders(arg, &vars))
            .collect();

        let payload = self.template.render(&InstructionContext {
            artifact: request.artifact,
            revision: request.revision,
            source_dir: request.source_dir,
            output_dir,
            mode: request.mode,
            outputs: &self.outputs,
        });

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .current_dir(output_dir)
            .env("HIVEMIND_MODE", request.mode.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &vars {
            command.env(format!("HIVEMIND_{}", key.to_uppercase()), value);
        }

        let mut child = command.spawn().map_err(|e| {
            HivemindError::AnalysisLaunch(format!("{}: {e}", self.config.program))
        })?;
        let pid = child.id();
        info!(
            artifact = request.artifact,
            revision = request.revision,
            mode = %request.mode,
            program = %self.config.program,
            pid = ?pid,
            "analysis started"
        );

        let budget = self.config.diagnostic_tail_bytes;
        let stdout = TailBuffer::shared(budget);
        let stderr = TailBuffer::shared(budget);
        let mut tasks = Vec::with_capacity(3);
        if let Some(out) = child.stdout.take() {
            tasks.push(tokio::spawn(tail::capture(out, stdout.clone())));
        }
        if let Some(err) = child.stderr.take() {
            tasks.push(tokio::spawn(tail::capture(err, stderr.clone())));
        }
        if let Some(mut stdin) = child.stdin.take() {
            tasks.push(tokio::spawn(async move {
                // The process may exit without reading its instructions.
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!(error = %e, "analysis stdin closed early");
                }
                let _ = stdin.shutdown().await;
            }));
        }

        Ok(AnalysisHandle {
            child,
            pid,
            revision: request.revision.to_string(),
            started: Instant::now(),
            exit_code: None,
            stdout,
            stderr,
            tasks,
            grace: self.config.terminate_grace(),
        })
    }
}

/// A running (or finished, not yet collected) analysis process.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct AnalysisHandle {
    child: Child,
    pid: Option<u32>,
    revision: String,
    started: Instant,
    exit_code: Option<i32>,
    stdout: SharedTail,
    stderr: SharedTail,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl AnalysisHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking status check.
    pub fn poll(&mut self) -> Result<AnalysisStatus> {
        if let Some(code) = self.exit_code {
            return Ok(AnalysisStatus::Exited(code));
        }
        match self.child.try_wait()? {
            Some(status) => {
                let code = exit_code(status);
                self.exit_code = Some(code);
                Ok(AnalysisStatus::Exited(code))
            }
            None => Ok(AnalysisStatus::Running),
        }
    }

    /// Ask the process to stop; force-kill it if it outlives the grace period.
    /// Returns the exit code once the process is gone.
    pub async fn terminate(&mut self) -> Result<i32> {
        if let AnalysisStatus::Exited(code) = self.poll()? {
            return Ok(code);
        }

        self.send_stop_signal().await;
        let status = match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    grace_ms = self.grace.as_millis() as u64,
                    "analysis ignored stop signal; killing"
                );
                self.child.kill().await?;
                self.child.wait().await?
            }
        };
        let code = exit_code(status);
        self.exit_code = Some(code);
        info!(revision = %self.revision, pid = ?self.pid, exit_code = code, "analysis terminated");
        Ok(code)
    }

    // The child is not reaped until `try_wait`/`wait` observes its exit, so
    // its pid cannot have been reused while it is still `Running`.
    #[cfg(unix)]
    async fn send_stop_signal(&mut self) {
        let Some(pid) = self.pid else {
            let _ = self.child.start_kill();
            return;
        };
        let result = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => debug!(pid, "sent SIGTERM to analysis"),
            Ok(status) => debug!(pid, %status, "kill -TERM did not succeed"),
            Err(e) => {
                warn!(pid, error = %e, "could not run kill; killing analysis directly");
                let _ = self.child.start_kill();
            }
        }
    }

    #[cfg(not(unix))]
    async fn send_stop_signal(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Wait for exit, collect output tails and release them. A nonzero exit
    /// becomes [`HivemindError::AnalysisFailed`] carrying both tails.
    pub async fn finish(mut self) -> Result<AnalysisReport> {
        let code = match self.exit_code {
            Some(code) => code,
            None => exit_code(self.child.wait().await?),
        };
        self.settle_capture().await;

        let (stdout, stdout_bytes) = take_tail(&self.stdout);
        let (stderr, stderr_bytes) = take_tail(&self.stderr);
        let elapsed = self.started.elapsed();

        if code != 0 {
            return Err(HivemindError::AnalysisFailed {
                exit_code: code,
                diagnostics: format_diagnostics(&stdout, &stderr),
            });
        }
        Ok(AnalysisReport {
            revision: std::mem::take(&mut self.revision),
            exit_code: code,
            elapsed,
            stdout_bytes,
            stderr_bytes,
        })
    }

    async fn settle_capture(&mut self) {
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(CAPTURE_SETTLE, &mut task).await.is_err() {
                debug!("output capture still open after exit; abandoning it");
                task.abort();
            }
        }
    }
}

impl Drop for AnalysisHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Take the retained text out of a shared tail, leaving it empty.
fn take_tail(tail: &SharedTail) -> (String, u64) {
    match tail.lock() {
        Ok(mut guard) => {
            let text = guard.to_string_lossy();
            let total = guard.total_bytes();
            *guard = TailBuffer::new(0);
            (text, total)
        }
        Err(_) => (String::new(), 0),
    }
}

fn format_diagnostics(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    for (label, text) in [("stderr", stderr), ("stdout", stdout)] {
        let text = text.trim();
        if !text.is_empty() {
            out.push_str(&format!("\n{label}: {text}"));
        }
    }
    out
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn expand_placeholders(arg: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(arg.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Check a finished analysis left a complete output set in the workspace.
///
/// In refresh mode the seeded control file must be byte-identical afterwards;
/// a modified or removed control file is restored from the seed.
pub fn verify_outputs(
    workspace: &StagingWorkspace,
    mode: AnalysisMode,
    outputs: &OutputSet,
) -> Result<()> {
    let dir = workspace.output_dir();
    if mode == AnalysisMode::Refresh {
        if let Some(seed) = workspace.seeded_control() {
            let path = dir.join(&outputs.control);
            let intact = fs::read(&path).map(|cur| cur == seed).unwrap_or(false);
            if !intact {
                warn!(
                    revision = workspace.revision(),
                    file = %outputs.control,
                    "analysis changed the control file during refresh; restoring it"
                );
                fs::write(&path, seed)?;
            }
        }
    }

    let missing = outputs.missing_in(dir);
    if !missing.is_empty() {
        return Err(HivemindError::AnalysisIncomplete {
            revision: workspace.revision().to_string(),
            missing,
        });
    }
    Ok(())
}
