//! Explicit configuration handed to every component.
//!
//! All paths derive from one data root unless overridden, so tests can run
//! against an isolated temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{HivemindError, Result};

/// How the current-version pointer is stored on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    /// `HEAD` is a relative symlink to the revision directory.
    Symlink,
    /// `HEAD` is a regular file containing the revision id.
    File,
}

impl Default for PointerKind {
    fn default() -> Self {
        if cfg!(unix) {
            PointerKind::Symlink
        } else {
            PointerKind::File
        }
    }
}

/// The files an analysis must produce for one revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSet {
    /// Knowledge documents, regenerated on every analysis.
    pub knowledge: Vec<String>,
    /// Control file; written on create, preserved on refresh.
    pub control: String,
}

impl Default for OutputSet {
    fn default() -> Self {
        Self {
            knowledge: vec![
                "summary.md".to_string(),
                "code_structure.md".to_string(),
                "build_system.md".to_string(),
                "apis_and_interfaces.md".to_string(),
            ],
            control: "agent.md".to_string(),
        }
    }
}

impl OutputSet {
    /// Every file a complete version directory contains.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.knowledge
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.control.as_str()))
    }

    /// Files from the set that are missing as regular files under `dir`.
    pub fn missing_in(&self, dir: &Path) -> Vec<String> {
        self.all()
            .filter(|name| !dir.join(name).is_file())
            .map(str::to_string)
            .collect()
    }

    pub fn is_complete_in(&self, dir: &Path) -> bool {
        dir.is_dir() && self.missing_in(dir).is_empty()
    }
}

/// External analysis process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Executable to launch.
    pub program: String,

    /// Arguments; `{source_dir}`, `{workspace_dir}`, `{output_dir}`,
    /// `{revision}` and `{artifact}` are substituted per attempt.
    pub args: Vec<String>,

    /// Interval between completion polls (milliseconds).
    pub poll_interval_ms: u64,

    /// Grace period between the stop signal and a forced kill (milliseconds).
    pub terminate_grace_ms: u64,

    /// Bytes of stdout/stderr kept for diagnostics.
    pub diagnostic_tail_bytes: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: [
                "-p",
                "--verbose",
                "--allowedTools",
                "Read,Grep,Glob,Bash,Write",
                "--model",
                "sonnet",
                "--add-dir",
                "{source_dir}",
                "--add-dir",
                "{workspace_dir}",
                "--dangerously-skip-permissions",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            poll_interval_ms: 1_000,
            terminate_grace_ms: 5_000,
            diagnostic_tail_bytes: 500,
        }
    }
}

impl AnalysisConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HivemindConfig {
    /// Version store root: `<artifacts_root>/<name>/<revision>/`.
    pub artifacts_root: PathBuf,
    /// Working copies: `<repos_root>/<name>/`.
    pub repos_root: PathBuf,
    /// Ephemeral staging workspaces; keep on the same filesystem as
    /// `artifacts_root` so promotion is a rename.
    pub staging_root: PathBuf,
    /// Repository binding registry file.
    pub registry_path: PathBuf,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Remote refs tried in order when resolving the latest revision.
    #[serde(default = "default_remote_refs")]
    pub remote_refs: Vec<String>,
    /// Number of recent commits listed by the catalog.
    #[serde(default = "default_recent_commit_window")]
    pub recent_commit_window: usize,
    #[serde(default)]
    pub pointer: PointerKind,
    #[serde(default)]
    pub output_files: OutputSet,
    /// Git executable.
    #[serde(default = "default_git_program")]
    pub git_program: String,
}

/// Partial overlay read from a JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    artifacts_root: Option<PathBuf>,
    repos_root: Option<PathBuf>,
    staging_root: Option<PathBuf>,
    registry_path: Option<PathBuf>,
    analysis: Option<AnalysisConfig>,
    remote_refs: Option<Vec<String>>,
    recent_commit_window: Option<usize>,
    pointer: Option<PointerKind>,
    output_files: Option<OutputSet>,
    git_program: Option<String>,
}

fn default_remote_refs() -> Vec<String> {
    vec![
        "origin/HEAD".to_string(),
        "origin/main".to_string(),
        "origin/master".to_string(),
    ]
}

fn default_recent_commit_window() -> usize {
    50
}

fn default_git_program() -> String {
    "git".to_string()
}

impl HivemindConfig {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            artifacts_root: root.join("experts"),
            repos_root: root.join("repos"),
            staging_root: root.join("staging"),
            registry_path: root.join("repos.json"),
            analysis: AnalysisConfig::default(),
            remote_refs: default_remote_refs(),
            recent_commit_window: default_recent_commit_window(),
            pointer: PointerKind::default(),
            output_files: OutputSet::default(),
            git_program: default_git_program(),
        }
    }

    /// Defaults rooted at `root`, overlaid with `<root>/hivemind.json` when present.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let path = root.join("hivemind.json");
        let config = Self::with_root(root);
        if !path.exists() {
            return Ok(config);
        }
        let content = std::fs::read_to_string(&path)?;
        let overlay: ConfigOverlay = serde_json::from_str(&content).map_err(|e| {
            HivemindError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        let config = config.apply(overlay);
        config.validate()?;
        Ok(config)
    }

    fn apply(mut self, overlay: ConfigOverlay) -> Self {
        if let Some(v) = overlay.artifacts_root {
            self.artifacts_root = v;
        }
        if let Some(v) = overlay.repos_root {
            self.repos_root = v;
        }
        if let Some(v) = overlay.staging_root {
            self.staging_root = v;
        }
        if let Some(v) = overlay.registry_path {
            self.registry_path = v;
        }
        if let Some(v) = overlay.analysis {
            self.analysis = v;
        }
        if let Some(v) = overlay.remote_refs {
            self.remote_refs = v;
        }
        if let Some(v) = overlay.recent_commit_window {
            self.recent_commit_window = v;
        }
        if let Some(v) = overlay.pointer {
            self.pointer = v;
        }
        if let Some(v) = overlay.output_files {
            self.output_files = v;
        }
        if let Some(v) = overlay.git_program {
            self.git_program = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.program.trim().is_empty() {
            return Err(HivemindError::InvalidConfig(
                "analysis.program is empty".to_string(),
            ));
        }
        if self.analysis.poll_interval_ms == 0 {
            return Err(HivemindError::InvalidConfig(
                "analysis.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.remote_refs.is_empty() {
            return Err(HivemindError::InvalidConfig(
                "remote_refs must name at least one ref".to_string(),
            ));
        }
        if self.output_files.control.trim().is_empty() || self.output_files.knowledge.is_empty() {
            return Err(HivemindError::InvalidConfig(
                "output_files must name a control file and at least one knowledge file"
                    .to_string(),
            ));
        }
        if self.output_files.all().any(|f| f.contains('/') || f.contains('\\')) {
            return Err(HivemindError::InvalidConfig(
                "output file names must not contain path separators".to_string(),
            ));
        }
        Ok(())
    }

    pub fn artifact_dir(&self, artifact: &str) -> PathBuf {
        self.artifacts_root.join(artifact)
    }

    pub fn working_copy(&self, artifact: &str) -> PathBuf {
        self.repos_root.join(artifact)
    }
}
