//! Ephemeral per-attempt workspaces.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::{HivemindConfig, OutputSet};
use crate::domain::error::{HivemindError, Result};
use crate::store::fs_ops;

/// Workspace owned by one attempt.
///
/// The analysis writes into [`output_dir`](Self::output_dir), a subdirectory
/// named after the target revision. The directory tree is removed on
/// [`discard`](Self::discard) or on drop, whichever comes first.
#[derive(Debug)]
pub struct StagingWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
    output_dir: PathBuf,
    revision: String,
    seeded_files: usize,
    seeded_control: Option<Vec<u8>>,
}

impl StagingWorkspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Number of baseline files copied in at creation.
    pub fn seeded_files(&self) -> usize {
        self.seeded_files
    }

    /// Contents of the control file as seeded from the baseline, if any.
    pub fn seeded_control(&self) -> Option<&[u8]> {
        self.seeded_control.as_deref()
    }

    pub fn is_discarded(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the workspace. Safe to call repeatedly.
    pub fn discard(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(path = %path.display(), "discarded staging workspace"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove staging workspace");
                let _ = fs::remove_dir_all(&path);
            }
        }
    }
}

impl Drop for StagingWorkspace {
    fn drop(&mut self) {
        self.discard();
    }
}

#[derive(Debug, Clone)]
pub struct StagingCoordinator {
    staging_root: PathBuf,
    outputs: OutputSet,
}

impl StagingCoordinator {
    pub fn new(staging_root: impl Into<PathBuf>, outputs: OutputSet) -> Self {
        Self {
            staging_root: staging_root.into(),
            outputs,
        }
    }

    pub fn from_config(config: &HivemindConfig) -> Self {
        Self::new(config.staging_root.clone(), config.output_files.clone())
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Allocate a workspace for `revision`, seeded with the regular files of
    /// `baseline` (the current version directory) when given.
    pub fn create_workspace(
        &self,
        artifact: &str,
        revision: &str,
        baseline: Option<&Path>,
    ) -> Result<StagingWorkspace> {
        fs::create_dir_all(&self.staging_root).map_err(|e| {
            HivemindError::Staging(format!("creating {}: {e}", self.staging_root.display()))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{artifact}-"))
            .tempdir_in(&self.staging_root)
            .map_err(|e| HivemindError::Staging(format!("allocating workspace: {e}")))?;

        let root = dir.path().to_path_buf();
        let output_dir = root.join(revision);
        let mut workspace = StagingWorkspace {
            dir: Some(dir),
            root,
            output_dir,
            revision: revision.to_string(),
            seeded_files: 0,
            seeded_control: None,
        };
        // On error the workspace drops here and removes itself.
        self.seed(&mut workspace, baseline)?;
        Ok(workspace)
    }

    fn seed(&self, workspace: &mut StagingWorkspace, baseline: Option<&Path>) -> Result<()> {
        let output_dir = workspace.output_dir.clone();
        fs::create_dir(&output_dir)
            .map_err(|e| HivemindError::Staging(format!("creating {}: {e}", output_dir.display())))?;

        let Some(baseline) = baseline.filter(|b| b.is_dir()) else {
            return Ok(());
        };
        workspace.seeded_files = fs_ops::copy_regular_files(baseline, &output_dir).map_err(|e| {
            HivemindError::Staging(format!("seeding from {}: {e}", baseline.display()))
        })?;

        let control = output_dir.join(&self.outputs.control);
        if control.is_file() {
            workspace.seeded_control = Some(fs::read(&control)?);
        }
        debug!(
            revision = %workspace.revision,
            files = workspace.seeded_files,
            baseline = %baseline.display(),
            "seeded staging workspace"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_coordinator() -> (tempfile::TempDir, StagingCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = StagingCoordinator::new(dir.path().join("staging"), OutputSet::default());
        (dir, coordinator)
    }

    #[test]
    fn test_workspace_without_baseline_is_empty() {
        let (_dir, coordinator) = make_coordinator();
        let ws = coordinator.create_workspace("foo", "abc123", None).unwrap();
        assert!(ws.output_dir().is_dir());
        assert!(ws.output_dir().ends_with("abc123"));
        assert_eq!(ws.seeded_files(), 0);
        assert!(ws.seeded_control().is_none());
    }

    #[test]
    fn test_workspace_seeded_from_baseline() {
        let (dir, coordinator) = make_coordinator();
        let baseline = dir.path().join("experts").join("foo").join("abc123");
        fs::create_dir_all(baseline.join("nested")).unwrap();
        fs::write(baseline.join("summary.md"), "old summary").unwrap();
        fs::write(baseline.join("agent.md"), "control").unwrap();
        fs::write(baseline.join("nested").join("skip.md"), "x").unwrap();

        let ws = coordinator
            .create_workspace("foo", "def456", Some(&baseline))
            .unwrap();
        assert_eq!(ws.seeded_files(), 2);
        assert_eq!(ws.seeded_control(), Some(&b"control"[..]));
        assert_eq!(
            fs::read_to_string(ws.output_dir().join("summary.md")).unwrap(),
            "old summary"
        );
        assert!(!ws.output_dir().join("nested").exists());
    }

    #[test]
    fn test_discard_is_idempotent() {
        let (_dir, coordinator) = make_coordinator();
        let mut ws = coordinator.create_workspace("foo", "abc123", None).unwrap();
        let root = ws.root().to_path_buf();
        assert!(root.exists());

        ws.discard();
        assert!(ws.is_discarded());
        assert!(!root.exists());
        ws.discard();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn test_drop_removes_workspace() {
        let (dir, coordinator) = make_coordinator();
        let root = {
            let ws = coordinator.create_workspace("foo", "abc123", None).unwrap();
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
        assert_eq!(fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
    }
}
