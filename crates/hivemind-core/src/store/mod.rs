//! On-disk version store.
//!
//! Layout:
//!
//! ```text
//! <artifacts_root>/<artifact>/
//!     HEAD              -> <revision>
//!     <revision>/       summary.md, code_structure.md, ..., agent.md
//! ```

pub mod fs_ops;
pub mod pointer;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use crate::config::{HivemindConfig, OutputSet, PointerKind};
use crate::domain::error::{HivemindError, Result};
use crate::obs;

pub use pointer::{pointer_for, CurrentVersionPointer, FilePointer, SymlinkPointer, POINTER_NAME};

/// Per-artifact overview used by status listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub name: String,
    pub current_revision: Option<String>,
    pub version_count: usize,
}

/// Reject revision ids that cannot safely name a directory.
pub fn validate_revision_id(revision: &str) -> Result<()> {
    let valid = !revision.is_empty()
        && !fs_ops::is_hidden(revision)
        && revision != POINTER_NAME
        && !revision.contains(['/', '\\', '\0']);
    if !valid {
        return Err(HivemindError::Staging(format!(
            "invalid revision id for storage: '{revision}'"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
    outputs: OutputSet,
    pointer: Arc<dyn CurrentVersionPointer>,
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>, outputs: OutputSet, pointer: PointerKind) -> Self {
        Self {
            root: root.into(),
            outputs,
            pointer: Arc::from(pointer_for(pointer)),
        }
    }

    /// Store using a caller-supplied pointer implementation.
    pub fn with_pointer(
        root: impl Into<PathBuf>,
        outputs: OutputSet,
        pointer: Arc<dyn CurrentVersionPointer>,
    ) -> Self {
        Self {
            root: root.into(),
            outputs,
            pointer,
        }
    }

    pub fn from_config(config: &HivemindConfig) -> Self {
        Self::new(
            config.artifacts_root.clone(),
            config.output_files.clone(),
            config.pointer,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    pub fn artifact_dir(&self, artifact: &str) -> PathBuf {
        self.root.join(artifact)
    }

    pub fn version_dir(&self, artifact: &str, revision: &str) -> PathBuf {
        self.artifact_dir(artifact).join(revision)
    }

    pub fn current_revision(&self, artifact: &str) -> Result<Option<String>> {
        self.pointer.read(&self.artifact_dir(artifact))
    }

    /// Directory of the current version, if the pointer is set.
    pub fn current_dir(&self, artifact: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .current_revision(artifact)?
            .map(|rev| self.version_dir(artifact, &rev)))
    }

    /// Whether `revision` has a complete output set.
    pub fn is_complete(&self, artifact: &str, revision: &str) -> bool {
        validate_revision_id(revision).is_ok()
            && self
                .outputs
                .is_complete_in(&self.version_dir(artifact, revision))
    }

    /// Revision directories under the artifact; incomplete ones included.
    fn revision_dirs(&self, artifact: &str) -> Result<Vec<String>> {
        let dir = self.artifact_dir(artifact);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut revisions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if fs_ops::is_hidden(&name) || name == POINTER_NAME {
                continue;
            }
            if entry.file_type()?.is_dir() {
                revisions.push(name);
            }
        }
        revisions.sort();
        Ok(revisions)
    }

    /// Revisions with a complete output set.
    pub fn analyzed_revisions(&self, artifact: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .revision_dirs(artifact)?
            .into_iter()
            .filter(|rev| self.is_complete(artifact, rev))
            .collect())
    }

    /// Move the regular files of `source_dir` into the version directory for
    /// `revision`. Does not touch the pointer.
    ///
    /// A fresh version directory appears in one rename, from a hidden
    /// `.incoming-*` directory. An existing (incomplete) directory is filled
    /// file by file, each file replaced atomically.
    pub fn install_files(&self, artifact: &str, revision: &str, source_dir: &Path) -> Result<PathBuf> {
        validate_revision_id(revision)?;
        let promote_err = |reason: String| HivemindError::PromoteFailed {
            revision: revision.to_string(),
            reason,
        };

        let artifact_dir = self.artifact_dir(artifact);
        fs::create_dir_all(&artifact_dir)
            .map_err(|e| promote_err(format!("creating {}: {e}", artifact_dir.display())))?;
        let files = fs_ops::regular_files(source_dir)
            .map_err(|e| promote_err(format!("reading {}: {e}", source_dir.display())))?;
        let final_dir = self.version_dir(artifact, revision);

        if final_dir.is_dir() {
            for file in &files {
                let Some(name) = file.file_name() else { continue };
                fs_ops::move_file(file, &final_dir.join(name))
                    .map_err(|e| promote_err(format!("moving {}: {e}", file.display())))?;
            }
            return Ok(final_dir);
        }

        let incoming = artifact_dir.join(format!(
            ".incoming-{revision}-{}",
            uuid::Uuid::new_v4().simple()
        ));
        let result = (|| -> io::Result<()> {
            fs::create_dir(&incoming)?;
            for file in &files {
                if let Some(name) = file.file_name() {
                    fs_ops::move_file(file, &incoming.join(name))?;
                }
            }
            fs::rename(&incoming, &final_dir)
        })();

        if let Err(e) = result {
            let _ = fs::remove_dir_all(&incoming);
            return Err(promote_err(format!("installing into {}: {e}", final_dir.display())));
        }
        Ok(final_dir)
    }

    /// Atomically point the artifact at `revision`. Refuses unless the
    /// version directory holds a complete output set, so it is safe to retry.
    pub fn repoint(&self, artifact: &str, revision: &str) -> Result<()> {
        validate_revision_id(revision)?;
        let missing = self
            .outputs
            .missing_in(&self.version_dir(artifact, revision));
        if !missing.is_empty() {
            return Err(HivemindError::PromoteFailed {
                revision: revision.to_string(),
                reason: format!("version directory incomplete (missing {})", missing.join(", ")),
            });
        }
        self.pointer
            .repoint(&self.artifact_dir(artifact), revision)
            .map_err(|e| HivemindError::PromoteFailed {
                revision: revision.to_string(),
                reason: format!("repointing {POINTER_NAME}: {e}"),
            })
    }

    /// Install then repoint. If installation fails the previous pointer is
    /// untouched; if repointing fails the files stay installed, unlinked.
    pub fn promote(&self, artifact: &str, revision: &str, source_dir: &Path) -> Result<()> {
        let installed = self.install_files(artifact, revision, source_dir).map(|_| ());
        obs::emit_files_installed(artifact, revision, &installed);
        installed?;

        let repointed = self.repoint(artifact, revision);
        obs::emit_pointer_repointed(artifact, revision, &repointed);
        repointed
    }

    /// Artifact names with a directory under the store root.
    pub fn artifact_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !fs_ops::is_hidden(&name) && entry.file_type()?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn summary(&self, artifact: &str) -> Result<ArtifactSummary> {
        Ok(ArtifactSummary {
            name: artifact.to_string(),
            current_revision: self.current_revision(artifact)?,
            version_count: self.revision_dirs(artifact)?.len(),
        })
    }

    pub fn summaries(&self) -> Result<Vec<ArtifactSummary>> {
        self.artifact_names()?
            .iter()
            .map(|name| self.summary(name))
            .collect()
    }
}
