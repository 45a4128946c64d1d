//! The current-version pointer: one atomic indirection per artifact.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::PointerKind;
use crate::domain::error::{HivemindError, Result};

/// File name of the pointer inside an artifact directory.
pub const POINTER_NAME: &str = "HEAD";

/// Reads and atomically repoints an artifact's current version.
///
/// Implementations must guarantee a concurrent reader observes either the
/// old or the new target, never a partial one.
pub trait CurrentVersionPointer: Send + Sync + fmt::Debug {
    /// Current revision, or `None` if the pointer was never set.
    fn read(&self, artifact_dir: &Path) -> Result<Option<String>> {
        read_pointer(artifact_dir)
    }

    /// Atomically point `artifact_dir` at `revision`.
    fn repoint(&self, artifact_dir: &Path, revision: &str) -> Result<()>;
}

/// `HEAD` as a relative symlink to the revision directory, swapped by rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymlinkPointer;

/// `HEAD` as a small file holding the revision id, swapped by rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePointer;

pub fn pointer_for(kind: PointerKind) -> Box<dyn CurrentVersionPointer> {
    match kind {
        PointerKind::Symlink => Box::new(SymlinkPointer),
        PointerKind::File => Box::new(FilePointer),
    }
}

/// Read either pointer representation.
pub fn read_pointer(artifact_dir: &Path) -> Result<Option<String>> {
    let head = artifact_dir.join(POINTER_NAME);
    let meta = match fs::symlink_metadata(&head) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let revision = if meta.file_type().is_symlink() {
        let target = fs::read_link(&head)?;
        target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else if meta.is_file() {
        fs::read_to_string(&head)?.trim().to_string()
    } else {
        return Err(HivemindError::Staging(format!(
            "{} is neither a symlink nor a pointer file",
            head.display()
        )));
    };

    Ok(if revision.is_empty() {
        None
    } else {
        Some(revision)
    })
}

#[cfg(unix)]
fn temp_link_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join(format!(".{POINTER_NAME}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

impl CurrentVersionPointer for SymlinkPointer {
    #[cfg(unix)]
    fn repoint(&self, artifact_dir: &Path, revision: &str) -> Result<()> {
        let tmp = temp_link_path(artifact_dir);
        std::os::unix::fs::symlink(revision, &tmp)?;
        if let Err(e) = fs::rename(&tmp, artifact_dir.join(POINTER_NAME)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn repoint(&self, artifact_dir: &Path, revision: &str) -> Result<()> {
        FilePointer.repoint(artifact_dir, revision)
    }
}

impl CurrentVersionPointer for FilePointer {
    fn repoint(&self, artifact_dir: &Path, revision: &str) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(artifact_dir)?;
        writeln!(tmp, "{revision}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(artifact_dir.join(POINTER_NAME))
            .map_err(|e| e.error)?;
        Ok(())
    }
}
