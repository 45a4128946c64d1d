//! Flat-directory file helpers used by staging and promotion.
//!
//! Only regular files directly inside a directory are considered; nested
//! directories, symlinks and other entries are skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Regular files directly inside `dir`, sorted by name.
pub fn regular_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Copy every regular file from `from` into `to`. Returns the number copied.
pub fn copy_regular_files(from: &Path, to: &Path) -> io::Result<usize> {
    let files = regular_files(from)?;
    for path in &files {
        if let Some(name) = path.file_name() {
            fs::copy(path, to.join(name))?;
        }
    }
    Ok(files.len())
}

/// Move `from` to `to`, replacing any existing file at `to`.
///
/// Tries a rename first. When that fails (typically across filesystems),
/// copies into a hidden sibling of `to`, renames it into place, then removes
/// `from`, so `to` is never observed half-written.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let rename_err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let Some(parent) = to.parent() else {
        return Err(rename_err);
    };
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let partial = parent.join(format!(".{name}.{}.part", uuid::Uuid::new_v4().simple()));

    if let Err(e) = fs::copy(from, &partial).and_then(|_| fs::rename(&partial, to)) {
        let _ = fs::remove_file(&partial);
        return Err(io::Error::new(
            e.kind(),
            format!("rename failed ({rename_err}); copy fallback failed ({e})"),
        ));
    }
    fs::remove_file(from)
}

/// Whether a directory entry name is internal bookkeeping rather than a
/// revision directory.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}
