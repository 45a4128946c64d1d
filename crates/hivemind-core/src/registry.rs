//! JSON registry of repository bindings, one record per artifact.
//!
//! The file is a single object keyed by artifact name. Every write rewrites
//! the whole file through a temp file in the same directory, so readers never
//! observe a partial registry.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::domain::binding::RepositoryBinding;
use crate::domain::error::{HivemindError, Result};

const MAX_NAME_LEN: usize = 64;

/// Reject artifact names that are not safe as a single path component.
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(HivemindError::Registry(format!(
            "artifact name must be 1..={MAX_NAME_LEN} characters, got '{name}'"
        )));
    }
    if name.starts_with('.') {
        return Err(HivemindError::Registry(format!(
            "artifact name must not start with '.': '{name}'"
        )));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(HivemindError::Registry(format!(
            "artifact name may only contain lowercase letters, digits, '-', '_' and '.': '{name}'"
        )));
    }
    Ok(())
}

/// File-backed binding registry.
///
/// Clones share one write lock, so concurrent attempts on different
/// artifacts never lose each other's updates.
#[derive(Debug, Clone)]
pub struct RepositoryRegistry {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl RepositoryRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, RepositoryBinding>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            HivemindError::Registry(format!("{}: {e}", self.path.display()))
        })
    }

    fn save(&self, records: &BTreeMap<String, RepositoryBinding>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut json = serde_json::to_string_pretty(records)?;
        json.push('\n');

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read-modify-write under the registry lock.
    fn update<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, RepositoryBinding>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| HivemindError::Registry("registry lock poisoned".to_string()))?;
        let mut records = self.load()?;
        let value = f(&mut records)?;
        self.save(&records)?;
        Ok(value)
    }

    pub fn get(&self, name: &str) -> Result<Option<RepositoryBinding>> {
        Ok(self.load()?.remove(name))
    }

    /// Like [`get`](Self::get), failing with `ArtifactNotBound` when absent.
    pub fn require(&self, name: &str) -> Result<RepositoryBinding> {
        self.get(name)?
            .ok_or_else(|| HivemindError::ArtifactNotBound(name.to_string()))
    }

    /// All bindings, sorted by artifact name.
    pub fn list(&self) -> Result<Vec<(String, RepositoryBinding)>> {
        Ok(self.load()?.into_iter().collect())
    }

    /// Add or replace the binding for `name`.
    pub fn bind(&self, name: &str, binding: RepositoryBinding) -> Result<()> {
        validate_artifact_name(name)?;
        if binding.remote.trim().is_empty() {
            return Err(HivemindError::Registry(format!(
                "binding for '{name}' has an empty remote"
            )));
        }
        self.update(|records| {
            records.insert(name.to_string(), binding);
            Ok(())
        })?;
        debug!(artifact = name, path = %self.path.display(), "bound repository");
        Ok(())
    }

    /// Remove the binding for `name`, returning it if present.
    pub fn unbind(&self, name: &str) -> Result<Option<RepositoryBinding>> {
        self.update(|records| Ok(records.remove(name)))
    }

    /// Record `revision` as the pinned revision of `name`.
    pub fn pin_revision(&self, name: &str, revision: &str) -> Result<()> {
        self.update(|records| {
            let binding = records
                .get_mut(name)
                .ok_or_else(|| HivemindError::ArtifactNotBound(name.to_string()))?;
            binding.pinned_revision = Some(revision.to_string());
            Ok(())
        })?;
        debug!(artifact = name, revision, "pinned revision");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorKind;

    fn make_registry() -> (tempfile::TempDir, RepositoryRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = RepositoryRegistry::new(dir.path().join("repos.json"));
        (dir, registry)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, registry) = make_registry();
        assert!(registry.list().unwrap().is_empty());
        assert_eq!(registry.get("foo").unwrap(), None);
        assert_eq!(registry.require("foo").unwrap_err().kind(), ErrorKind::NotBound);
    }

    #[test]
    fn test_bind_pin_unbind() {
        let (_dir, registry) = make_registry();
        registry
            .bind("foo", RepositoryBinding::new("https://example.com/foo.git"))
            .unwrap();
        registry
            .bind("bar", RepositoryBinding::new("https://example.com/bar.git").with_ref("release"))
            .unwrap();

        registry.pin_revision("foo", "def456").unwrap();
        let foo = registry.require("foo").unwrap();
        assert_eq!(foo.pinned_revision.as_deref(), Some("def456"));

        let names: Vec<_> = registry.list().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["bar", "foo"]);

        assert!(registry.unbind("bar").unwrap().is_some());
        assert!(registry.unbind("bar").unwrap().is_none());
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_pin_unknown_artifact_fails() {
        let (_dir, registry) = make_registry();
        let err = registry.pin_revision("ghost", "abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotBound);
    }

    #[test]
    fn test_file_uses_registry_keys() {
        let (dir, registry) = make_registry();
        registry
            .bind(
                "foo",
                RepositoryBinding::new("https://example.com/foo.git").with_pinned_revision("abc123"),
            )
            .unwrap();
        let raw = fs::read_to_string(dir.path().join("repos.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["foo"]["commit"], "abc123");
        assert_eq!(value["foo"]["remote"], "https://example.com/foo.git");
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn test_corrupt_file_is_registry_error() {
        let (dir, registry) = make_registry();
        fs::write(dir.path().join("repos.json"), "{not json").unwrap();
        assert_eq!(registry.list().unwrap_err().kind(), ErrorKind::Registry);
    }

    #[test]
    fn test_name_validation() {
        validate_artifact_name("serde-json_1.0").unwrap();
        assert!(validate_artifact_name("").is_err());
        assert!(validate_artifact_name("Foo").is_err());
        assert!(validate_artifact_name("../etc").is_err());
        assert!(validate_artifact_name(".hidden").is_err());
        assert!(validate_artifact_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_concurrent_pins_are_not_lost() {
        let (_dir, registry) = make_registry();
        for name in ["a", "b", "c", "d"] {
            registry
                .bind(name, RepositoryBinding::new(format!("https://example.com/{name}.git")))
                .unwrap();
        }
        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|name| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.pin_revision(name, &format!("rev-{name}")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        for (name, binding) in registry.list().unwrap() {
            assert_eq!(binding.pinned_revision, Some(format!("rev-{name}")));
        }
    }
}
