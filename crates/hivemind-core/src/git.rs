//! Source mirror: one git working copy per artifact.
//!
//! Everything goes through the `git` binary via `tokio::process`, so VCS
//! calls suspend the calling task without blocking the runtime.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::HivemindConfig;
use crate::domain::binding::RepositoryBinding;
use crate::domain::error::{HivemindError, Result};

const FIELD_SEP: char = '\u{1f}';

/// A tag resolved to the commit it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub revision: String,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub revision: String,
    pub date: Option<DateTime<Utc>>,
    pub subject: String,
}

/// Version-control operations on an artifact's working copy.
#[async_trait]
pub trait SourceMirror: Send + Sync {
    /// Path of the artifact's working copy.
    fn working_copy(&self, artifact: &str) -> PathBuf;

    /// Clone the bound remote when no working copy exists. Returns `true` if
    /// a clone was made.
    async fn ensure_clone(&self, artifact: &str, binding: &RepositoryBinding) -> Result<bool>;

    /// Refresh remote refs and tags.
    async fn fetch(&self, artifact: &str) -> Result<()>;

    /// Resolve the first of `refs` that names a commit.
    async fn resolve_first(&self, artifact: &str, refs: &[String]) -> Result<String>;

    /// Full commit id for `revision`, or `RevisionNotFound`.
    async fn resolve_revision(&self, artifact: &str, revision: &str) -> Result<String>;

    /// Commit currently checked out, if any.
    async fn head_revision(&self, artifact: &str) -> Result<Option<String>>;

    async fn checkout(&self, artifact: &str, revision: &str) -> Result<()>;

    /// Tags, newest first.
    async fn list_tags(&self, artifact: &str) -> Result<Vec<TagInfo>>;

    /// Up to `limit` commits across all refs, newest first.
    async fn recent_commits(&self, artifact: &str, limit: usize) -> Result<Vec<CommitInfo>>;

    async fn describe(&self, artifact: &str, revision: &str) -> Result<CommitInfo>;
}

/// [`SourceMirror`] backed by the git command-line client.
#[derive(Debug, Clone)]
pub struct GitMirror {
    repos_root: PathBuf,
    program: String,
}

impl GitMirror {
    pub fn new(repos_root: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            repos_root: repos_root.into(),
            program: program.into(),
        }
    }

    pub fn from_config(config: &HivemindConfig) -> Self {
        Self::new(config.repos_root.clone(), config.git_program.clone())
    }

    /// Run git in `dir`; `Err` carries a human-readable reason.
    async fn run(&self, dir: &Path, args: &[&str]) -> std::result::Result<String, String> {
        debug!(dir = %dir.display(), ?args, "git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(format!("git {} exited {code}: {stderr}", args.join(" ")));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Working copy of a cloned artifact, or a `Git` error when absent.
    fn existing_copy(&self, artifact: &str) -> Result<PathBuf> {
        let dir = self.working_copy(artifact);
        if dir.join(".git").exists() {
            Ok(dir)
        } else {
            Err(HivemindError::Git(format!(
                "no working copy for '{artifact}' at {}",
                dir.display()
            )))
        }
    }

    async fn rev_parse(&self, dir: &Path, revision: &str) -> Option<String> {
        if revision.starts_with('-') {
            return None;
        }
        let spec = format!("{revision}^{{commit}}");
        self.run(dir, &["rev-parse", "--verify", "--quiet", &spec])
            .await
            .ok()
            .map(|out| out.trim().to_string())
            .filter(|rev| !rev.is_empty())
    }
}

#[async_trait]
impl SourceMirror for GitMirror {
    fn working_copy(&self, artifact: &str) -> PathBuf {
        self.repos_root.join(artifact)
    }

    async fn ensure_clone(&self, artifact: &str, binding: &RepositoryBinding) -> Result<bool> {
        let dest = self.working_copy(artifact);
        if dest.join(".git").exists() {
            return Ok(false);
        }
        let clone_err = |reason: String| HivemindError::CloneFailed {
            artifact: artifact.to_string(),
            reason,
        };
        if dest.exists() {
            return Err(clone_err(format!(
                "{} exists but is not a git working copy",
                dest.display()
            )));
        }

        tokio::fs::create_dir_all(&self.repos_root)
            .await
            .map_err(|e| clone_err(format!("creating {}: {e}", self.repos_root.display())))?;

        // Clone beside the destination so an interrupted clone never looks
        // like a working copy.
        let partial = self
            .repos_root
            .join(format!(".{artifact}.{}.clone", uuid::Uuid::new_v4().simple()));
        let partial_str = partial.to_string_lossy().into_owned();
        let mut args = vec!["clone", "--quiet"];
        if let Some(ref_name) = binding.ref_name.as_deref() {
            args.extend(["--branch", ref_name]);
        }
        args.extend(["--", binding.remote.as_str(), partial_str.as_str()]);

        info!(artifact, remote = %binding.remote, "cloning");
        let mut result = self.run(&self.repos_root, &args).await;
        if result.is_ok() {
            if let Some(pinned) = binding.pinned_revision.as_deref() {
                result = self.run(&partial, &["checkout", "--quiet", pinned]).await;
            }
        }
        if let Err(reason) = result {
            let _ = tokio::fs::remove_dir_all(&partial).await;
            return Err(clone_err(reason));
        }

        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            let _ = tokio::fs::remove_dir_all(&partial).await;
            return Err(clone_err(format!("moving clone into {}: {e}", dest.display())));
        }
        Ok(true)
    }

    async fn fetch(&self, artifact: &str) -> Result<()> {
        let fetch_err = |reason: String| HivemindError::FetchFailed {
            artifact: artifact.to_string(),
            reason,
        };
        let dir = self
            .existing_copy(artifact)
            .map_err(|e| fetch_err(e.to_string()))?;
        self.run(&dir, &["fetch", "--quiet", "--tags", "--prune", "origin"])
            .await
            .map_err(fetch_err)?;
        Ok(())
    }

    async fn resolve_first(&self, artifact: &str, refs: &[String]) -> Result<String> {
        let dir = self.existing_copy(artifact)?;
        for candidate in refs {
            if let Some(revision) = self.rev_parse(&dir, candidate).await {
                debug!(artifact, reference = %candidate, %revision, "resolved ref");
                return Ok(revision);
            }
        }
        Err(HivemindError::RevisionUnresolved {
            artifact: artifact.to_string(),
            tried: refs.to_vec(),
        })
    }

    async fn resolve_revision(&self, artifact: &str, revision: &str) -> Result<String> {
        let dir = self.existing_copy(artifact)?;
        // Local branches stop at whatever the clone created; the fetched
        // remote-tracking branch is the live tip.
        let tracking = format!("refs/remotes/origin/{revision}");
        if let Some(resolved) = self.rev_parse(&dir, &tracking).await {
            debug!(artifact, reference = %tracking, revision = %resolved, "resolved branch");
            return Ok(resolved);
        }
        self.rev_parse(&dir, revision)
            .await
            .ok_or_else(|| HivemindError::RevisionNotFound {
                artifact: artifact.to_string(),
                revision: revision.to_string(),
            })
    }

    async fn head_revision(&self, artifact: &str) -> Result<Option<String>> {
        let dir = self.working_copy(artifact);
        if !dir.join(".git").exists() {
            return Ok(None);
        }
        Ok(self.rev_parse(&dir, "HEAD").await)
    }

    async fn checkout(&self, artifact: &str, revision: &str) -> Result<()> {
        let checkout_err = |reason: String| HivemindError::CheckoutFailed {
            artifact: artifact.to_string(),
            revision: revision.to_string(),
            reason,
        };
        let dir = self
            .existing_copy(artifact)
            .map_err(|e| checkout_err(e.to_string()))?;
        if revision.starts_with('-') {
            return Err(checkout_err("revision looks like an option".to_string()));
        }
        self.run(&dir, &["checkout", "--quiet", revision])
            .await
            .map_err(checkout_err)?;
        Ok(())
    }

    async fn list_tags(&self, artifact: &str) -> Result<Vec<TagInfo>> {
        let dir = self.existing_copy(artifact)?;
        let out = self
            .run(
                &dir,
                &[
                    "for-each-ref",
                    "--sort=-creatordate",
                    "--format=%(refname:short)%1f%(objectname)%1f%(*objectname)%1f%(creatordate:iso-strict)",
                    "refs/tags",
                ],
            )
            .await
            .map_err(HivemindError::Git)?;
        Ok(parse_tags(&out))
    }

    async fn recent_commits(&self, artifact: &str, limit: usize) -> Result<Vec<CommitInfo>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let dir = self.existing_copy(artifact)?;
        let count = limit.to_string();
        let out = self
            .run(&dir, &["log", "-n", &count, "--all", "--format=%H%x1f%cI%x1f%s"])
            .await
            .map_err(HivemindError::Git)?;
        Ok(out.lines().filter_map(parse_commit_line).collect())
    }

    async fn describe(&self, artifact: &str, revision: &str) -> Result<CommitInfo> {
        let dir = self.existing_copy(artifact)?;
        let not_found = || HivemindError::RevisionNotFound {
            artifact: artifact.to_string(),
            revision: revision.to_string(),
        };
        let full = self.rev_parse(&dir, revision).await.ok_or_else(not_found)?;
        let out = self
            .run(&dir, &["log", "-1", "--format=%H%x1f%cI%x1f%s", &full])
            .await
            .map_err(HivemindError::Git)?;
        out.lines().find_map(parse_commit_line).ok_or_else(not_found)
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_tags(out: &str) -> Vec<TagInfo> {
    out.lines()
        .filter_map(|line| {
            let mut fields = line.split(FIELD_SEP);
            let name = fields.next()?.trim();
            let object = fields.next()?.trim();
            let peeled = fields.next().unwrap_or("").trim();
            let date = fields.next().and_then(parse_date);
            // Annotated tags peel to their commit.
            let revision = if peeled.is_empty() { object } else { peeled };
            if name.is_empty() || revision.is_empty() {
                return None;
            }
            Some(TagInfo {
                name: name.to_string(),
                revision: revision.to_string(),
                date,
            })
        })
        .collect()
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut fields = line.splitn(3, FIELD_SEP);
    let revision = fields.next()?.trim();
    if revision.is_empty() {
        return None;
    }
    let date = fields.next().and_then(parse_date);
    let subject = fields.next().unwrap_or("").trim().to_string();
    Some(CommitInfo {
        revision: revision.to_string(),
        date,
        subject,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn commit(repo_dir: &Path, message: &str) -> String {
        run_git(repo_dir, &["commit", "--allow-empty", "-m", message]);
        run_git(repo_dir, &["rev-parse", "HEAD"])
    }

    fn make_upstream() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "--initial-branch=main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        commit(dir.path(), "initial");
        dir
    }

    fn binding_for(upstream: &Path) -> RepositoryBinding {
        RepositoryBinding::new(upstream.to_string_lossy().into_owned())
    }

    #[test]
    fn test_parse_tags_prefers_peeled_commit() {
        let out = "v1.0\u{1f}aaa\u{1f}bbb\u{1f}2024-01-02T03:04:05+00:00\nlight\u{1f}ccc\u{1f}\u{1f}2024-01-01T00:00:00Z\n";
        let tags = parse_tags(out);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "v1.0");
        assert_eq!(tags[0].revision, "bbb");
        assert_eq!(tags[1].revision, "ccc");
        assert!(tags[1].date.is_some());
    }

    #[test]
    fn test_parse_commit_keeps_separators_in_subject() {
        let info = parse_commit_line("abc\u{1f}not-a-date\u{1f}fix: a\u{1f}b").unwrap();
        assert_eq!(info.revision, "abc");
        assert_eq!(info.date, None);
        assert_eq!(info.subject, "fix: a\u{1f}b");
        assert!(parse_commit_line("").is_none());
    }

    #[tokio::test]
    async fn test_clone_fetch_resolve_checkout() {
        let upstream = make_upstream();
        let first = run_git(upstream.path(), &["rev-parse", "HEAD"]);
        let root = tempfile::tempdir().unwrap();
        let mirror = GitMirror::new(root.path().join("repos"), "git");

        assert!(mirror.ensure_clone("foo", &binding_for(upstream.path())).await.unwrap());
        assert!(!mirror.ensure_clone("foo", &binding_for(upstream.path())).await.unwrap());
        assert_eq!(mirror.head_revision("foo").await.unwrap().as_deref(), Some(first.as_str()));

        let second = commit(upstream.path(), "second");
        run_git(upstream.path(), &["tag", "-a", "v2", "-m", "release two"]);
        mirror.fetch("foo").await.unwrap();

        let refs = vec!["origin/nope".to_string(), "origin/main".to_string()];
        assert_eq!(mirror.resolve_first("foo", &refs).await.unwrap(), second);
        // The clone's local `main` still points at `first`.
        assert_eq!(mirror.resolve_revision("foo", "main").await.unwrap(), second);
        assert_eq!(mirror.resolve_revision("foo", &first[..10]).await.unwrap(), first);

        let tags = mirror.list_tags("foo").await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "v2");
        assert_eq!(tags[0].revision, second);

        mirror.checkout("foo", &second).await.unwrap();
        assert_eq!(mirror.head_revision("foo").await.unwrap(), Some(second.clone()));

        let commits = mirror.recent_commits("foo", 50).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].revision, second);
        assert_eq!(commits[0].subject, "second");

        let described = mirror.describe("foo", &first[..10]).await.unwrap();
        assert_eq!(described.revision, first);
        assert_eq!(described.subject, "initial");
    }

    #[tokio::test]
    async fn test_clone_checks_out_pinned_revision() {
        let upstream = make_upstream();
        let first = run_git(upstream.path(), &["rev-parse", "HEAD"]);
        commit(upstream.path(), "second");
        let root = tempfile::tempdir().unwrap();
        let mirror = GitMirror::new(root.path(), "git");

        let binding = binding_for(upstream.path()).with_pinned_revision(first.clone());
        mirror.ensure_clone("foo", &binding).await.unwrap();
        assert_eq!(mirror.head_revision("foo").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_clone_failure_leaves_no_working_copy() {
        let root = tempfile::tempdir().unwrap();
        let mirror = GitMirror::new(root.path(), "git");
        let binding = RepositoryBinding::new(root.path().join("missing").to_string_lossy().into_owned());

        let err = mirror.ensure_clone("foo", &binding).await.unwrap_err();
        assert!(matches!(err, HivemindError::CloneFailed { .. }));
        assert!(!mirror.working_copy("foo").exists());
        let leftovers = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_unknown_revisions() {
        let upstream = make_upstream();
        let root = tempfile::tempdir().unwrap();
        let mirror = GitMirror::new(root.path(), "git");
        mirror.ensure_clone("foo", &binding_for(upstream.path())).await.unwrap();

        let err = mirror.resolve_revision("foo", "deadbeefdeadbeef").await.unwrap_err();
        assert!(matches!(err, HivemindError::RevisionNotFound { .. }));
        assert!(mirror.resolve_revision("foo", "--help").await.is_err());

        let refs = vec!["origin/nope".to_string()];
        let err = mirror.resolve_first("foo", &refs).await.unwrap_err();
        assert!(matches!(err, HivemindError::RevisionUnresolved { .. }));

        let err = mirror.checkout("foo", "deadbeefdeadbeef").await.unwrap_err();
        assert!(matches!(err, HivemindError::CheckoutFailed { .. }));
    }

    #[tokio::test]
    async fn test_head_revision_without_clone() {
        let root = tempfile::tempdir().unwrap();
        let mirror = GitMirror::new(root.path(), "git");
        assert_eq!(mirror.head_revision("foo").await.unwrap(), None);
        assert!(mirror.fetch("foo").await.is_err());
    }
}
