//! Version catalog: tags, recent commits and analyzed revisions, merged and
//! ordered for presentation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::domain::error::Result;
use crate::domain::version::{Version, VersionKind};
use crate::git::SourceMirror;
use crate::store::VersionStore;

#[derive(Clone)]
pub struct VersionCatalog {
    mirror: Arc<dyn SourceMirror>,
    store: VersionStore,
    recent_window: usize,
}

impl VersionCatalog {
    pub fn new(mirror: Arc<dyn SourceMirror>, store: VersionStore, recent_window: usize) -> Self {
        Self {
            mirror,
            store,
            recent_window,
        }
    }

    /// All known versions of `artifact`, sorted by [`sort_versions`].
    ///
    /// A revision both tagged and recent appears once, as the tag. Analyzed
    /// revisions outside both windows are described individually so they
    /// stay visible. Without a working copy only analyzed revisions are listed.
    pub async fn list(&self, artifact: &str) -> Result<Vec<Version>> {
        let analyzed = self.store.analyzed_revisions(artifact)?;
        let current = self.store.current_revision(artifact)?;
        let cloned = self.mirror.head_revision(artifact).await?.is_some();

        let mut versions: Vec<Version> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut insert = |versions: &mut Vec<Version>, version: Version| {
            if !index.contains_key(&version.revision) {
                index.insert(version.revision.clone(), versions.len());
                versions.push(version);
            }
        };

        if cloned {
            for tag in self.mirror.list_tags(artifact).await? {
                insert(
                    &mut versions,
                    Version {
                        revision: tag.revision,
                        kind: VersionKind::Tag,
                        label: tag.name,
                        date: tag.date,
                        analyzed: false,
                        is_active: false,
                    },
                );
            }
            for commit in self
                .mirror
                .recent_commits(artifact, self.recent_window)
                .await?
            {
                insert(
                    &mut versions,
                    Version {
                        revision: commit.revision,
                        kind: VersionKind::Commit,
                        label: commit.subject,
                        date: commit.date,
                        analyzed: false,
                        is_active: false,
                    },
                );
            }
        }

        let known: Vec<String> = versions.iter().map(|v| v.revision.clone()).collect();
        let stragglers = analyzed
            .iter()
            .chain(current.iter())
            .filter(|rev| !known.contains(rev))
            .cloned()
            .collect::<Vec<_>>();
        for revision in stragglers {
            let described = if cloned {
                self.mirror.describe(artifact, &revision).await.ok()
            } else {
                None
            };
            if described.is_none() {
                debug!(artifact, %revision, "analyzed revision not found in working copy");
            }
            let (label, date) = described
                .map(|info| (info.subject, info.date))
                .unwrap_or_default();
            insert(
                &mut versions,
                Version {
                    revision,
                    kind: VersionKind::Analyzed,
                    label,
                    date,
                    analyzed: false,
                    is_active: false,
                },
            );
        }

        for version in &mut versions {
            version.analyzed = analyzed.contains(&version.revision);
            version.is_active = current.as_deref() == Some(version.revision.as_str());
        }
        sort_versions(&mut versions);
        Ok(versions)
    }
}

fn kind_rank(kind: VersionKind) -> u8 {
    match kind {
        VersionKind::Tag => 0,
        VersionKind::Commit => 1,
        VersionKind::Analyzed => 2,
    }
}

/// Active first, then analyzed, then the rest; newest first within a tier.
/// Undated entries sink to the end of their tier; remaining ties put tags
/// first, then order by revision id.
pub fn sort_versions(versions: &mut [Version]) {
    versions.sort_by(|a, b| {
        a.tier()
            .cmp(&b.tier())
            .then_with(|| match (&a.date, &b.date) {
                (Some(x), Some(y)) => y.cmp(x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
            .then_with(|| a.revision.cmp(&b.revision))
    });
}

/// Versions matching `query` (label substring or revision prefix), order kept.
pub fn filter_versions(versions: &[Version], query: &str) -> Vec<Version> {
    versions.iter().filter(|v| v.matches(query)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputSet, PointerKind};
    use crate::domain::binding::RepositoryBinding;
    use crate::domain::error::HivemindError;
    use crate::git::{CommitInfo, TagInfo};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::path::PathBuf;

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap())
    }

    fn version(revision: &str, analyzed: bool, is_active: bool, day: u32) -> Version {
        Version {
            revision: revision.to_string(),
            kind: VersionKind::Commit,
            label: revision.to_string(),
            date: at(day),
            analyzed,
            is_active,
        }
    }

    #[test]
    fn test_sort_tiers_before_dates() {
        let mut versions = vec![
            version("A", true, false, 2),
            version("B", true, true, 1),
            version("C", false, false, 3),
        ];
        sort_versions(&mut versions);
        let order: Vec<_> = versions.iter().map(|v| v.revision.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_sort_ties_and_missing_dates() {
        let mut untagged = version("bbb", false, false, 5);
        untagged.kind = VersionKind::Commit;
        let mut tagged = version("ccc", false, false, 5);
        tagged.kind = VersionKind::Tag;
        let mut undated = version("aaa", false, false, 1);
        undated.date = None;
        let mut versions = vec![undated, untagged, tagged, version("ddd", false, false, 4)];

        sort_versions(&mut versions);
        let order: Vec<_> = versions.iter().map(|v| v.revision.as_str()).collect();
        assert_eq!(order, vec!["ccc", "bbb", "ddd", "aaa"]);
    }

    #[test]
    fn test_filter_versions() {
        let versions = vec![version("abc123", false, false, 1), version("def456", false, false, 2)];
        let hits = filter_versions(&versions, "DEF");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].revision, "def456");
    }

    struct FakeMirror {
        tags: Vec<TagInfo>,
        commits: Vec<CommitInfo>,
    }

    #[async_trait]
    impl SourceMirror for FakeMirror {
        fn working_copy(&self, artifact: &str) -> PathBuf {
            PathBuf::from("/nonexistent").join(artifact)
        }
        async fn ensure_clone(&self, _: &str, _: &RepositoryBinding) -> Result<bool> {
            Ok(false)
        }
        async fn fetch(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn resolve_first(&self, _: &str, _: &[String]) -> Result<String> {
            Ok("c3".to_string())
        }
        async fn resolve_revision(&self, _: &str, revision: &str) -> Result<String> {
            Ok(revision.to_string())
        }
        async fn head_revision(&self, _: &str) -> Result<Option<String>> {
            Ok(Some("c3".to_string()))
        }
        async fn checkout(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn list_tags(&self, _: &str) -> Result<Vec<TagInfo>> {
            Ok(self.tags.clone())
        }
        async fn recent_commits(&self, _: &str, limit: usize) -> Result<Vec<CommitInfo>> {
            Ok(self.commits.iter().take(limit).cloned().collect())
        }
        async fn describe(&self, artifact: &str, revision: &str) -> Result<CommitInfo> {
            if revision == "old" {
                Ok(CommitInfo {
                    revision: revision.to_string(),
                    date: at(1),
                    subject: "ancient".to_string(),
                })
            } else {
                Err(HivemindError::RevisionNotFound {
                    artifact: artifact.to_string(),
                    revision: revision.to_string(),
                })
            }
        }
    }

    fn commit(revision: &str, day: u32) -> CommitInfo {
        CommitInfo {
            revision: revision.to_string(),
            date: at(day),
            subject: format!("commit {revision}"),
        }
    }

    fn analyzed_store(dir: &std::path::Path, revisions: &[&str], current: &str) -> VersionStore {
        let store = VersionStore::new(dir.join("experts"), OutputSet::default(), PointerKind::File);
        for rev in revisions {
            let staged = dir.join(format!("staged-{rev}"));
            std::fs::create_dir_all(&staged).unwrap();
            for name in OutputSet::default().all() {
                std::fs::write(staged.join(name), "x").unwrap();
            }
            store.install_files("foo", rev, &staged).unwrap();
        }
        store.repoint("foo", current).unwrap();
        store
    }

    #[tokio::test]
    async fn test_list_merges_tags_commits_and_analyzed() {
        let dir = tempfile::tempdir().unwrap();
        let store = analyzed_store(dir.path(), &["c1", "old"], "c1");
        let mirror = FakeMirror {
            tags: vec![TagInfo {
                name: "v1.0".to_string(),
                revision: "c2".to_string(),
                date: at(2),
            }],
            commits: vec![commit("c3", 3), commit("c2", 2), commit("c1", 1)],
        };
        let catalog = VersionCatalog::new(Arc::new(mirror), store, 50);

        let versions = catalog.list("foo").await.unwrap();
        let order: Vec<_> = versions.iter().map(|v| v.revision.as_str()).collect();
        assert_eq!(order, vec!["c1", "old", "c3", "c2"]);

        assert!(versions[0].is_active && versions[0].analyzed);
        assert_eq!(versions[1].kind, VersionKind::Analyzed);
        assert_eq!(versions[1].label, "ancient");
        let tagged = versions.iter().find(|v| v.revision == "c2").unwrap();
        assert_eq!(tagged.kind, VersionKind::Tag);
        assert_eq!(tagged.label, "v1.0");
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_list_respects_recent_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = analyzed_store(dir.path(), &["c1"], "c1");
        let mirror = FakeMirror {
            tags: Vec::new(),
            commits: vec![commit("c3", 3), commit("c2", 2), commit("c1", 1)],
        };
        let catalog = VersionCatalog::new(Arc::new(mirror), store, 1);

        let versions = catalog.list("foo").await.unwrap();
        let order: Vec<_> = versions.iter().map(|v| v.revision.as_str()).collect();
        assert_eq!(order, vec!["c1", "c3"]);
        assert_eq!(versions[0].kind, VersionKind::Analyzed);
    }
}
