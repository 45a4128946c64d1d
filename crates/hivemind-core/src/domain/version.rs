//! Version descriptors presented by the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a catalog entry came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    /// A tag; label is the tag name.
    Tag,
    /// A recent commit; label is the subject line.
    Commit,
    /// An analyzed revision outside both the tag set and the recent window.
    Analyzed,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKind::Tag => "tag",
            VersionKind::Commit => "commit",
            VersionKind::Analyzed => "analyzed",
        }
    }
}

/// One revision of an artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Version {
    pub revision: String,
    pub kind: VersionKind,
    pub label: String,
    pub date: Option<DateTime<Utc>>,
    /// A complete output set exists for this revision.
    pub analyzed: bool,
    /// This revision is the artifact's current version.
    pub is_active: bool,
}

impl Version {
    /// Sort tier: active, then analyzed, then everything else.
    pub fn tier(&self) -> u8 {
        if self.is_active {
            0
        } else if self.analyzed {
            1
        } else {
            2
        }
    }

    /// Case-insensitive match on a label substring or a revision prefix.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.label.to_lowercase().contains(&query) || self.revision.to_lowercase().starts_with(&query)
    }
}
