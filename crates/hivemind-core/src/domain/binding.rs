//! Repository binding records persisted in the registry file.

use serde::{Deserialize, Serialize};

/// Where an artifact's source repository lives and what it is pinned to.
///
/// Serialized with the keys `remote`, `commit` and `ref_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryBinding {
    pub remote: String,

    /// Revision of the currently promoted version, if any.
    #[serde(
        rename = "commit",
        alias = "pinned_revision",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub pinned_revision: Option<String>,

    /// Named ref to clone, e.g. a release branch.
    #[serde(
        default,
        alias = "refName",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub ref_name: Option<String>,
}

impl RepositoryBinding {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            pinned_revision: None,
            ref_name: None,
        }
    }

    pub fn with_ref(mut self, ref_name: impl Into<String>) -> Self {
        self.ref_name = Some(ref_name.into());
        self
    }

    pub fn with_pinned_revision(mut self, revision: impl Into<String>) -> Self {
        self.pinned_revision = Some(revision.into());
        self
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}
