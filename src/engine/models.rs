use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A released build as described by the version endpoint and the local state file.
///
/// Records are never edited in place; a newer release replaces the whole value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    id: String,
    version: String,
    release_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
}

impl VersionRecord {
    pub fn new(id: impl Into<String>, version: impl Into<String>, release_date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            release_date,
            sha256: None,
        }
    }

    /// Attach the expected SHA-256 digest (hex) of the release archive.
    #[cfg(test)]
    #[must_use]
    pub fn with_sha256(self, digest: impl Into<String>) -> Self {
        Self {
            sha256: Some(digest.into()),
            ..self
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release_date(&self) -> NaiveDate {
        self.release_date
    }

    pub fn sha256(&self) -> Option<&str> {
        self.sha256
            .as_deref()
            .map(str::trim)
            .filter(|digest| !digest.is_empty())
    }

    /// True for the placeholder used when nothing is installed yet.
    pub fn is_sentinel(&self) -> bool {
        self.id.is_empty() && self.version.is_empty()
    }
}
