use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::engine::models::VersionRecord;
use crate::error::PersistenceError;

/// Owns the single JSON file recording which release is installed.
#[derive(Clone, Debug)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the installed record. A missing file yields the sentinel record.
    pub async fn load(&self) -> Result<VersionRecord, PersistenceError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("store: no state at {}, nothing installed", self.path.display());
                return Ok(VersionRecord::default());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the state file with `record` in one step.
    ///
    /// The JSON is written and flushed to a sibling file which is then renamed
    /// over the target, so readers see either the old or the new record.
    pub async fn save(&self, record: &VersionRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(record).map_err(PersistenceError::Encode)?;
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let staged = self.staging_path();
        if let Err(err) = write_synced(&staged, &json).await {
            discard(&staged).await;
            return Err(write_err(err));
        }
        if let Err(err) = fs::rename(&staged, &self.path).await {
            discard(&staged).await;
            return Err(write_err(err));
        }
        debug!("store: saved version {} to {}", record.version(), self.path.display());
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.path.file_name().unwrap_or(OsStr::new("state")));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await
        && err.kind() != ErrorKind::NotFound
    {
        warn!("store: failed to remove {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn record(id: &str, version: &str) -> VersionRecord {
        VersionRecord::new(id, version, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn missing_file_loads_sentinel() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(dir.path().join("localVersion.json"));
        let loaded = store.load().await.unwrap();
        assert!(loaded.is_sentinel());
        assert_eq!(loaded, VersionRecord::default());
    }

    #[tokio::test]
    async fn saved_record_loads_back_equal() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(dir.path().join("localVersion.json"));
        let original = record("5", "2.0.0").with_sha256("00ff");
        store.save(&original).await.unwrap();
        assert_eq!(store.load().await.unwrap(), original);
    }

    #[tokio::test]
    async fn save_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("localVersion.json");
        let store = VersionStore::new(&path);
        store.save(&record("4", "1.9.0-with-a-much-longer-label")).await.unwrap();
        store.save(&record("5", "2.0.0")).await.unwrap();

        assert_eq!(store.load().await.unwrap(), record("5", "2.0.0"));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("longer-label"));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![OsString::from("localVersion.json")]);
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(dir.path().join("nested").join("state.json"));
        store.save(&record("1", "1.0.0")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), record("1", "1.0.0"));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("localVersion.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = VersionStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, PersistenceError::Parse { .. }));
    }

    #[tokio::test]
    async fn unwritable_location_is_a_write_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let store = VersionStore::new(blocker.join("state.json"));
        let err = store.save(&record("1", "1.0.0")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Write { .. }));
    }
}
