//! JsonFileStore: the queue as one JSON document on disk.
//!
//! ```json
//! { "version": 1, "entries": [ { "seq": 1, "status": "pending", "request": { ... } } ] }
//! ```
//!
//! Saves write a uniquely named temp file beside the target, fsync it, rename
//! it over the target and fsync the directory, so a crash leaves either the
//! old or the new queue.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::domain::StorageError;
use crate::ports::RequestStore;
use crate::queue::StoredEntry;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoredFileRef<'a> {
    version: u32,
    entries: &'a [StoredEntry],
}

#[derive(Deserialize)]
struct StoredFile {
    version: u32,
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "queue".to_string());
        self.path.with_file_name(format!(".{name}.{}.tmp", Ulid::new()))
    }

    async fn write_atomically(&self, payload: Vec<u8>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        let result = async {
            tokio::fs::write(&temp_path, payload).await?;
            tokio::fs::File::open(&temp_path).await?.sync_all().await?;
            tokio::fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(error) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp store file");
            }
            return Err(error.into());
        }
        self.sync_parent().await
    }

    /// Flush the rename itself to disk.
    #[cfg(unix)]
    async fn sync_parent(&self) -> Result<(), StorageError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::File::open(dir).await?.sync_all().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[async_trait]
impl RequestStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<StoredEntry>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored queue yet");
                return Ok(Vec::new());
            }
            Err(error) => return Err(error.into()),
        };

        let file: StoredFile = serde_json::from_slice(&bytes)?;
        if file.version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(file.version));
        }

        // An entry whose bookkeeping can't be read is dropped on its own.
        let mut entries = Vec::with_capacity(file.entries.len());
        for (index, raw) in file.entries.into_iter().enumerate() {
            match serde_json::from_value::<StoredEntry>(raw) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    warn!(path = %self.path.display(), index, %error, "dropping unreadable stored entry");
                }
            }
        }
        Ok(entries)
    }

    async fn save(&self, entries: &[StoredEntry]) -> Result<(), StorageError> {
        let payload = serde_json::to_vec_pretty(&StoredFileRef {
            version: FORMAT_VERSION,
            entries,
        })?;
        self.write_atomically(payload).await?;
        debug!(path = %self.path.display(), entries = entries.len(), "queue saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EntryStatus;
    use serde_json::json;

    fn stored(seq: u64) -> StoredEntry {
        StoredEntry {
            seq,
            status: EntryStatus::Pending,
            attempts: 0,
            last_failure: None,
            retry_at: None,
            request: json!({ "kind": "test.note.v1", "text": format!("n{seq}") }),
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("queue.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_replaces_whole_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("queue.json"));

        store.save(&[stored(1), stored(2)]).await.unwrap();
        store.save(&[stored(2), stored(3)]).await.unwrap();

        let loaded = store.load().await.unwrap();
        let seqs: Vec<u64> = loaded.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(loaded[1], stored(3));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("queue.json"));
        store.save(&[stored(1)]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["queue.json".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn save_syncs_the_containing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("queue.json"));
        store.save(&[stored(1)]).await.unwrap();
        store.sync_parent().await.unwrap();

        let orphan = JsonFileStore::new(dir.path().join("missing").join("queue.json"));
        assert!(matches!(orphan.sync_parent().await, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = JsonFileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, br#"{"version": 9, "entries": []}"#).unwrap();
        let err = JsonFileStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedVersion(9)));
    }

    #[tokio::test]
    async fn unreadable_entry_costs_only_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let doc = json!({
            "version": 1,
            "entries": [
                serde_json::to_value(stored(1)).unwrap(),
                { "seq": "two", "status": "pending", "request": {} },
                serde_json::to_value(stored(3)).unwrap(),
            ]
        });
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let loaded = JsonFileStore::new(path).load().await.unwrap();
        let seqs: Vec<u64> = loaded.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
    }
}
