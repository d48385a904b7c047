use crate::error::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const CACHE_FILE: &str = "opendtu-cache.json";

/// Raw payloads of the last successful refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedData {
    pub dtu: Value,
    #[serde(default)]
    pub power_draw: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub data: CachedData,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}

/// File-backed store for the last good [`CacheEntry`].
///
/// Lives in the local cache directory, never in the synced settings location.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn cache_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dtuwidget")
            .join(CACHE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored entry with `data`, stamped with the current time.
    ///
    /// Errors are logged here; callers may inspect the result but must not
    /// fail because of it.
    pub fn save(&self, data: &CachedData) -> Result<(), StorageError> {
        self.save_at(data, Utc::now())
    }

    pub fn save_at(&self, data: &CachedData, timestamp: DateTime<Utc>) -> Result<(), StorageError> {
        let entry = CacheEntry {
            timestamp,
            data: data.clone(),
        };
        let result = self.write(&entry);
        match &result {
            Ok(()) => debug!(path = %self.path.display(), "cache updated"),
            Err(e) => warn!("failed to write cache: {}", e),
        }
        result
    }

    fn write(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let content = serde_json::to_string(entry).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &content).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Read the stored entry. Unreadable or corrupt files count as absent.
    pub fn load(&self) -> Option<CacheEntry> {
        match self.try_load() {
            Ok(entry) => entry,
            Err(e) => {
                warn!("ignoring unreadable cache: {}", e);
                None
            }
        }
    }

    pub fn try_load(&self) -> Result<Option<CacheEntry>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StorageError::Json {
                path: self.path.clone(),
                source,
            })
    }
}

/// Atomic write: write to a uniquely named temp file in the target directory,
/// then rename it over `path`. Concurrent writers never share a temp file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> CachedData {
        CachedData {
            dtu: json!({"inverters": [{"producing": true, "AC": {"0": {"Power": {"v": 312.5}}}}]}),
            power_draw: Some(json!({"meters": [{"power": 123.4}]})),
        }
    }

    #[test]
    fn test_missing_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_round_trip_preserves_data() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("nested").join("cache.json"));
        let data = sample();

        store.save(&data).unwrap();
        let entry = store.load().unwrap();

        assert_eq!(entry.data, data);
        assert_eq!(
            serde_json::to_string(&entry.data).unwrap(),
            serde_json::to_string(&data).unwrap()
        );
    }

    #[test]
    fn test_document_layout() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        let data = CachedData {
            dtu: json!({"inverters": []}),
            power_draw: None,
        };
        let ts = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        store.save_at(&data, ts).unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(
            raw,
            json!({"timestamp": 1_700_000_000_123i64, "data": {"dtu": {"inverters": []}, "powerDraw": null}})
        );
    }

    #[test]
    fn test_save_replaces_whole_entry() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));
        store.save(&sample()).unwrap();

        let second = CachedData {
            dtu: json!({"inverters": []}),
            power_draw: None,
        };
        store.save(&second).unwrap();

        assert_eq!(store.load().unwrap().data, second);
    }

    #[test]
    fn test_corrupt_file_is_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{\"timestamp\": \"yesterday\"").unwrap();
        let store = CacheStore::new(path);

        assert!(store.load().is_none());
        assert!(matches!(store.try_load(), Err(StorageError::Json { .. })));
    }

    #[test]
    fn test_concurrent_saves_do_not_fail() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("cache.json"));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| store.save(&sample()).is_err())
                        .count()
                })
            })
            .collect();
        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(failures, 0);
        assert_eq!(store.load().unwrap().data, sample());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name != "cache.json")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[test]
    fn test_write_failure_is_returned_not_raised() {
        let dir = TempDir::new().unwrap();
        // Parent "directory" is a regular file, so create_dir_all fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = CacheStore::new(blocker.join("cache.json"));

        assert!(matches!(store.save(&sample()), Err(StorageError::Io { .. })));
    }
}
