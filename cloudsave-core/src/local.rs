//! Local persistence of the single save record.
use std::convert::Infallible;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::constants::SAVE_FILE_NAME;
use crate::record::SaveRecord;

/// Trait for abstracting local save storage.
/// Platform-specific implementations should provide this
pub trait LocalSaveStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the persisted record, `None` when nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or decoded.
    fn load_record(&self) -> Result<Option<SaveRecord>, Self::Error>;

    /// Persist the record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save_record(&self, record: &SaveRecord) -> Result<(), Self::Error>;

    /// Whether a record has ever been persisted (false on first run).
    fn exists(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} does not hold a save record: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("failed encoding record for {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
}

/// Read a record file; a missing file is `Ok(None)`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or decoded.
pub fn read_record_file(path: &Path) -> Result<Option<SaveRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    codec::decode(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a record file through a temp file and rename.
///
/// # Errors
///
/// Returns an error if encoding or any filesystem step fails.
pub fn write_record_file(path: &Path, record: &SaveRecord) -> Result<(), StoreError> {
    let bytes = codec::encode(record).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes_atomic(path, &bytes).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, bytes)?;
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(SAVE_FILE_NAME);
    path.with_file_name(format!("{file_name}.tmp"))
}

/// Save record kept in a single JSON file.
#[derive(Debug, Clone)]
pub struct FileSaveStore {
    path: PathBuf,
}

impl FileSaveStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/game_info.json`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SAVE_FILE_NAME))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocalSaveStore for FileSaveStore {
    type Error = StoreError;

    fn load_record(&self) -> Result<Option<SaveRecord>, Self::Error> {
        read_record_file(&self.path)
    }

    fn save_record(&self, record: &SaveRecord) -> Result<(), Self::Error> {
        write_record_file(&self.path, record)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[derive(Debug, Default)]
struct MemorySlot {
    record: Option<SaveRecord>,
    writes: usize,
}

/// In-memory store; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemorySaveStore {
    slot: Arc<Mutex<MemorySlot>>,
}

impl MemorySaveStore {
    #[must_use]
    pub fn with_record(record: SaveRecord) -> Self {
        let store = Self::default();
        store.lock().record = Some(record);
        store
    }

    /// Record currently persisted.
    #[must_use]
    pub fn snapshot(&self) -> Option<SaveRecord> {
        self.lock().record.clone()
    }

    /// Number of `save_record` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalSaveStore for MemorySaveStore {
    type Error = Infallible;

    fn load_record(&self) -> Result<Option<SaveRecord>, Self::Error> {
        Ok(self.snapshot())
    }

    fn save_record(&self, record: &SaveRecord) -> Result<(), Self::Error> {
        let mut slot = self.lock();
        slot.record = Some(record.clone());
        slot.writes += 1;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.lock().record.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "cloudsave-local-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn file_store_reports_first_run_until_saved() {
        let dir = temp_dir("first-run");
        let store = FileSaveStore::in_dir(&dir);
        assert!(!store.exists());
        assert!(store.load_record().unwrap().is_none());

        let record = SaveRecord::first_run(7);
        store.save_record(&record).unwrap();
        assert!(store.exists());
        assert_eq!(store.load_record().unwrap(), Some(record));
        assert!(!dir.join("game_info.json.tmp").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = temp_dir("garbage");
        fs::create_dir_all(&dir).unwrap();
        let store = FileSaveStore::in_dir(&dir);
        fs::write(store.path(), b"not a record").unwrap();
        let err = store.load_record().unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
        assert!(err.to_string().contains("game_info.json"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemorySaveStore::default();
        let other = store.clone();
        assert!(!other.exists());
        store.save_record(&SaveRecord::first_run(1)).unwrap();
        assert!(other.exists());
        assert_eq!(other.writes(), 1);
    }
}
