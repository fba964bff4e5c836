//! Single owner of the in-memory save record.
//!
//! Gameplay progress, backup restore and cloud sync all funnel through
//! [`SaveBook`], so the record on disk and the record in memory never drift
//! apart and every local save gets a fresh, strictly increasing stamp.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::clock::{Clock, TickSequencer};
use crate::local::{LocalSaveStore, StoreError, read_record_file, write_record_file};
use crate::record::{CharacterInfo, SaveRecord};

#[derive(Debug, Error)]
pub enum BookError {
    #[error("local save store failed: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("no save record exists yet")]
    NoRecord,
    #[error("backup file {} does not exist", .0.display())]
    BackupMissing(PathBuf),
    #[error(transparent)]
    Backup(#[from] StoreError),
}

impl BookError {
    fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store(Box::new(err))
    }
}

#[derive(Debug, Default)]
struct BookState {
    record: Option<SaveRecord>,
    sequencer: TickSequencer,
}

pub struct SaveBook<L>
where
    L: LocalSaveStore,
{
    store: L,
    clock: Arc<dyn Clock>,
    state: Mutex<BookState>,
}

impl<L> SaveBook<L>
where
    L: LocalSaveStore,
{
    /// Load whatever the store holds; the book stays empty on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn open(store: L, clock: Arc<dyn Clock>) -> Result<Self, BookError> {
        let record = store.load_record().map_err(BookError::store)?;
        let mut sequencer = TickSequencer::default();
        if let Some(existing) = &record {
            sequencer.observe(existing.saved_at_ticks);
        }
        Ok(Self {
            store,
            clock,
            state: Mutex::new(BookState { record, sequencer }),
        })
    }

    /// Load the stored record, creating and persisting a first-run record
    /// when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the new record
    /// cannot be written.
    pub fn open_or_create(store: L, clock: Arc<dyn Clock>) -> Result<Self, BookError> {
        let book = Self::open(store, clock)?;
        {
            let mut state = book.lock();
            if state.record.is_none() {
                let stamp = state.sequencer.next(book.clock.now_ticks());
                let record = SaveRecord::first_run(stamp);
                book.store.save_record(&record).map_err(BookError::store)?;
                log::info!("created first-run save record");
                state.record = Some(record);
            }
        }
        Ok(book)
    }

    /// True until a record has been persisted on this device.
    #[must_use]
    pub fn is_first_run(&self) -> bool {
        !self.store.exists()
    }

    /// Copy of the current record.
    #[must_use]
    pub fn current(&self) -> Option<SaveRecord> {
        self.lock().record.clone()
    }

    #[must_use]
    pub const fn store(&self) -> &L {
        &self.store
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Read-modify-write entry point for gameplay progress.
    ///
    /// The change is stamped and persisted before it becomes visible; if
    /// persisting fails the in-memory record is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::NoRecord`] before the first record exists, or a
    /// store error if the write fails.
    pub fn modify<T>(&self, f: impl FnOnce(&mut SaveRecord) -> T) -> Result<T, BookError> {
        let mut state = self.lock();
        let mut working = state.record.clone().ok_or(BookError::NoRecord)?;
        let out = f(&mut working);
        working.saved_at_ticks = state.sequencer.next(self.clock.now_ticks());
        self.store
            .save_record(&working)
            .map_err(BookError::store)?;
        state.record = Some(working);
        Ok(out)
    }

    /// Replace the record with one produced elsewhere, keeping its stamp.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    pub fn adopt(&self, record: SaveRecord) -> Result<(), BookError> {
        let mut state = self.lock();
        self.store.save_record(&record).map_err(BookError::store)?;
        state.sequencer.observe(record.saved_at_ticks);
        state.record = Some(record);
        Ok(())
    }

    /// # Errors
    ///
    /// See [`SaveBook::modify`].
    pub fn update_high_score(&self, score: i32) -> Result<(), BookError> {
        self.modify(|record| {
            let previous = record.score_info.high_score;
            record.score_info.high_score = score;
            log::debug!("high score updated {previous} -> {score}");
        })
    }

    /// # Errors
    ///
    /// See [`SaveBook::modify`].
    pub fn record_character(&self, character: CharacterInfo) -> Result<(), BookError> {
        self.modify(|record| record.character_info = character)
    }

    /// Write a copy of the current record to a backup file.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::NoRecord`] when there is nothing to back up, or
    /// the file error.
    pub fn export_backup(&self, path: &Path) -> Result<SaveRecord, BookError> {
        let snapshot = self.current().ok_or(BookError::NoRecord)?;
        write_record_file(path, &snapshot)?;
        log::info!("exported save backup to {}", path.display());
        Ok(snapshot)
    }

    /// Decode a backup file without touching the current record, e.g. to
    /// upload it with an explicit save.
    ///
    /// # Errors
    ///
    /// Returns [`BookError::BackupMissing`] or the file error.
    pub fn read_backup(&self, path: &Path) -> Result<SaveRecord, BookError> {
        read_record_file(path)?.ok_or_else(|| BookError::BackupMissing(path.to_path_buf()))
    }

    /// Make a backup file the current local record.
    ///
    /// # Errors
    ///
    /// Returns the read error or a store error.
    pub fn restore_backup(&self, path: &Path) -> Result<SaveRecord, BookError> {
        let record = self.read_backup(path)?;
        self.adopt(record.clone())?;
        log::info!("restored save backup from {}", path.display());
        Ok(record)
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
