//! In-process remote service for tests and scripted runs.
//!
//! Keeps an authoritative copy of each slot plus a per-device cache that
//! only refreshes on network reads, so cache-or-network opens can return
//! stale data the way a real device does. Failures and transport conflicts
//! are injected one-shot per stage.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::clock::{Clock, SystemClock};
use crate::codec::{self, CodecError};
use crate::record::{SaveRecord, datetime_from_ticks};
use crate::remote::{
    ConflictSide, ReadPolicy, RemoteError, RemoteSaveClient, SlotCandidate, SlotConflict,
    SlotHandle, SlotMetadata, SlotOpen, TransportStatus,
};

/// Stage at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteStage {
    Open,
    Resolve,
    Read,
    Write,
}

/// One accepted commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub slot: String,
    pub payload: Vec<u8>,
    pub description: String,
    pub revision: u64,
}

impl CommitEntry {
    #[must_use]
    pub fn record(&self) -> Option<SaveRecord> {
        codec::decode_lenient(&self.payload)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCounters {
    pub opens: usize,
    pub resolves: usize,
    pub reads: usize,
    pub writes: usize,
}

#[derive(Debug, Clone)]
struct StoredSlot {
    metadata: SlotMetadata,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct RemoteState {
    authenticated: bool,
    slots: HashMap<String, StoredSlot>,
    cache: HashMap<String, StoredSlot>,
    leases: HashMap<u64, StoredSlot>,
    failures: HashMap<RemoteStage, TransportStatus>,
    conflicts: HashMap<String, VecDeque<(Vec<u8>, Vec<u8>)>>,
    commits: Vec<CommitEntry>,
    counters: RemoteCounters,
    next_lease: u64,
    next_revision: u64,
    next_conflict: u64,
    hold_commits: bool,
    parked_commits: usize,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            authenticated: true,
            slots: HashMap::new(),
            cache: HashMap::new(),
            leases: HashMap::new(),
            failures: HashMap::new(),
            conflicts: HashMap::new(),
            commits: Vec::new(),
            counters: RemoteCounters::default(),
            next_lease: 1,
            next_revision: 1,
            next_conflict: 1,
            hold_commits: false,
            parked_commits: 0,
        }
    }
}

/// Cloneable handle; clones share one service.
#[derive(Clone)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
    gate: Arc<Notify>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Service whose modification times come from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState::default())),
            gate: Arc::new(Notify::new()),
            clock,
        }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.lock().authenticated = authenticated;
    }

    /// Store a payload on the service and in the device cache.
    pub fn seed_slot(&self, slot: &str, payload: Vec<u8>) {
        let mut state = self.lock();
        let stored = self.stored(&mut state, slot, payload, None);
        state.cache.insert(slot.to_string(), stored.clone());
        state.slots.insert(slot.to_string(), stored);
    }

    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn seed_record(&self, slot: &str, record: &SaveRecord) -> Result<(), CodecError> {
        self.seed_slot(slot, codec::encode(record)?);
        Ok(())
    }

    /// Overwrite only the device cache, leaving the service copy as is.
    pub fn seed_stale_cache(&self, slot: &str, payload: Vec<u8>) {
        let mut state = self.lock();
        let stored = self.stored(&mut state, slot, payload, None);
        state.cache.insert(slot.to_string(), stored);
    }

    /// Make the next `open_slot` on `slot` report a transport conflict.
    /// Queued conflicts surface one per open or resolve.
    pub fn push_conflict(&self, slot: &str, original: Vec<u8>, unmerged: Vec<u8>) {
        self.lock()
            .conflicts
            .entry(slot.to_string())
            .or_default()
            .push_back((original, unmerged));
    }

    /// # Errors
    ///
    /// Returns an error if either record cannot be encoded.
    pub fn push_record_conflict(
        &self,
        slot: &str,
        original: &SaveRecord,
        unmerged: &SaveRecord,
    ) -> Result<(), CodecError> {
        self.push_conflict(slot, codec::encode(original)?, codec::encode(unmerged)?);
        Ok(())
    }

    /// Fail the next call at `stage` with `status`.
    pub fn fail_next(&self, stage: RemoteStage, status: TransportStatus) {
        self.lock().failures.insert(stage, status);
    }

    /// Park commits until [`MemoryRemote::release_commits`].
    pub fn hold_commits(&self) {
        self.lock().hold_commits = true;
    }

    pub fn release_commits(&self) {
        self.lock().hold_commits = false;
        self.gate.notify_waiters();
    }

    /// Commits currently parked by [`MemoryRemote::hold_commits`].
    #[must_use]
    pub fn parked_commits(&self) -> usize {
        self.lock().parked_commits
    }

    /// Handles still able to read or commit.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.lock().leases.len()
    }

    #[must_use]
    pub fn slot_payload(&self, slot: &str) -> Option<Vec<u8>> {
        self.lock().slots.get(slot).map(|stored| stored.payload.clone())
    }

    #[must_use]
    pub fn slot_record(&self, slot: &str) -> Option<SaveRecord> {
        self.slot_payload(slot)
            .and_then(|payload| codec::decode_lenient(&payload))
    }

    #[must_use]
    pub fn slot_metadata(&self, slot: &str) -> Option<SlotMetadata> {
        self.lock().slots.get(slot).map(|stored| stored.metadata.clone())
    }

    #[must_use]
    pub fn commits(&self) -> Vec<CommitEntry> {
        self.lock().commits.clone()
    }

    #[must_use]
    pub fn counters(&self) -> RemoteCounters {
        self.lock().counters
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        datetime_from_ticks(self.clock.now_ticks()).unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn stored(
        &self,
        state: &mut RemoteState,
        slot: &str,
        payload: Vec<u8>,
        description: Option<String>,
    ) -> StoredSlot {
        let revision = state.next_revision;
        state.next_revision += 1;
        let content_digest = (!payload.is_empty()).then(|| codec::payload_digest(&payload));
        StoredSlot {
            metadata: SlotMetadata {
                slot: slot.to_string(),
                last_modified: self.now(),
                description,
                revision,
                content_digest,
            },
            payload,
        }
    }

    fn take_failure(state: &mut RemoteState, stage: RemoteStage) -> Result<(), RemoteError> {
        match state.failures.remove(&stage) {
            Some(status) => Err(RemoteError::new(
                status,
                format!("injected failure at {stage:?}"),
            )),
            None => Ok(()),
        }
    }

    fn open_locked(
        &self,
        state: &mut RemoteState,
        name: &str,
        policy: ReadPolicy,
    ) -> SlotOpen {
        if let Some((original, unmerged)) = state
            .conflicts
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            let id = format!("conflict-{}", state.next_conflict);
            state.next_conflict += 1;
            let original = self.stored(state, name, original, None);
            let unmerged = self.stored(state, name, unmerged, None);
            return SlotOpen::Conflict(SlotConflict {
                id,
                original: SlotCandidate {
                    metadata: original.metadata,
                    payload: original.payload,
                },
                unmerged: SlotCandidate {
                    metadata: unmerged.metadata,
                    payload: unmerged.payload,
                },
            });
        }

        let cached = match policy {
            ReadPolicy::CacheOrNetwork => state.cache.get(name).cloned(),
            ReadPolicy::NetworkOnly => None,
        };
        let current = match cached {
            Some(stored) => stored,
            None => {
                if !state.slots.contains_key(name) {
                    let created = self.stored(state, name, Vec::new(), None);
                    state.slots.insert(name.to_string(), created);
                }
                let stored = state.slots[name].clone();
                state.cache.insert(name.to_string(), stored.clone());
                stored
            }
        };

        // A newer open supersedes any lease still held on the same slot.
        state
            .leases
            .retain(|_, held| held.metadata.slot != current.metadata.slot);
        let lease = state.next_lease;
        state.next_lease += 1;
        let handle = SlotHandle::new(current.metadata.clone(), lease);
        state.leases.insert(lease, current);
        SlotOpen::Opened(handle)
    }
}

#[async_trait]
impl RemoteSaveClient for MemoryRemote {
    fn is_authenticated(&self) -> bool {
        self.lock().authenticated
    }

    async fn open_slot(&self, name: &str, policy: ReadPolicy) -> Result<SlotOpen, RemoteError> {
        let mut state = self.lock();
        state.counters.opens += 1;
        Self::take_failure(&mut state, RemoteStage::Open)?;
        Ok(self.open_locked(&mut state, name, policy))
    }

    async fn resolve_conflict(
        &self,
        conflict: SlotConflict,
        side: ConflictSide,
    ) -> Result<SlotOpen, RemoteError> {
        let mut state = self.lock();
        state.counters.resolves += 1;
        Self::take_failure(&mut state, RemoteStage::Resolve)?;
        let chosen = conflict.candidate(side).clone();
        let slot = chosen.metadata.slot.clone();
        let settled = self.stored(&mut state, &slot, chosen.payload, None);
        state.cache.insert(slot.clone(), settled.clone());
        state.slots.insert(slot.clone(), settled);
        Ok(self.open_locked(&mut state, &slot, ReadPolicy::NetworkOnly))
    }

    async fn read_binary(&self, handle: &SlotHandle) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.lock();
        state.counters.reads += 1;
        Self::take_failure(&mut state, RemoteStage::Read)?;
        state
            .leases
            .get(&handle.lease())
            .map(|stored| stored.payload.clone())
            .ok_or_else(|| RemoteError::new(TransportStatus::BadInput, "unknown slot handle"))
    }

    async fn write_binary(
        &self,
        handle: SlotHandle,
        payload: Vec<u8>,
        description: String,
    ) -> Result<SlotMetadata, RemoteError> {
        loop {
            let released = self.gate.notified();
            {
                let mut state = self.lock();
                if !state.hold_commits {
                    break;
                }
                state.parked_commits += 1;
            }
            released.await;
            self.lock().parked_commits -= 1;
        }

        let mut state = self.lock();
        state.counters.writes += 1;
        Self::take_failure(&mut state, RemoteStage::Write)?;
        if state.leases.remove(&handle.lease()).is_none() {
            return Err(RemoteError::new(
                TransportStatus::BadInput,
                "slot handle already committed or unknown",
            ));
        }
        let slot = handle.metadata().slot.clone();
        let stored = self.stored(&mut state, &slot, payload, Some(description.clone()));
        state.commits.push(CommitEntry {
            slot: slot.clone(),
            payload: stored.payload.clone(),
            description,
            revision: stored.metadata.revision,
        });
        let metadata = stored.metadata.clone();
        state.cache.insert(slot.clone(), stored.clone());
        state.slots.insert(slot, stored);
        Ok(metadata)
    }
}
