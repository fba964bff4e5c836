//! Contract for the platform's remote saved-game service.
//!
//! The service exposes named slots. Opening a slot either yields a handle
//! or a transport-level conflict between two candidate versions that the
//! caller must settle with [`RemoteSaveClient::resolve_conflict`] before the
//! open can complete.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::codec;
use crate::record::SaveRecord;

/// Where an open may read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Device cache is acceptable; may be stale.
    CacheOrNetwork,
    /// Always ask the service.
    NetworkOnly,
}

/// Transport status codes reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    Timeout,
    Internal,
    Authentication,
    BadInput,
}

impl TransportStatus {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Authentication => "authentication",
            Self::BadInput => "bad_input",
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct RemoteError {
    pub status: TransportStatus,
    pub message: String,
}

impl RemoteError {
    #[must_use]
    pub fn new(status: TransportStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMetadata {
    pub slot: String,
    pub last_modified: DateTime<Utc>,
    pub description: Option<String>,
    pub revision: u64,
    pub content_digest: Option<String>,
}

/// Open slot, valid for one read and at most one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotHandle {
    metadata: SlotMetadata,
    lease: u64,
}

impl SlotHandle {
    #[must_use]
    pub const fn new(metadata: SlotMetadata, lease: u64) -> Self {
        Self { metadata, lease }
    }

    #[must_use]
    pub const fn metadata(&self) -> &SlotMetadata {
        &self.metadata
    }

    /// Adapter-specific identifier of this open.
    #[must_use]
    pub const fn lease(&self) -> u64 {
        self.lease
    }
}

/// One version of the slot offered during a transport conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCandidate {
    pub metadata: SlotMetadata,
    pub payload: Vec<u8>,
}

impl SlotCandidate {
    /// Decoded record, `None` for an empty or corrupt payload.
    #[must_use]
    pub fn record(&self) -> Option<SaveRecord> {
        codec::decode_lenient(&self.payload)
    }
}

/// Two versions of one slot the service could not merge. The pair is
/// positional; which side is "cloud" depends on the operation that hit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConflict {
    pub id: String,
    pub original: SlotCandidate,
    pub unmerged: SlotCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictSide {
    Original,
    Unmerged,
}

impl SlotConflict {
    #[must_use]
    pub const fn candidate(&self, side: ConflictSide) -> &SlotCandidate {
        match side {
            ConflictSide::Original => &self.original,
            ConflictSide::Unmerged => &self.unmerged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOpen {
    Opened(SlotHandle),
    Conflict(SlotConflict),
}

/// Remote saved-game service.
#[async_trait]
pub trait RemoteSaveClient: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Open the named slot, creating it empty when absent.
    async fn open_slot(&self, name: &str, policy: ReadPolicy) -> Result<SlotOpen, RemoteError>;

    /// Settle a conflict with the chosen candidate; the open re-runs and may
    /// surface another conflict.
    async fn resolve_conflict(
        &self,
        conflict: SlotConflict,
        side: ConflictSide,
    ) -> Result<SlotOpen, RemoteError>;

    async fn read_binary(&self, handle: &SlotHandle) -> Result<Vec<u8>, RemoteError>;

    /// Commit a new payload, consuming the handle.
    async fn write_binary(
        &self,
        handle: SlotHandle,
        payload: Vec<u8>,
        description: String,
    ) -> Result<SlotMetadata, RemoteError>;
}
