use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::conflict::{CloudOffer, OperationKind, SaveConflict, SlotConflictView};
use crate::record::SaveRecord;
use crate::remote::{RemoteError, SlotMetadata, TransportStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("remote player is not authenticated")]
    NotAuthenticated,
    #[error("another cloud operation is already in progress")]
    OperationInProgress,
    #[error("failed to open remote slot: {0}")]
    TransportOpenFailed(RemoteError),
    #[error("failed to read remote slot: {0}")]
    TransportReadFailed(RemoteError),
    #[error("failed to commit remote slot: {0}")]
    TransportWriteFailed(RemoteError),
    #[error("cloud record could not be decoded: {0}")]
    DecodeFailed(String),
    #[error("local record could not be encoded: {0}")]
    EncodeFailed(String),
    #[error("cancelled by user")]
    UserCancelled,
    #[error("no local record to upload")]
    NoLocalRecord,
    #[error("local save store failed: {0}")]
    LocalStore(String),
    #[error("no conflict decision is pending")]
    NoPendingDecision,
    #[error("no cloud operation to cancel")]
    NothingToCancel,
    #[error("operation ended without reporting a result")]
    Interrupted,
}

impl SyncError {
    /// Transport status carried by transport failures.
    #[must_use]
    pub const fn status(&self) -> Option<TransportStatus> {
        match self {
            Self::TransportOpenFailed(err)
            | Self::TransportReadFailed(err)
            | Self::TransportWriteFailed(err) => Some(err.status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncSuccess {
    /// Local record uploaded.
    Committed { metadata: SlotMetadata },
    /// Save resolved in favour of the cloud; the device now holds `record`.
    KeptCloud { record: SaveRecord },
    /// Load found an empty slot.
    NoRemoteData,
    /// Load replaced the device record with `record`.
    AppliedCloud { record: SaveRecord },
    /// Load finished with the device record untouched.
    KeptLocal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub kind: OperationKind,
    pub result: Result<SyncSuccess, SyncError>,
}

impl OperationOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SaveSucceeded(SyncSuccess),
    SaveFailed(SyncError),
    SaveConflictDetected(SaveConflict),
    LoadSucceeded(SyncSuccess),
    LoadFailed(SyncError),
    SlotConflictDetected(SlotConflictView),
    CloudRecordOffered(CloudOffer),
}

impl SyncEvent {
    pub(crate) fn finished(kind: OperationKind, result: Result<SyncSuccess, SyncError>) -> Self {
        match (kind, result) {
            (OperationKind::Save, Ok(success)) => Self::SaveSucceeded(success),
            (OperationKind::Save, Err(err)) => Self::SaveFailed(err),
            (OperationKind::Load, Ok(success)) => Self::LoadSucceeded(success),
            (OperationKind::Load, Err(err)) => Self::LoadFailed(err),
        }
    }

    /// Terminal outcome carried by this event, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<OperationOutcome> {
        let (kind, result) = match self {
            Self::SaveSucceeded(success) => (OperationKind::Save, Ok(success.clone())),
            Self::SaveFailed(err) => (OperationKind::Save, Err(err.clone())),
            Self::LoadSucceeded(success) => (OperationKind::Load, Ok(success.clone())),
            Self::LoadFailed(err) => (OperationKind::Load, Err(err.clone())),
            Self::SaveConflictDetected(_)
            | Self::SlotConflictDetected(_)
            | Self::CloudRecordOffered(_) => return None,
        };
        Some(OperationOutcome { kind, result })
    }
}

/// Identifier of one accepted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub(crate) u64);

impl OperationId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolves to the outcome of one accepted save or load.
#[derive(Debug)]
#[must_use = "dropping the handle does not cancel the operation; await it or call cancel()"]
pub struct OperationHandle {
    id: OperationId,
    kind: OperationKind,
    done: oneshot::Receiver<OperationOutcome>,
}

impl OperationHandle {
    pub(crate) const fn new(
        id: OperationId,
        kind: OperationKind,
        done: oneshot::Receiver<OperationOutcome>,
    ) -> Self {
        Self { id, kind, done }
    }

    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Future for OperationHandle {
    type Output = OperationOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let kind = self.kind;
        match Pin::new(&mut self.done).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(OperationOutcome {
                kind,
                result: Err(SyncError::Interrupted),
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}
