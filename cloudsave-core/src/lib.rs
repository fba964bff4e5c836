//! Cloud save core
//!
//! Platform-agnostic save synchronization for the merge game client: the
//! persisted record, its local store, the remote slot contract and the
//! synchronizer that reconciles the two with a human in the loop.
//! Rendering and platform SDKs stay outside; they plug in through
//! [`LocalSaveStore`], [`RemoteSaveClient`] and [`ConflictSurface`].

pub mod book;
pub mod clock;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod local;
pub mod memory_remote;
pub mod record;
pub mod remote;
pub mod surface;
pub mod sync;

// Re-export commonly used types
pub use book::{BookError, SaveBook};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CodecError, decode, decode_lenient, encode, payload_digest};
pub use config::{ConfigError, SyncConfig};
pub use conflict::{
    CloudOffer, ConflictContext, LabeledCandidate, LoadChoice, OperationKind, SaveChoice,
    SaveConflict, SlotChoice, SlotConflictView,
};
pub use local::{FileSaveStore, LocalSaveStore, MemorySaveStore, StoreError};
pub use memory_remote::{CommitEntry, MemoryRemote, RemoteCounters, RemoteStage};
pub use record::{CharacterInfo, SaveRecord, ScoreInfo, StageInfo};
pub use remote::{
    ConflictSide, ReadPolicy, RemoteError, RemoteSaveClient, SlotCandidate, SlotConflict,
    SlotHandle, SlotMetadata, SlotOpen, TransportStatus,
};
pub use surface::{ConflictPanelView, ConflictSurface, PanelColumn, attach_surface};
pub use sync::{
    OperationHandle, OperationId, OperationOutcome, SaveSynchronizer, SyncError, SyncEvent,
    SyncPhase, SyncSuccess,
};
