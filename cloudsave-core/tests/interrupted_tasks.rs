mod common;

use async_trait::async_trait;
use cloudsave_core::{
    ConflictSide, ManualClock, MemoryRemote, MemorySaveStore, OperationHandle, OperationOutcome,
    ReadPolicy, RemoteError, RemoteSaveClient, SaveBook, SaveChoice, SaveSynchronizer, SlotConflict,
    SlotHandle, SlotMetadata, SlotOpen, SyncConfig, SyncError, SyncEvent, SyncPhase,
};
use common::{JAN_2024_TICKS, SLOT, next_event, record};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::timeout;

/// Transport whose next read blows up inside the operation task.
struct PanickingRemote {
    inner: MemoryRemote,
    panic_next_read: AtomicBool,
}

#[async_trait]
impl RemoteSaveClient for PanickingRemote {
    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    async fn open_slot(&self, name: &str, policy: ReadPolicy) -> Result<SlotOpen, RemoteError> {
        self.inner.open_slot(name, policy).await
    }

    async fn resolve_conflict(
        &self,
        conflict: SlotConflict,
        side: ConflictSide,
    ) -> Result<SlotOpen, RemoteError> {
        self.inner.resolve_conflict(conflict, side).await
    }

    async fn read_binary(&self, handle: &SlotHandle) -> Result<Vec<u8>, RemoteError> {
        if self.panic_next_read.swap(false, Ordering::SeqCst) {
            panic!("transport crashed while reading {}", handle.metadata().slot);
        }
        self.inner.read_binary(handle).await
    }

    async fn write_binary(
        &self,
        handle: SlotHandle,
        payload: Vec<u8>,
        description: String,
    ) -> Result<SlotMetadata, RemoteError> {
        self.inner.write_binary(handle, payload, description).await
    }
}

struct Crashing {
    sync: SaveSynchronizer<MemorySaveStore, PanickingRemote>,
    remote: MemoryRemote,
}

fn crashing_fixture() -> Crashing {
    let store = MemorySaveStore::with_record(record(5, 200));
    let clock = Arc::new(ManualClock::new(JAN_2024_TICKS));
    let book = SaveBook::open(store, clock.clone()).unwrap();
    let remote = MemoryRemote::with_clock(clock);
    remote.seed_record(SLOT, &record(3, 150)).unwrap();
    let sync = SaveSynchronizer::new(
        book,
        PanickingRemote {
            inner: remote.clone(),
            panic_next_read: AtomicBool::new(true),
        },
        SyncConfig::default(),
        tokio::runtime::Handle::current(),
    );
    Crashing { sync, remote }
}

async fn settled(handle: OperationHandle) -> OperationOutcome {
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("operation resolves even when its task dies")
}

#[tokio::test]
async fn crashed_save_reports_interrupted_and_frees_the_guard() {
    let fx = crashing_fixture();
    let mut events = fx.sync.subscribe();

    let outcome = settled(fx.sync.save(None).unwrap()).await;
    assert_eq!(outcome.result, Err(SyncError::Interrupted));
    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::SaveFailed(SyncError::Interrupted)
    ));
    assert!(!fx.sync.operation_in_progress());
    assert_eq!(fx.sync.phase(), SyncPhase::Idle);
    assert!(fx.remote.commits().is_empty());

    // The transport recovered; a retry runs normally.
    let retry = fx.sync.save(None).unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::SaveConflictDetected(_)
    ));
    fx.sync.resolve_save_conflict(retry.id(), SaveChoice::UseLocal).unwrap();
    assert!(settled(retry).await.is_success());
    assert_eq!(fx.remote.slot_record(SLOT).unwrap().current_stage(), 5);
}

#[tokio::test]
async fn crashed_load_reports_load_failure() {
    let fx = crashing_fixture();
    let mut events = fx.sync.subscribe();

    let outcome = settled(fx.sync.load().unwrap()).await;
    assert_eq!(outcome.result, Err(SyncError::Interrupted));
    assert!(matches!(
        next_event(&mut events).await,
        SyncEvent::LoadFailed(SyncError::Interrupted)
    ));
    assert!(fx.sync.load().is_ok());
}
