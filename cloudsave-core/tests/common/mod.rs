#![allow(dead_code)]

use cloudsave_core::{
    ManualClock, MemoryRemote, MemorySaveStore, SaveBook, SaveRecord, SaveSynchronizer,
    SyncConfig, SyncEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const SLOT: &str = "game_info";
pub const JAN_2024_TICKS: i64 = 638_396_640_000_000_000;
const WAIT: Duration = Duration::from_secs(5);

pub struct Fixture {
    pub sync: SaveSynchronizer<MemorySaveStore, MemoryRemote>,
    pub store: MemorySaveStore,
    pub remote: MemoryRemote,
    pub clock: Arc<ManualClock>,
    pub events: broadcast::Receiver<SyncEvent>,
}

pub fn record(stage: i32, saved_at_ticks: i64) -> SaveRecord {
    let mut record = SaveRecord::first_run(saved_at_ticks);
    record.stage_info.current_stage = stage;
    record
}

pub fn fixture(local: Option<SaveRecord>) -> Fixture {
    fixture_with(local, SyncConfig::default())
}

pub fn fixture_with(local: Option<SaveRecord>, config: SyncConfig) -> Fixture {
    let store = local.map_or_else(MemorySaveStore::default, MemorySaveStore::with_record);
    let clock = Arc::new(ManualClock::new(JAN_2024_TICKS));
    let book = SaveBook::open(store.clone(), clock.clone()).unwrap();
    let remote = MemoryRemote::with_clock(clock.clone());
    let sync = SaveSynchronizer::new(
        book,
        remote.clone(),
        config,
        tokio::runtime::Handle::current(),
    );
    let events = sync.subscribe();
    Fixture {
        sync,
        store,
        remote,
        clock,
        events,
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("sync event within timeout")
        .expect("event channel open")
}

/// Events already emitted, without waiting.
pub fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub async fn wait_until(mut ready: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !ready() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition reached within timeout");
}
