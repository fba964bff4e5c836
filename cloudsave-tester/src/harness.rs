use anyhow::{Context, Result, anyhow};
use cloudsave_core::{
    ManualClock, MemoryRemote, MemorySaveStore, OperationHandle, OperationOutcome, SaveBook,
    SaveRecord, SaveSynchronizer, SyncConfig, SyncEvent,
};
use rand::Rng;
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const SLOT: &str = "game_info";
pub const BASE_TICKS: i64 = 638_396_640_000_000_000;
const TICKS_PER_MINUTE: i64 = 600_000_000;
const EVENT_WAIT: Duration = Duration::from_secs(5);

/// One device wired to an in-memory cloud.
pub struct Harness {
    pub sync: SaveSynchronizer<MemorySaveStore, MemoryRemote>,
    pub store: MemorySaveStore,
    pub remote: MemoryRemote,
    pub clock: Arc<ManualClock>,
    events: broadcast::Receiver<SyncEvent>,
}

impl Harness {
    pub fn new(local: Option<SaveRecord>) -> Result<Self> {
        Self::with_config(local, SyncConfig::default())
    }

    pub fn with_config(local: Option<SaveRecord>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let store = local.map_or_else(MemorySaveStore::default, MemorySaveStore::with_record);
        let clock = Arc::new(ManualClock::new(BASE_TICKS));
        let book =
            SaveBook::open(store.clone(), clock.clone()).context("opening the save book")?;
        let remote = MemoryRemote::with_clock(clock.clone());
        let sync = SaveSynchronizer::new(
            book,
            remote.clone(),
            config,
            tokio::runtime::Handle::current(),
        );
        let events = sync.subscribe();
        Ok(Self {
            sync,
            store,
            remote,
            clock,
            events,
        })
    }

    pub async fn next_event(&mut self) -> Result<SyncEvent> {
        timeout(EVENT_WAIT, self.events.recv())
            .await
            .map_err(|_| anyhow!("no sync event within {EVENT_WAIT:?}"))?
            .context("sync event channel closed")
    }

    /// Events already emitted, without waiting.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub async fn finish(handle: OperationHandle) -> Result<OperationOutcome> {
    timeout(EVENT_WAIT, handle)
        .await
        .map_err(|_| anyhow!("operation did not finish within {EVENT_WAIT:?}"))
}

pub fn record(stage: i32, minutes: i64) -> SaveRecord {
    let mut record = SaveRecord::first_run(BASE_TICKS + minutes * TICKS_PER_MINUTE);
    record.stage_info.current_stage = stage;
    record
}

/// A plausible mid-game record.
pub fn random_record(rng: &mut ChaCha20Rng) -> SaveRecord {
    let mut record = record(rng.gen_range(1..=250), rng.gen_range(0..60 * 24 * 30));
    record.score_info.high_score = rng.gen_range(0..1_000_000);
    record.gold = rng.gen_range(0..50_000);
    record.character_info.level = rng.gen_range(1..=60);
    record.character_info.current_xp = rng.gen_range(0..record.character_info.xp_to_next_level);
    record
}

/// Bytes no schema version will ever decode.
pub fn garbage_payload(rng: &mut ChaCha20Rng) -> Vec<u8> {
    let len = rng.gen_range(1..64);
    let mut bytes: Vec<u8> = (0..len).map(|_| rng.r#gen::<u8>()).collect();
    bytes[0] = 0xff;
    bytes
}
