//! The five reference sessions, with randomized records.
use anyhow::{Result, bail, ensure};
use cloudsave_core::{SaveChoice, SlotChoice, SyncError, SyncEvent, SyncSuccess};
use rand::Rng;
use rand_chacha::ChaCha20Rng;

use super::Scenario;
use crate::harness::{Harness, SLOT, finish, random_record};

pub struct FirstUpload;

#[async_trait::async_trait]
impl Scenario for FirstUpload {
    fn name(&self) -> &'static str {
        "First Upload to Empty Slot"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let local = random_record(rng);
        let mut h = Harness::new(Some(local.clone()))?;

        let outcome = finish(h.sync.save(None)?).await?;
        ensure!(
            matches!(outcome.result, Ok(SyncSuccess::Committed { .. })),
            "expected a commit, got {:?}",
            outcome.result
        );
        let events = h.drain();
        ensure!(
            matches!(events.as_slice(), [SyncEvent::SaveSucceeded(_)]),
            "expected a single success event, got {events:?}"
        );
        ensure!(
            h.remote.slot_record(SLOT) == Some(local),
            "cloud slot does not hold the local record"
        );
        let commits = h.remote.commits();
        ensure!(commits.len() == 1, "expected one commit, saw {}", commits.len());
        ensure!(
            commits[0].description.starts_with("Saved game at "),
            "unexpected commit description '{}'",
            commits[0].description
        );
        Ok(())
    }
}

pub struct OverwriteCloud;

#[async_trait::async_trait]
impl Scenario for OverwriteCloud {
    fn name(&self) -> &'static str {
        "Save Conflict Keeps Local"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let local = random_record(rng);
        let cloud = random_record(rng);
        let mut h = Harness::new(Some(local.clone()))?;
        h.remote.seed_record(SLOT, &cloud)?;

        let handle = h.sync.save(None)?;
        let SyncEvent::SaveConflictDetected(conflict) = h.next_event().await? else {
            bail!("save did not prompt while the cloud held a record");
        };
        ensure!(conflict.cloud == cloud, "prompt shows the wrong cloud record");
        ensure!(conflict.local == local, "prompt shows the wrong local record");
        ensure!(
            conflict.operation == handle.id(),
            "prompt names operation {} instead of {}",
            conflict.operation,
            handle.id()
        );

        h.sync.resolve_save_conflict(conflict.operation, SaveChoice::UseLocal)?;
        let outcome = finish(handle).await?;
        ensure!(outcome.is_success(), "save failed: {:?}", outcome.result);
        ensure!(
            h.remote.slot_record(SLOT) == Some(local),
            "cloud slot was not overwritten"
        );
        ensure!(
            !h.sync.operation_in_progress(),
            "synchronizer still busy after commit"
        );
        Ok(())
    }
}

pub struct KeepCloud;

#[async_trait::async_trait]
impl Scenario for KeepCloud {
    fn name(&self) -> &'static str {
        "Save Conflict Keeps Cloud"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let cloud = random_record(rng);
        let mut h = Harness::new(Some(random_record(rng)))?;
        h.remote.seed_record(SLOT, &cloud)?;
        let writes_before = h.store.writes();

        let handle = h.sync.save(None)?;
        ensure!(
            matches!(h.next_event().await?, SyncEvent::SaveConflictDetected(_)),
            "save did not prompt"
        );
        h.sync.resolve_save_conflict(handle.id(), SaveChoice::UseCloud)?;
        let outcome = finish(handle).await?;
        ensure!(
            matches!(outcome.result, Ok(SyncSuccess::KeptCloud { .. })),
            "expected the cloud record to be kept, got {:?}",
            outcome.result
        );
        ensure!(h.remote.commits().is_empty(), "cloud slot was written");
        ensure!(
            h.store.snapshot() == Some(cloud),
            "device does not hold the cloud record"
        );
        ensure!(
            h.store.writes() == writes_before + 1,
            "expected exactly one local write"
        );
        Ok(())
    }
}

pub struct LoadSlotConflict;

#[async_trait::async_trait]
impl Scenario for LoadSlotConflict {
    fn name(&self) -> &'static str {
        "Load Slot Conflict Labeling"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let device_copy = random_record(rng);
        let incoming = random_record(rng);
        let mut h = Harness::new(Some(random_record(rng)))?;
        // While loading the original is the device copy.
        h.remote
            .push_record_conflict(SLOT, &device_copy, &incoming)?;

        let handle = h.sync.load()?;
        let SyncEvent::SlotConflictDetected(view) = h.next_event().await? else {
            bail!("load did not surface the slot conflict");
        };
        ensure!(!view.is_saving, "load conflict labeled as a save");
        ensure!(
            view.cloud.record.as_ref() == Some(&incoming),
            "cloud column does not show the incoming version"
        );
        ensure!(
            view.local.record.as_ref() == Some(&device_copy),
            "local column does not show the device version"
        );

        let (choice, expected) = if rng.gen_bool(0.5) {
            (SlotChoice::UseCloud, incoming)
        } else {
            (SlotChoice::UseLocal, device_copy)
        };
        h.sync.resolve_slot_conflict(view.operation, choice)?;
        let outcome = finish(handle).await?;
        ensure!(outcome.is_success(), "load failed: {:?}", outcome.result);
        ensure!(
            h.store.snapshot() == Some(expected),
            "device does not hold the chosen version after {choice:?}"
        );
        ensure!(h.remote.counters().resolves == 1, "conflict not resolved once");
        Ok(())
    }
}

pub struct SingleFlight;

#[async_trait::async_trait]
impl Scenario for SingleFlight {
    fn name(&self) -> &'static str {
        "Single Flight Guard"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let mut h = Harness::new(Some(random_record(rng)))?;
        h.remote.seed_record(SLOT, &random_record(rng))?;

        let handle = h.sync.save(None)?;
        ensure!(
            matches!(h.next_event().await?, SyncEvent::SaveConflictDetected(_)),
            "save did not prompt"
        );

        let second = if rng.gen_bool(0.5) {
            h.sync.save(None).err()
        } else {
            h.sync.load().err()
        };
        ensure!(
            second == Some(SyncError::OperationInProgress),
            "second request was not rejected: {second:?}"
        );
        let stray = h.drain();
        ensure!(stray.is_empty(), "rejected request emitted {stray:?}");

        h.sync.resolve_save_conflict(handle.id(), SaveChoice::UseLocal)?;
        let outcome = finish(handle).await?;
        ensure!(outcome.is_success(), "first save failed: {:?}", outcome.result);
        ensure!(
            h.remote.counters().opens == 1,
            "rejected request reached the transport"
        );
        Ok(())
    }
}
