//! Seeded sweeps over the synchronizer's guarantees.
use anyhow::{Result, bail, ensure};
use cloudsave_core::{
    CodecError, LoadChoice, OperationKind, SaveChoice, SlotChoice, SyncError, SyncEvent,
    SyncPhase, SyncSuccess, decode, decode_lenient, encode, payload_digest,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use super::Scenario;
use crate::harness::{Harness, SLOT, finish, garbage_payload, random_record};

const TICKS_PER_HOUR: i64 = 36_000_000_000;

pub struct CancelReleasesGuard;

#[async_trait::async_trait]
impl Scenario for CancelReleasesGuard {
    fn name(&self) -> &'static str {
        "Cancel Releases Guard"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let mut h = Harness::new(Some(random_record(rng)))?;
        let kind = match rng.gen_range(0..3) {
            0 => {
                h.remote.seed_record(SLOT, &random_record(rng))?;
                OperationKind::Save
            }
            1 => {
                h.remote.seed_record(SLOT, &random_record(rng))?;
                OperationKind::Load
            }
            _ => {
                h.remote
                    .push_record_conflict(SLOT, &random_record(rng), &random_record(rng))?;
                OperationKind::Load
            }
        };
        let handle = match kind {
            OperationKind::Save => h.sync.save(None)?,
            OperationKind::Load => h.sync.load()?,
        };
        let id = handle.id();
        let prompt = h.next_event().await?;
        ensure!(
            h.sync.pending_conflict().map(|context| context.operation()) == Some(id),
            "no decision pending for {id} after {prompt:?}"
        );

        // Either the explicit cancel or the panel's cancel button.
        if rng.gen_bool(0.5) {
            ensure!(h.sync.cancel()? == kind, "cancel reported the wrong kind");
        } else {
            match prompt {
                SyncEvent::SaveConflictDetected(_) => {
                    h.sync.resolve_save_conflict(id, SaveChoice::Cancel)?;
                }
                SyncEvent::SlotConflictDetected(_) => {
                    h.sync.resolve_slot_conflict(id, SlotChoice::Cancel)?;
                }
                SyncEvent::CloudRecordOffered(_) => {
                    h.sync.resolve_cloud_offer(id, LoadChoice::Cancel)?;
                }
                other => bail!("unexpected event {other:?}"),
            }
        }

        let outcome = finish(handle).await?;
        ensure!(
            outcome.result == Err(SyncError::UserCancelled),
            "cancelled operation ended with {:?}",
            outcome.result
        );
        ensure!(!h.sync.operation_in_progress(), "guard still held");
        ensure!(h.sync.phase() == SyncPhase::Idle, "phase not reset");
        ensure!(h.sync.pending_conflict().is_none(), "stale decision left");
        ensure!(h.remote.commits().is_empty(), "cancelled save reached the cloud");
        ensure!(
            h.sync.resolve_save_conflict(id, SaveChoice::UseLocal)
                == Err(SyncError::NoPendingDecision),
            "cancelled operation still accepted an answer"
        );

        let retry = h.sync.load()?;
        h.sync.cancel()?;
        ensure!(
            finish(retry).await?.result == Err(SyncError::UserCancelled),
            "retry was not accepted"
        );
        Ok(())
    }
}

pub struct NoPromptWithoutCloud;

#[async_trait::async_trait]
impl Scenario for NoPromptWithoutCloud {
    fn name(&self) -> &'static str {
        "No Prompt Without Cloud Record"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let local = random_record(rng);
        let mut h = Harness::new(Some(local.clone()))?;
        match rng.gen_range(0..3) {
            0 => {}
            1 => h.remote.seed_slot(SLOT, Vec::new()),
            _ => h.remote.seed_slot(SLOT, garbage_payload(rng)),
        }

        let outcome = finish(h.sync.save(None)?).await?;
        ensure!(
            matches!(outcome.result, Ok(SyncSuccess::Committed { .. })),
            "save did not upload directly: {:?}",
            outcome.result
        );
        let events = h.drain();
        ensure!(
            matches!(events.as_slice(), [SyncEvent::SaveSucceeded(_)]),
            "unexpected events {events:?}"
        );
        ensure!(
            h.remote.slot_record(SLOT) == Some(local),
            "cloud slot does not hold the local record"
        );
        Ok(())
    }
}

pub struct PromptOnCloudRecord;

#[async_trait::async_trait]
impl Scenario for PromptOnCloudRecord {
    fn name(&self) -> &'static str {
        "Prompt On Any Cloud Record"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let local = random_record(rng);
        // Identical records still prompt.
        let cloud = if rng.gen_bool(0.3) {
            local.clone()
        } else {
            random_record(rng)
        };
        let mut h = Harness::new(Some(local.clone()))?;
        h.remote.seed_record(SLOT, &cloud)?;

        let handle = h.sync.save(None)?;
        ensure!(
            matches!(h.next_event().await?, SyncEvent::SaveConflictDetected(_)),
            "decodable cloud record did not prompt"
        );
        ensure!(
            h.sync.phase() == SyncPhase::AwaitingSaveDecision,
            "phase is {:?}",
            h.sync.phase()
        );
        h.sync.resolve_save_conflict(handle.id(), SaveChoice::Cancel)?;
        ensure!(
            finish(handle).await?.result == Err(SyncError::UserCancelled),
            "cancel did not fail the save"
        );
        ensure!(h.store.snapshot() == Some(local), "local record changed");
        ensure!(h.remote.slot_record(SLOT) == Some(cloud), "cloud record changed");
        Ok(())
    }
}

pub struct KeepLocalIdempotent;

#[async_trait::async_trait]
impl Scenario for KeepLocalIdempotent {
    fn name(&self) -> &'static str {
        "Keep Local Is Idempotent"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let local = random_record(rng);
        let mut h = Harness::new(Some(local.clone()))?;
        h.remote.seed_record(SLOT, &random_record(rng))?;

        for round in 1..=2 {
            let handle = h.sync.load()?;
            ensure!(
                matches!(h.next_event().await?, SyncEvent::CloudRecordOffered(_)),
                "round {round}: cloud record not offered"
            );
            if rng.gen_bool(0.5) {
                h.sync.notify_load_success(handle.id())?;
            } else {
                h.sync.resolve_cloud_offer(handle.id(), LoadChoice::KeepLocal)?;
            }
            let outcome = finish(handle).await?;
            ensure!(
                outcome.result == Ok(SyncSuccess::KeptLocal),
                "round {round}: {:?}",
                outcome.result
            );
        }
        ensure!(h.remote.commits().is_empty(), "keeping local wrote the cloud");

        // On save, keeping local re-commits the same bytes each time.
        for round in 1..=2 {
            let handle = h.sync.save(None)?;
            ensure!(
                matches!(h.next_event().await?, SyncEvent::SaveConflictDetected(_)),
                "round {round}: save did not prompt"
            );
            h.sync.resolve_save_conflict(handle.id(), SaveChoice::UseLocal)?;
            let outcome = finish(handle).await?;
            ensure!(outcome.is_success(), "round {round}: {:?}", outcome.result);
        }
        let commits = h.remote.commits();
        ensure!(commits.len() == 2, "expected two commits, saw {}", commits.len());
        ensure!(
            commits[0].payload == commits[1].payload,
            "repeated keep-local commits differ"
        );
        ensure!(h.store.writes() == 0, "keeping local wrote the store");
        ensure!(h.store.snapshot() == Some(local), "local record changed");
        Ok(())
    }
}

pub struct CodecRoundTrip;

#[async_trait::async_trait]
impl Scenario for CodecRoundTrip {
    fn name(&self) -> &'static str {
        "Codec Round Trip"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let record = random_record(rng);
        let bytes = encode(&record)?;
        ensure!(decode(&bytes)? == record, "record changed across the codec");
        ensure!(
            payload_digest(&bytes) == payload_digest(&encode(&record)?),
            "encoding is not stable"
        );
        ensure!(
            matches!(decode(&[]), Err(CodecError::Empty)),
            "empty payload decoded"
        );
        ensure!(
            decode_lenient(&garbage_payload(rng)).is_none(),
            "garbage decoded as a record"
        );
        Ok(())
    }
}

pub struct DeterministicCommits;

#[async_trait::async_trait]
impl Scenario for DeterministicCommits {
    fn name(&self) -> &'static str {
        "Deterministic Commits"
    }

    async fn run(&self, rng: &mut ChaCha20Rng) -> Result<()> {
        let seed = rng.r#gen::<u64>();
        let first = scripted_session(seed).await?;
        let second = scripted_session(seed).await?;
        ensure!(
            first == second,
            "seed {seed} produced diverging cloud history"
        );
        Ok(())
    }
}

/// Plays a few save rounds and fingerprints everything sent to the cloud.
async fn scripted_session(seed: u64) -> Result<String> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut h = Harness::new(Some(random_record(&mut rng)))?;
    if rng.gen_bool(0.5) {
        h.remote.seed_record(SLOT, &random_record(&mut rng))?;
    }

    for _ in 0..rng.gen_range(2..5) {
        let earned = rng.gen_range(1..500);
        h.sync.book().modify(|record| record.gold += earned)?;
        h.clock.advance(TICKS_PER_HOUR);

        let handle = h.sync.save(None)?;
        if let SyncEvent::SaveConflictDetected(_) = h.next_event().await? {
            let choice = if rng.gen_bool(0.7) {
                SaveChoice::UseLocal
            } else {
                SaveChoice::UseCloud
            };
            h.sync.resolve_save_conflict(handle.id(), choice)?;
        }
        finish(handle).await?;
        h.drain();
    }

    let mut hasher = Sha256::new();
    for commit in h.remote.commits() {
        hasher.update(commit.description.as_bytes());
        hasher.update(&commit.payload);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
