mod common;

use cloudsave_core::{
    ConflictContext, LoadChoice, OperationKind, ReadPolicy, SlotChoice, SyncConfig, SyncError,
    SyncEvent, SyncSuccess,
};
use common::{SLOT, drain, fixture, fixture_with, next_event, record};

#[tokio::test]
async fn load_conflict_is_labeled_and_chosen_candidate_becomes_local() {
    let mut fx = fixture(Some(record(2, 20)));
    // Loading: original is the device copy, unmerged the incoming cloud copy.
    let candidate_a = record(4, 50);
    let candidate_b = record(6, 80);
    fx.remote
        .push_record_conflict(SLOT, &candidate_a, &candidate_b)
        .unwrap();

    let handle = fx.sync.load().unwrap();
    let SyncEvent::SlotConflictDetected(view) = next_event(&mut fx.events).await else {
        panic!("expected slot conflict");
    };
    assert!(!view.is_saving);
    assert_eq!(view.cloud.record.as_ref().unwrap().saved_at_ticks, 80);
    assert_eq!(view.local.record.as_ref().unwrap().saved_at_ticks, 50);

    fx.sync.resolve_slot_conflict(handle.id(), SlotChoice::UseCloud).unwrap();
    let outcome = handle.await;
    assert_eq!(outcome.kind, OperationKind::Load);
    assert_eq!(
        outcome.result,
        Ok(SyncSuccess::AppliedCloud {
            record: candidate_b.clone()
        })
    );
    assert_eq!(fx.store.snapshot(), Some(candidate_b));
    assert_eq!(fx.remote.counters().resolves, 1);
    assert!(fx.remote.commits().is_empty());
}

#[tokio::test]
async fn load_conflict_local_choice_applies_device_candidate() {
    let mut fx = fixture(Some(record(2, 20)));
    fx.remote
        .push_record_conflict(SLOT, &record(4, 50), &record(6, 80))
        .unwrap();

    let handle = fx.sync.load().unwrap();
    next_event(&mut fx.events).await;
    fx.sync.resolve_slot_conflict(handle.id(), SlotChoice::UseLocal).unwrap();

    assert!(handle.await.is_success());
    assert_eq!(fx.store.snapshot().unwrap().saved_at_ticks, 50);
}

#[tokio::test]
async fn repeated_transport_conflicts_are_walked_in_order() {
    let mut fx = fixture(Some(record(2, 20)));
    fx.remote
        .push_record_conflict(SLOT, &record(3, 30), &record(4, 40))
        .unwrap();
    fx.remote
        .push_record_conflict(SLOT, &record(5, 50), &record(6, 60))
        .unwrap();

    let handle = fx.sync.load().unwrap();
    next_event(&mut fx.events).await;
    fx.sync.resolve_slot_conflict(handle.id(), SlotChoice::UseCloud).unwrap();
    let SyncEvent::SlotConflictDetected(second) = next_event(&mut fx.events).await else {
        panic!("expected second slot conflict");
    };
    assert_eq!(second.operation, handle.id());
    assert_eq!(second.cloud.record.as_ref().unwrap().current_stage(), 6);
    fx.sync.resolve_slot_conflict(handle.id(), SlotChoice::UseLocal).unwrap();

    assert!(handle.await.is_success());
    assert_eq!(fx.store.snapshot().unwrap().current_stage(), 5);
    assert_eq!(fx.remote.counters().resolves, 2);
}

#[tokio::test]
async fn slot_conflict_cancel_fails_load() {
    let mut fx = fixture(Some(record(2, 20)));
    fx.remote
        .push_record_conflict(SLOT, &record(4, 50), &record(6, 80))
        .unwrap();

    let handle = fx.sync.load().unwrap();
    next_event(&mut fx.events).await;
    fx.sync.resolve_slot_conflict(handle.id(), SlotChoice::Cancel).unwrap();

    assert_eq!(handle.await.result, Err(SyncError::UserCancelled));
    assert_eq!(fx.remote.counters().resolves, 0);
    assert_eq!(fx.store.snapshot().unwrap().current_stage(), 2);
}

#[tokio::test]
async fn empty_slot_loads_as_no_remote_data() {
    let mut fx = fixture(Some(record(2, 20)));
    let outcome = fx.sync.load().unwrap().await;
    assert_eq!(outcome.result, Ok(SyncSuccess::NoRemoteData));
    assert!(matches!(
        drain(&mut fx.events).as_slice(),
        [SyncEvent::LoadSucceeded(SyncSuccess::NoRemoteData)]
    ));
    assert_eq!(fx.store.writes(), 0);
}

#[tokio::test]
async fn corrupt_slot_fails_load_without_prompt() {
    let mut fx = fixture(Some(record(2, 20)));
    fx.remote.seed_slot(SLOT, vec![0xde, 0xad, 0xbe, 0xef]);

    let outcome = fx.sync.load().unwrap().await;
    assert!(matches!(outcome.result, Err(SyncError::DecodeFailed(_))));
    assert!(matches!(
        drain(&mut fx.events).as_slice(),
        [SyncEvent::LoadFailed(SyncError::DecodeFailed(_))]
    ));
    assert_eq!(fx.store.snapshot().unwrap().current_stage(), 2);
}

#[tokio::test]
async fn offer_accepted_replaces_local_record() {
    let mut fx = fixture(Some(record(2, 20)));
    let cloud = record(9, 90);
    fx.remote.seed_record(SLOT, &cloud).unwrap();

    let handle = fx.sync.load().unwrap();
    let SyncEvent::CloudRecordOffered(offer) = next_event(&mut fx.events).await else {
        panic!("expected cloud offer");
    };
    assert_eq!(offer.cloud, cloud);
    assert_eq!(offer.local.as_ref().unwrap().current_stage(), 2);
    assert!(matches!(
        fx.sync.pending_conflict(),
        Some(ConflictContext::CloudOffer(_))
    ));

    fx.sync.resolve_cloud_offer(offer.operation, LoadChoice::UseCloud).unwrap();
    assert_eq!(
        handle.await.result,
        Ok(SyncSuccess::AppliedCloud {
            record: cloud.clone()
        })
    );
    assert_eq!(fx.store.snapshot(), Some(cloud));
}

#[tokio::test]
async fn keeping_local_twice_changes_nothing() {
    let local = record(2, 20);
    let mut fx = fixture(Some(local.clone()));
    fx.remote.seed_record(SLOT, &record(9, 90)).unwrap();

    for _ in 0..2 {
        let handle = fx.sync.load().unwrap();
        assert!(matches!(
            next_event(&mut fx.events).await,
            SyncEvent::CloudRecordOffered(_)
        ));
        fx.sync.notify_load_success(handle.id()).unwrap();
        assert_eq!(handle.await.result, Ok(SyncSuccess::KeptLocal));
        assert!(matches!(
            next_event(&mut fx.events).await,
            SyncEvent::LoadSucceeded(SyncSuccess::KeptLocal)
        ));
    }

    assert_eq!(fx.store.snapshot(), Some(local));
    assert_eq!(fx.store.writes(), 0);
    assert!(fx.remote.commits().is_empty());
}

#[tokio::test]
async fn notify_load_failed_cancels_the_offer() {
    let mut fx = fixture(Some(record(2, 20)));
    fx.remote.seed_record(SLOT, &record(9, 90)).unwrap();

    let handle = fx.sync.load().unwrap();
    next_event(&mut fx.events).await;
    fx.sync.notify_load_failed(handle.id()).unwrap();

    assert_eq!(handle.await.result, Err(SyncError::UserCancelled));
    assert!(matches!(
        next_event(&mut fx.events).await,
        SyncEvent::LoadFailed(SyncError::UserCancelled)
    ));
    assert!(!fx.sync.operation_in_progress());
}

#[tokio::test]
async fn load_policy_decides_between_cache_and_network() {
    let fresh = record(8, 800);
    let stale = record(3, 300);

    // Default reads go to the network.
    let mut network = fixture(Some(record(1, 10)));
    assert_eq!(network.sync.config().load_read_policy, ReadPolicy::NetworkOnly);
    network.remote.seed_record(SLOT, &fresh).unwrap();
    network
        .remote
        .seed_stale_cache(SLOT, cloudsave_core::encode(&stale).unwrap());
    let handle = network.sync.load().unwrap();
    let SyncEvent::CloudRecordOffered(offer) = next_event(&mut network.events).await else {
        panic!("expected cloud offer");
    };
    assert_eq!(offer.cloud, fresh);
    network
        .sync
        .resolve_cloud_offer(handle.id(), LoadChoice::KeepLocal)
        .unwrap();
    handle.await;

    let config = SyncConfig {
        load_read_policy: ReadPolicy::CacheOrNetwork,
        ..SyncConfig::default()
    };
    let mut cached = fixture_with(Some(record(1, 10)), config);
    cached.remote.seed_record(SLOT, &fresh).unwrap();
    cached
        .remote
        .seed_stale_cache(SLOT, cloudsave_core::encode(&stale).unwrap());
    let handle = cached.sync.load().unwrap();
    let SyncEvent::CloudRecordOffered(offer) = next_event(&mut cached.events).await else {
        panic!("expected cloud offer");
    };
    assert_eq!(offer.cloud, stale);
    cached
        .sync
        .resolve_cloud_offer(handle.id(), LoadChoice::KeepLocal)
        .unwrap();
    handle.await;
}

#[tokio::test]
async fn load_on_first_run_offers_with_no_local_record() {
    let mut fx = fixture(None);
    fx.remote.seed_record(SLOT, &record(4, 40)).unwrap();

    let handle = fx.sync.load().unwrap();
    let SyncEvent::CloudRecordOffered(offer) = next_event(&mut fx.events).await else {
        panic!("expected cloud offer");
    };
    assert!(offer.local.is_none());
    fx.sync.resolve_cloud_offer(handle.id(), LoadChoice::UseCloud).unwrap();
    assert!(handle.await.is_success());
    assert_eq!(fx.store.snapshot().unwrap().current_stage(), 4);
    assert!(!fx.sync.book().is_first_run());
}

#[tokio::test]
async fn unauthenticated_load_reports_load_failure() {
    let mut fx = fixture(Some(record(2, 20)));
    fx.remote.set_authenticated(false);
    assert_eq!(fx.sync.load().err(), Some(SyncError::NotAuthenticated));
    assert!(matches!(
        next_event(&mut fx.events).await,
        SyncEvent::LoadFailed(SyncError::NotAuthenticated)
    ));
}
