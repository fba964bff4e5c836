//! Cloud save synchronizer.
//!
//! [`SaveSynchronizer`] runs one save or load at a time against the remote
//! slot. Each accepted call spawns a task and returns an
//! [`OperationHandle`]; human decisions are parked in the guard and fed
//! back through the `resolve_*` methods, which must quote the
//! [`OperationId`] the prompt carried. Every step after a suspension point
//! re-checks that its operation still owns the guard.
mod guard;
mod outcome;

pub use guard::SyncPhase;
pub use outcome::{
    OperationHandle, OperationId, OperationOutcome, SyncError, SyncEvent, SyncSuccess,
};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};

use crate::book::SaveBook;
use crate::codec;
use crate::config::SyncConfig;
use crate::conflict::{
    CloudOffer, ConflictContext, LoadChoice, OperationKind, SaveChoice, SaveConflict, SlotChoice,
    SlotConflictView,
};
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::local::LocalSaveStore;
use crate::record::{SaveRecord, datetime_from_ticks};
use crate::remote::{ReadPolicy, RemoteSaveClient, SlotHandle, SlotOpen};
use guard::{FlightState, PendingDecision};

/// Why a flow stopped without finishing normally.
enum Halt {
    Failed(SyncError),
    /// The operation lost the guard (cancelled); its result is moot.
    Abandoned,
}

impl From<SyncError> for Halt {
    fn from(err: SyncError) -> Self {
        Self::Failed(err)
    }
}

type Step<T> = Result<T, Halt>;

/// Owned by an operation task; settles the operation as
/// [`SyncError::Interrupted`] if the task's future is dropped before it
/// reports, as happens when the flow panics.
struct SettleWatch<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    shared: Arc<Shared<L, R>>,
    id: OperationId,
    kind: OperationKind,
    settled: bool,
}

impl<L, R> SettleWatch<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    fn new(shared: Arc<Shared<L, R>>, id: OperationId, kind: OperationKind) -> Self {
        Self {
            shared,
            id,
            kind,
            settled: false,
        }
    }

    fn settle(mut self, step: Step<SyncSuccess>) {
        self.settled = true;
        self.shared.settle(self.id, self.kind, step);
    }
}

impl<L, R> Drop for SettleWatch<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    fn drop(&mut self) {
        if !self.settled {
            self.shared.interrupt(self.id, self.kind);
        }
    }
}

struct Shared<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    book: SaveBook<L>,
    remote: R,
    config: SyncConfig,
    flight: Mutex<FlightState>,
    events: broadcast::Sender<SyncEvent>,
    runtime: Handle,
}

/// Coordinates the local save book with the remote slot.
pub struct SaveSynchronizer<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    shared: Arc<Shared<L, R>>,
}

impl<L, R> Clone for SaveSynchronizer<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub(crate) struct WeakSynchronizer<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    shared: Weak<Shared<L, R>>,
}

impl<L, R> WeakSynchronizer<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    pub(crate) fn upgrade(&self) -> Option<SaveSynchronizer<L, R>> {
        self.shared.upgrade().map(|shared| SaveSynchronizer { shared })
    }
}

impl<L, R> SaveSynchronizer<L, R>
where
    L: LocalSaveStore + 'static,
    R: RemoteSaveClient + 'static,
{
    /// Operation tasks are spawned on `runtime`.
    #[must_use]
    pub fn new(book: SaveBook<L>, remote: R, config: SyncConfig, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                book,
                remote,
                config,
                flight: Mutex::new(FlightState::default()),
                events,
                runtime,
            }),
        }
    }

    #[must_use]
    pub fn book(&self) -> &SaveBook<L> {
        &self.shared.book
    }

    #[must_use]
    pub fn remote(&self) -> &R {
        &self.shared.remote
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn operation_in_progress(&self) -> bool {
        self.shared.flight().active_kind().is_some()
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.shared.flight().phase()
    }

    /// Decision the in-flight operation is waiting on, if any.
    #[must_use]
    pub fn pending_conflict(&self) -> Option<ConflictContext> {
        self.shared.flight().pending_context()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.shared.runtime
    }

    pub(crate) fn downgrade(&self) -> WeakSynchronizer<L, R> {
        WeakSynchronizer {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Upload `record`, or the current local record when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::OperationInProgress`] when another operation
    /// owns the guard (the call is dropped without an event), or
    /// [`SyncError::NotAuthenticated`] (a `SaveFailed` event fires too).
    pub fn save(&self, record: Option<SaveRecord>) -> Result<OperationHandle, SyncError> {
        let (id, handle) = self.begin(OperationKind::Save)?;
        let watch = SettleWatch::new(Arc::clone(&self.shared), id, OperationKind::Save);
        self.shared.runtime.spawn(async move {
            let step = watch.shared.run_save(id, record).await;
            watch.settle(step);
        });
        Ok(handle)
    }

    /// Fetch the remote record and offer it.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`SaveSynchronizer::save`], reported with a
    /// `LoadFailed` event.
    pub fn load(&self) -> Result<OperationHandle, SyncError> {
        let (id, handle) = self.begin(OperationKind::Load)?;
        let watch = SettleWatch::new(Arc::clone(&self.shared), id, OperationKind::Load);
        self.shared.runtime.spawn(async move {
            let step = watch.shared.run_load(id).await;
            watch.settle(step);
        });
        Ok(handle)
    }

    fn begin(&self, kind: OperationKind) -> Result<(OperationId, OperationHandle), SyncError> {
        let mut flight = self.shared.flight();
        if let Some(active) = flight.active_kind() {
            log::warn!("dropping {kind} request: {active} already in progress");
            return Err(SyncError::OperationInProgress);
        }
        if !self.shared.remote.is_authenticated() {
            drop(flight);
            log::warn!("{kind} refused: remote player is not authenticated");
            self.shared
                .emit(SyncEvent::finished(kind, Err(SyncError::NotAuthenticated)));
            return Err(SyncError::NotAuthenticated);
        }
        let (id, done) = flight.begin(kind)?;
        log::debug!("{kind} {id} started");
        Ok((id, OperationHandle::new(id, kind, done)))
    }

    /// Answer a [`SyncEvent::SaveConflictDetected`] prompt raised by `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoPendingDecision`] when `operation` has no save
    /// conflict waiting, including when it was cancelled or superseded.
    pub fn resolve_save_conflict(
        &self,
        operation: OperationId,
        choice: SaveChoice,
    ) -> Result<(), SyncError> {
        match self
            .shared
            .take_pending(operation, |p| matches!(p, PendingDecision::Save { .. }))
        {
            Some(PendingDecision::Save { reply, .. }) => {
                reply.send(choice).map_err(|_| SyncError::NoPendingDecision)
            }
            _ => Err(SyncError::NoPendingDecision),
        }
    }

    /// Answer a [`SyncEvent::SlotConflictDetected`] prompt raised by `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoPendingDecision`] when `operation` has no slot
    /// conflict waiting.
    pub fn resolve_slot_conflict(
        &self,
        operation: OperationId,
        choice: SlotChoice,
    ) -> Result<(), SyncError> {
        match self
            .shared
            .take_pending(operation, |p| matches!(p, PendingDecision::Slot { .. }))
        {
            Some(PendingDecision::Slot { reply, .. }) => {
                reply.send(choice).map_err(|_| SyncError::NoPendingDecision)
            }
            _ => Err(SyncError::NoPendingDecision),
        }
    }

    /// Answer a [`SyncEvent::CloudRecordOffered`] prompt raised by `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoPendingDecision`] when `operation` has no offer
    /// waiting.
    pub fn resolve_cloud_offer(
        &self,
        operation: OperationId,
        choice: LoadChoice,
    ) -> Result<(), SyncError> {
        match self
            .shared
            .take_pending(operation, |p| matches!(p, PendingDecision::Cloud { .. }))
        {
            Some(PendingDecision::Cloud { reply, .. }) => {
                reply.send(choice).map_err(|_| SyncError::NoPendingDecision)
            }
            _ => Err(SyncError::NoPendingDecision),
        }
    }

    /// The presentation layer finished the offer itself; the load succeeds
    /// without touching the local record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoPendingDecision`] when `operation` has no offer
    /// waiting.
    pub fn notify_load_success(&self, operation: OperationId) -> Result<(), SyncError> {
        self.resolve_cloud_offer(operation, LoadChoice::KeepLocal)
    }

    /// The presentation layer abandoned the offer; the load fails.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoPendingDecision`] when `operation` has no offer
    /// waiting.
    pub fn notify_load_failed(&self, operation: OperationId) -> Result<(), SyncError> {
        self.resolve_cloud_offer(operation, LoadChoice::Cancel)
    }

    /// Abort the in-flight operation.
    ///
    /// The guard is released at once and the operation fails with
    /// [`SyncError::UserCancelled`]. Anything the transport is still doing
    /// for it finishes on its own and its result is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NothingToCancel`] when idle.
    pub fn cancel(&self) -> Result<OperationKind, SyncError> {
        let Some(active) = self.shared.flight().abort() else {
            return Err(SyncError::NothingToCancel);
        };
        let (id, kind) = (active.id, active.kind);
        log::info!("{kind} {id} cancelled");
        self.shared
            .emit(SyncEvent::finished(kind, Err(SyncError::UserCancelled)));
        active.finish(Err(SyncError::UserCancelled));
        Ok(kind)
    }
}

impl<L, R> Shared<L, R>
where
    L: LocalSaveStore,
    R: RemoteSaveClient,
{
    fn flight(&self) -> MutexGuard<'_, FlightState> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn take_pending(
        &self,
        id: OperationId,
        accepts: impl Fn(&PendingDecision) -> bool,
    ) -> Option<PendingDecision> {
        self.flight().take_pending(id, accepts)
    }

    fn checkpoint(&self, id: OperationId, phase: SyncPhase) -> Step<()> {
        if self.flight().advance(id, phase) {
            log::debug!("operation {id} -> {phase:?}");
            Ok(())
        } else {
            Err(Halt::Abandoned)
        }
    }

    fn now(&self) -> DateTime<Utc> {
        datetime_from_ticks(self.book.clock().now_ticks()).unwrap_or_else(Utc::now)
    }

    /// Deliver a finished flow's result if it still owns the guard.
    fn settle(&self, id: OperationId, kind: OperationKind, step: Step<SyncSuccess>) {
        let result = match step {
            Ok(success) => Ok(success),
            Err(Halt::Failed(err)) => Err(err),
            Err(Halt::Abandoned) => {
                log::debug!("{kind} {id} stopped after losing the guard");
                return;
            }
        };
        let active = self.flight().complete(id);
        let Some(active) = active else {
            if let Ok(SyncSuccess::Committed { metadata }) = &result {
                log::warn!(
                    "{kind} {id} committed revision {} after it was cancelled; remote may diverge",
                    metadata.revision
                );
            } else {
                log::warn!("ignoring late {kind} {id} result: {result:?}");
            }
            return;
        };
        match &result {
            Ok(success) => log::info!("{kind} {id} succeeded: {success:?}"),
            Err(SyncError::UserCancelled) => log::info!("{kind} {id} cancelled by user"),
            Err(err @ (SyncError::TransportOpenFailed(_)
            | SyncError::TransportReadFailed(_)
            | SyncError::TransportWriteFailed(_))) => log::error!("{kind} {id} failed: {err}"),
            Err(err) => log::warn!("{kind} {id} failed: {err}"),
        }
        self.emit(SyncEvent::finished(kind, result.clone()));
        active.finish(result);
    }

    /// The flow for `id` ended without a result.
    fn interrupt(&self, id: OperationId, kind: OperationKind) {
        let Some(active) = self.flight().complete(id) else {
            log::debug!("{kind} {id} task ended after losing the guard");
            return;
        };
        log::error!("{kind} {id} task ended without reporting a result");
        self.emit(SyncEvent::finished(kind, Err(SyncError::Interrupted)));
        active.finish(Err(SyncError::Interrupted));
    }

    async fn await_choice<T>(
        &self,
        id: OperationId,
        decision: PendingDecision,
        event: SyncEvent,
        reply: oneshot::Receiver<T>,
    ) -> Step<T> {
        if !self.flight().park(id, decision) {
            return Err(Halt::Abandoned);
        }
        self.emit(event);
        reply.await.map_err(|_| Halt::Abandoned)
    }

    async fn ask_save(&self, id: OperationId, conflict: SaveConflict) -> Step<SaveChoice> {
        let (reply, rx) = oneshot::channel();
        let event = SyncEvent::SaveConflictDetected(conflict.clone());
        self.await_choice(id, PendingDecision::Save { conflict, reply }, event, rx)
            .await
    }

    async fn ask_slot(&self, id: OperationId, view: SlotConflictView) -> Step<SlotChoice> {
        let (reply, rx) = oneshot::channel();
        let event = SyncEvent::SlotConflictDetected(view.clone());
        self.await_choice(id, PendingDecision::Slot { view, reply }, event, rx)
            .await
    }

    async fn ask_offer(&self, id: OperationId, offer: CloudOffer) -> Step<LoadChoice> {
        let (reply, rx) = oneshot::channel();
        let event = SyncEvent::CloudRecordOffered(offer.clone());
        self.await_choice(id, PendingDecision::Cloud { offer, reply }, event, rx)
            .await
    }

    fn adopt(&self, id: OperationId, record: &SaveRecord) -> Step<()> {
        self.checkpoint(id, SyncPhase::ApplyingLocal)?;
        self.book
            .adopt(record.clone())
            .map_err(|err| SyncError::LocalStore(err.to_string()).into())
    }

    async fn commit(
        &self,
        id: OperationId,
        handle: SlotHandle,
        local: &SaveRecord,
    ) -> Step<SyncSuccess> {
        self.checkpoint(id, SyncPhase::Committing)?;
        let payload =
            codec::encode(local).map_err(|err| SyncError::EncodeFailed(err.to_string()))?;
        let description = self.config.describe_commit(self.now());
        log::debug!(
            "committing {} bytes to {} ({description})",
            payload.len(),
            handle.metadata().slot
        );
        let metadata = self
            .remote
            .write_binary(handle, payload, description)
            .await
            .map_err(SyncError::TransportWriteFailed)?;
        Ok(SyncSuccess::Committed { metadata })
    }

    /// Open the slot, walking the user through any transport conflicts.
    /// Yields the handle and the side picked for the last conflict.
    async fn open_resolved(
        &self,
        id: OperationId,
        kind: OperationKind,
        policy: ReadPolicy,
    ) -> Step<(SlotHandle, Option<(SlotChoice, SlotConflictView)>)> {
        self.checkpoint(id, SyncPhase::Opening)?;
        let mut opened = self
            .remote
            .open_slot(&self.config.slot_name, policy)
            .await
            .map_err(SyncError::TransportOpenFailed)?;
        let mut picked = None;
        loop {
            match opened {
                SlotOpen::Opened(handle) => return Ok((handle, picked)),
                SlotOpen::Conflict(conflict) => {
                    self.checkpoint(id, SyncPhase::AwaitingSlotDecision)?;
                    log::info!("{kind} {id} hit transport conflict {}", conflict.id);
                    let view = SlotConflictView::label(&conflict, kind, id);
                    let choice = self.ask_slot(id, view.clone()).await?;
                    let Some(side) = choice.side(kind) else {
                        return Err(SyncError::UserCancelled.into());
                    };
                    self.checkpoint(id, SyncPhase::ResolvingSlot)?;
                    opened = self
                        .remote
                        .resolve_conflict(conflict, side)
                        .await
                        .map_err(SyncError::TransportOpenFailed)?;
                    picked = Some((choice, view));
                }
            }
        }
    }

    async fn run_save(&self, id: OperationId, record: Option<SaveRecord>) -> Step<SyncSuccess> {
        let local = record
            .or_else(|| self.book.current())
            .ok_or(SyncError::NoLocalRecord)?;
        let (handle, picked) = self
            .open_resolved(id, OperationKind::Save, ReadPolicy::NetworkOnly)
            .await?;

        if let Some((choice, view)) = picked {
            return match choice {
                SlotChoice::UseCloud => {
                    let record = view.cloud.record.ok_or_else(|| {
                        SyncError::DecodeFailed("chosen cloud version is unreadable".to_string())
                    })?;
                    self.adopt(id, &record)?;
                    Ok(SyncSuccess::KeptCloud { record })
                }
                SlotChoice::UseLocal | SlotChoice::Cancel => self.commit(id, handle, &local).await,
            };
        }

        self.checkpoint(id, SyncPhase::Reading)?;
        let bytes = self
            .remote
            .read_binary(&handle)
            .await
            .map_err(SyncError::TransportReadFailed)?;
        let Some(cloud) = codec::decode_lenient(&bytes) else {
            log::debug!("save {id}: remote slot holds no usable record, uploading directly");
            return self.commit(id, handle, &local).await;
        };

        let conflict = SaveConflict {
            operation: id,
            cloud,
            local: local.clone(),
            cloud_metadata: handle.metadata().clone(),
        };
        match self.ask_save(id, conflict.clone()).await? {
            SaveChoice::UseCloud => {
                self.adopt(id, &conflict.cloud)?;
                Ok(SyncSuccess::KeptCloud {
                    record: conflict.cloud,
                })
            }
            SaveChoice::UseLocal => self.commit(id, handle, &local).await,
            SaveChoice::Cancel => Err(SyncError::UserCancelled.into()),
        }
    }

    async fn run_load(&self, id: OperationId) -> Step<SyncSuccess> {
        let (handle, picked) = self
            .open_resolved(id, OperationKind::Load, self.config.load_read_policy)
            .await?;

        if let Some((choice, view)) = picked {
            let candidate = view
                .candidate(choice)
                .and_then(|candidate| candidate.record.clone())
                .ok_or_else(|| {
                    SyncError::DecodeFailed("chosen version is unreadable".to_string())
                })?;
            self.adopt(id, &candidate)?;
            return Ok(SyncSuccess::AppliedCloud { record: candidate });
        }

        self.checkpoint(id, SyncPhase::Reading)?;
        let bytes = self
            .remote
            .read_binary(&handle)
            .await
            .map_err(SyncError::TransportReadFailed)?;
        if bytes.is_empty() {
            return Ok(SyncSuccess::NoRemoteData);
        }
        let cloud =
            codec::decode(&bytes).map_err(|err| SyncError::DecodeFailed(err.to_string()))?;

        let offer = CloudOffer {
            operation: id,
            cloud,
            local: self.book.current(),
            cloud_metadata: handle.metadata().clone(),
        };
        match self.ask_offer(id, offer.clone()).await? {
            LoadChoice::UseCloud => {
                self.adopt(id, &offer.cloud)?;
                Ok(SyncSuccess::AppliedCloud { record: offer.cloud })
            }
            LoadChoice::KeepLocal => Ok(SyncSuccess::KeptLocal),
            LoadChoice::Cancel => Err(SyncError::UserCancelled.into()),
        }
    }
}
