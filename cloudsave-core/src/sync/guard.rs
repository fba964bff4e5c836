//! Single-flight guard and the decision awaiting a human.
use tokio::sync::oneshot;

use super::outcome::{OperationId, OperationOutcome, SyncError, SyncSuccess};
use crate::conflict::{
    CloudOffer, ConflictContext, LoadChoice, OperationKind, SaveChoice, SaveConflict, SlotChoice,
    SlotConflictView,
};

/// Where the in-flight operation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Opening,
    AwaitingSlotDecision,
    ResolvingSlot,
    Reading,
    AwaitingSaveDecision,
    AwaitingCloudOffer,
    Committing,
    ApplyingLocal,
}

pub(crate) enum PendingDecision {
    Save {
        conflict: SaveConflict,
        reply: oneshot::Sender<SaveChoice>,
    },
    Slot {
        view: SlotConflictView,
        reply: oneshot::Sender<SlotChoice>,
    },
    Cloud {
        offer: CloudOffer,
        reply: oneshot::Sender<LoadChoice>,
    },
}

impl PendingDecision {
    const fn phase(&self) -> SyncPhase {
        match self {
            Self::Save { .. } => SyncPhase::AwaitingSaveDecision,
            Self::Slot { .. } => SyncPhase::AwaitingSlotDecision,
            Self::Cloud { .. } => SyncPhase::AwaitingCloudOffer,
        }
    }

    fn context(&self) -> ConflictContext {
        match self {
            Self::Save { conflict, .. } => ConflictContext::Save(conflict.clone()),
            Self::Slot { view, .. } => ConflictContext::Slot(view.clone()),
            Self::Cloud { offer, .. } => ConflictContext::CloudOffer(offer.clone()),
        }
    }
}

pub(crate) struct ActiveOperation {
    pub(crate) id: OperationId,
    pub(crate) kind: OperationKind,
    phase: SyncPhase,
    pending: Option<PendingDecision>,
    done: oneshot::Sender<OperationOutcome>,
}

impl ActiveOperation {
    /// Hand the outcome to whoever awaits the operation handle.
    pub(crate) fn finish(self, result: Result<SyncSuccess, SyncError>) {
        let outcome = OperationOutcome {
            kind: self.kind,
            result,
        };
        if self.done.send(outcome).is_err() {
            log::debug!("{} {} finished with no one awaiting it", self.kind, self.id);
        }
    }
}

#[derive(Default)]
pub(crate) struct FlightState {
    next_id: u64,
    active: Option<ActiveOperation>,
}

impl FlightState {
    /// Claim the guard for a new operation.
    pub(crate) fn begin(
        &mut self,
        kind: OperationKind,
    ) -> Result<(OperationId, oneshot::Receiver<OperationOutcome>), SyncError> {
        if self.active.is_some() {
            return Err(SyncError::OperationInProgress);
        }
        self.next_id += 1;
        let id = OperationId(self.next_id);
        let (done, rx) = oneshot::channel();
        self.active = Some(ActiveOperation {
            id,
            kind,
            phase: SyncPhase::Opening,
            pending: None,
            done,
        });
        Ok((id, rx))
    }

    pub(crate) fn active_kind(&self) -> Option<OperationKind> {
        self.active.as_ref().map(|active| active.kind)
    }

    pub(crate) fn phase(&self) -> SyncPhase {
        self.active
            .as_ref()
            .map_or(SyncPhase::Idle, |active| active.phase)
    }

    pub(crate) fn pending_context(&self) -> Option<ConflictContext> {
        self.active
            .as_ref()
            .and_then(|active| active.pending.as_ref())
            .map(PendingDecision::context)
    }

    fn current_mut(&mut self, id: OperationId) -> Option<&mut ActiveOperation> {
        self.active.as_mut().filter(|active| active.id == id)
    }

    /// Move a still-current operation to `phase`; false once it was
    /// cancelled or superseded.
    pub(crate) fn advance(&mut self, id: OperationId, phase: SyncPhase) -> bool {
        match self.current_mut(id) {
            Some(active) => {
                active.phase = phase;
                true
            }
            None => false,
        }
    }

    /// Park a decision; false (and the decision dropped) when stale.
    pub(crate) fn park(&mut self, id: OperationId, decision: PendingDecision) -> bool {
        match self.current_mut(id) {
            Some(active) => {
                active.phase = decision.phase();
                active.pending = Some(decision);
                true
            }
            None => false,
        }
    }

    /// Take the pending decision if it belongs to `id` and `accepts` matches it.
    pub(crate) fn take_pending(
        &mut self,
        id: OperationId,
        accepts: impl Fn(&PendingDecision) -> bool,
    ) -> Option<PendingDecision> {
        let active = self.current_mut(id)?;
        if !active.pending.as_ref().is_some_and(accepts) {
            return None;
        }
        active.pending.take()
    }

    /// Release the guard if `id` still owns it.
    pub(crate) fn complete(&mut self, id: OperationId) -> Option<ActiveOperation> {
        if self.active.as_ref().is_some_and(|active| active.id == id) {
            self.active.take()
        } else {
            None
        }
    }

    /// Release the guard whoever owns it.
    pub(crate) fn abort(&mut self) -> Option<ActiveOperation> {
        self.active.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_is_refused_until_completion() {
        let mut flight = FlightState::default();
        let (first, _rx) = flight.begin(OperationKind::Save).unwrap();
        assert!(matches!(
            flight.begin(OperationKind::Load),
            Err(SyncError::OperationInProgress)
        ));
        assert_eq!(flight.active_kind(), Some(OperationKind::Save));
        assert!(flight.complete(first).is_some());
        assert_eq!(flight.phase(), SyncPhase::Idle);
        assert!(flight.begin(OperationKind::Load).is_ok());
    }

    #[test]
    fn stale_operation_cannot_touch_the_new_one() {
        let mut flight = FlightState::default();
        let (stale, _rx) = flight.begin(OperationKind::Save).unwrap();
        assert!(flight.abort().is_some());
        let (fresh, _rx) = flight.begin(OperationKind::Save).unwrap();
        assert_ne!(stale, fresh);

        assert!(!flight.advance(stale, SyncPhase::Committing));
        assert!(flight.complete(stale).is_none());
        assert_eq!(flight.phase(), SyncPhase::Opening);
        assert!(flight.advance(fresh, SyncPhase::Reading));
        assert_eq!(flight.phase(), SyncPhase::Reading);
    }

    #[test]
    fn pending_decision_is_taken_only_by_matching_kind() {
        let mut flight = FlightState::default();
        let (id, _rx) = flight.begin(OperationKind::Load).unwrap();
        let (reply, _choice) = oneshot::channel();
        let offer = CloudOffer {
            operation: id,
            cloud: crate::record::SaveRecord::first_run(1),
            local: None,
            cloud_metadata: crate::remote::SlotMetadata {
                slot: "game_info".to_string(),
                last_modified: chrono::DateTime::UNIX_EPOCH,
                description: None,
                revision: 1,
                content_digest: None,
            },
        };
        assert!(flight.park(id, PendingDecision::Cloud { offer, reply }));
        assert_eq!(flight.phase(), SyncPhase::AwaitingCloudOffer);
        assert!(matches!(
            flight.pending_context(),
            Some(ConflictContext::CloudOffer(_))
        ));

        assert!(
            flight
                .take_pending(id, |p| matches!(p, PendingDecision::Save { .. }))
                .is_none()
        );
        assert!(
            flight
                .take_pending(id, |p| matches!(p, PendingDecision::Cloud { .. }))
                .is_some()
        );
        assert!(flight.pending_context().is_none());
    }

    #[test]
    fn answer_for_an_earlier_operation_is_refused() {
        let mut flight = FlightState::default();
        let (stale, _rx) = flight.begin(OperationKind::Save).unwrap();
        assert!(flight.abort().is_some());
        let (fresh, _rx) = flight.begin(OperationKind::Load).unwrap();
        let (reply, _choice) = oneshot::channel();
        let offer = CloudOffer {
            operation: fresh,
            cloud: crate::record::SaveRecord::first_run(1),
            local: None,
            cloud_metadata: crate::remote::SlotMetadata {
                slot: "game_info".to_string(),
                last_modified: chrono::DateTime::UNIX_EPOCH,
                description: None,
                revision: 1,
                content_digest: None,
            },
        };
        assert!(flight.park(fresh, PendingDecision::Cloud { offer, reply }));

        assert!(flight.take_pending(stale, |_| true).is_none());
        assert_eq!(flight.phase(), SyncPhase::AwaitingCloudOffer);
        assert_eq!(
            flight.pending_context().map(|context| context.operation()),
            Some(fresh)
        );
        assert!(flight.take_pending(fresh, |_| true).is_some());
    }
}
