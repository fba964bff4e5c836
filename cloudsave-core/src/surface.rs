//! Presentation side of conflict resolution.
//!
//! A [`ConflictSurface`] is whatever shows the confirmation panel. The
//! synchronizer never calls it directly; [`attach_surface`] listens to the
//! event stream, asks the surface, and feeds the answer back.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::conflict::{
    CloudOffer, ConflictContext, LoadChoice, SaveChoice, SaveConflict, SlotChoice,
    SlotConflictView,
};
use crate::constants::SUMMARY_TIME_FORMAT;
use crate::local::LocalSaveStore;
use crate::record::SaveRecord;
use crate::remote::RemoteSaveClient;
use crate::sync::{OperationOutcome, SaveSynchronizer, SyncError, SyncEvent};

#[async_trait]
pub trait ConflictSurface: Send + Sync + 'static {
    async fn present_save_conflict(&self, conflict: SaveConflict) -> SaveChoice;

    async fn present_slot_conflict(&self, view: SlotConflictView) -> SlotChoice;

    async fn present_cloud_offer(&self, offer: CloudOffer) -> LoadChoice;

    /// Called for every finished operation, e.g. to re-enable a retry button.
    async fn operation_finished(&self, _outcome: OperationOutcome) {}
}

/// Drive `surface` from the synchronizer's events until the synchronizer
/// is dropped or the task is aborted.
pub fn attach_surface<L, R, S>(sync: &SaveSynchronizer<L, R>, surface: S) -> JoinHandle<()>
where
    L: LocalSaveStore + 'static,
    R: RemoteSaveClient + 'static,
    S: ConflictSurface,
{
    let mut events = sync.subscribe();
    let weak = sync.downgrade();
    sync.runtime().spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("conflict surface missed {missed} sync events");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if let Some(outcome) = event.outcome() {
                surface.operation_finished(outcome).await;
                continue;
            }
            let answered = match event {
                SyncEvent::SaveConflictDetected(conflict) => {
                    let operation = conflict.operation;
                    let choice = surface.present_save_conflict(conflict).await;
                    weak.upgrade()
                        .map(|sync| sync.resolve_save_conflict(operation, choice))
                }
                SyncEvent::SlotConflictDetected(view) => {
                    let operation = view.operation;
                    let choice = surface.present_slot_conflict(view).await;
                    weak.upgrade()
                        .map(|sync| sync.resolve_slot_conflict(operation, choice))
                }
                SyncEvent::CloudRecordOffered(offer) => {
                    let operation = offer.operation;
                    let choice = surface.present_cloud_offer(offer).await;
                    weak.upgrade()
                        .map(|sync| sync.resolve_cloud_offer(operation, choice))
                }
                _ => continue,
            };
            match answered {
                Some(Ok(())) => {}
                Some(Err(SyncError::NoPendingDecision)) => {
                    log::debug!("surface answered a prompt that is no longer pending");
                }
                Some(Err(err)) => log::warn!("surface answer rejected: {err}"),
                None => break,
            }
        }
        log::debug!("conflict surface detached");
    })
}

/// One side of the confirmation panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelColumn {
    pub title: String,
    pub time_line: String,
    pub detail: String,
}

/// Text shown by the confirmation panel for one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPanelView {
    pub cloud: PanelColumn,
    pub local: PanelColumn,
}

const NO_DATA: &str = "(No data)";

impl ConflictPanelView {
    #[must_use]
    pub fn from_context(context: &ConflictContext) -> Self {
        match context {
            ConflictContext::Save(conflict) => Self::from_save_conflict(conflict),
            ConflictContext::Slot(view) => Self::from_slot_conflict(view),
            ConflictContext::CloudOffer(offer) => Self::from_cloud_offer(offer),
        }
    }

    #[must_use]
    pub fn from_save_conflict(conflict: &SaveConflict) -> Self {
        Self {
            cloud: saved_column("Cloud Data", Some(&conflict.cloud)),
            local: saved_column("Local Data", Some(&conflict.local)),
        }
    }

    #[must_use]
    pub fn from_cloud_offer(offer: &CloudOffer) -> Self {
        Self {
            cloud: saved_column("Cloud Data", Some(&offer.cloud)),
            local: saved_column("Local Data", offer.local.as_ref()),
        }
    }

    /// Columns are already labeled, so the cloud column always describes
    /// the cloud version; only the titles differ between save and load.
    #[must_use]
    pub fn from_slot_conflict(view: &SlotConflictView) -> Self {
        let (cloud_title, local_title) = if view.is_saving {
            ("Cloud Save", "Local Save")
        } else {
            ("Cloud Data", "Local Data")
        };
        let column = |title: &str, modified: DateTime<Utc>, record: Option<&SaveRecord>| {
            PanelColumn {
                title: title.to_string(),
                time_line: format!("Modified {}", modified.format(SUMMARY_TIME_FORMAT)),
                detail: record.map_or_else(|| NO_DATA.to_string(), stage_line),
            }
        };
        Self {
            cloud: column(
                cloud_title,
                view.cloud.metadata.last_modified,
                view.cloud.record.as_ref(),
            ),
            local: column(
                local_title,
                view.local.metadata.last_modified,
                view.local.record.as_ref(),
            ),
        }
    }
}

fn stage_line(record: &SaveRecord) -> String {
    format!("Stage: {}", record.current_stage())
}

fn saved_column(title: &str, record: Option<&SaveRecord>) -> PanelColumn {
    let (time_line, detail) = match record {
        Some(record) => {
            let saved = record.saved_at().map_or_else(
                || NO_DATA.to_string(),
                |at| format!("Saved {}", at.format(SUMMARY_TIME_FORMAT)),
            );
            (saved, stage_line(record))
        }
        None => (NO_DATA.to_string(), String::new()),
    };
    PanelColumn {
        title: title.to_string(),
        time_line,
        detail,
    }
}
