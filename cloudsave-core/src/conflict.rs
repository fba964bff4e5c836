//! Conflict contexts handed to the presentation layer, and the one place
//! where the transport's positional candidates get their cloud/local
//! meaning.
use std::fmt;

use crate::record::SaveRecord;
use crate::remote::{ConflictSide, SlotConflict, SlotMetadata};
use crate::sync::OperationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Save,
    Load,
}

impl OperationKind {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Load => "load",
        }
    }

    /// Positional side holding the cloud version for this operation.
    ///
    /// A save opens against the service, so the service's copy is the
    /// original and the device's pending write is unmerged. A load sees
    /// the device copy as original and the incoming service copy as
    /// unmerged.
    #[must_use]
    pub const fn cloud_side(self) -> ConflictSide {
        match self {
            Self::Save => ConflictSide::Original,
            Self::Load => ConflictSide::Unmerged,
        }
    }

    #[must_use]
    pub const fn local_side(self) -> ConflictSide {
        match self.cloud_side() {
            ConflictSide::Original => ConflictSide::Unmerged,
            ConflictSide::Unmerged => ConflictSide::Original,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Decodable cloud record found while saving.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveConflict {
    /// Operation that must answer this conflict.
    pub operation: OperationId,
    pub cloud: SaveRecord,
    pub local: SaveRecord,
    pub cloud_metadata: SlotMetadata,
}

/// Decodable cloud record found while loading.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudOffer {
    pub operation: OperationId,
    pub cloud: SaveRecord,
    pub local: Option<SaveRecord>,
    pub cloud_metadata: SlotMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledCandidate {
    pub metadata: SlotMetadata,
    /// `None` when the candidate payload is empty or corrupt.
    pub record: Option<SaveRecord>,
}

/// Transport conflict with candidates already labeled cloud and local.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotConflictView {
    pub operation: OperationId,
    pub cloud: LabeledCandidate,
    pub local: LabeledCandidate,
    pub is_saving: bool,
}

impl SlotConflictView {
    #[must_use]
    pub fn label(conflict: &SlotConflict, kind: OperationKind, operation: OperationId) -> Self {
        let labeled = |side| {
            let candidate = conflict.candidate(side);
            LabeledCandidate {
                metadata: candidate.metadata.clone(),
                record: candidate.record(),
            }
        };
        Self {
            operation,
            cloud: labeled(kind.cloud_side()),
            local: labeled(kind.local_side()),
            is_saving: kind == OperationKind::Save,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        if self.is_saving {
            OperationKind::Save
        } else {
            OperationKind::Load
        }
    }

    #[must_use]
    pub const fn candidate(&self, choice: SlotChoice) -> Option<&LabeledCandidate> {
        match choice {
            SlotChoice::UseCloud => Some(&self.cloud),
            SlotChoice::UseLocal => Some(&self.local),
            SlotChoice::Cancel => None,
        }
    }
}

/// Decision awaiting a human.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictContext {
    Save(SaveConflict),
    Slot(SlotConflictView),
    CloudOffer(CloudOffer),
}

impl ConflictContext {
    /// Operation the decision belongs to; answers must quote it.
    #[must_use]
    pub const fn operation(&self) -> OperationId {
        match self {
            Self::Save(conflict) => conflict.operation,
            Self::Slot(view) => view.operation,
            Self::CloudOffer(offer) => offer.operation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveChoice {
    /// Keep the cloud record and copy it to the device; nothing is uploaded.
    UseCloud,
    /// Overwrite the cloud with the device record.
    UseLocal,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotChoice {
    UseCloud,
    UseLocal,
    Cancel,
}

impl SlotChoice {
    /// Positional side to hand the transport, `None` on cancel.
    #[must_use]
    pub const fn side(self, kind: OperationKind) -> Option<ConflictSide> {
        match self {
            Self::UseCloud => Some(kind.cloud_side()),
            Self::UseLocal => Some(kind.local_side()),
            Self::Cancel => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadChoice {
    /// Replace the device record with the cloud record.
    UseCloud,
    KeepLocal,
    Cancel,
}
