//! Synchronizer settings.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_DESCRIPTION_PREFIX, DEFAULT_SLOT_NAME, DESCRIPTION_TIME_FORMAT};
use crate::remote::ReadPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sync config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("slot name must not be blank")]
    BlankSlotName,
    #[error("slot name `{0}` exceeds {max} characters", max = SyncConfig::MAX_SLOT_NAME_LEN)]
    SlotNameTooLong(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Name of the single remote slot holding the record.
    pub slot_name: String,
    /// Read policy used when loading; saves always go to the network.
    /// Cached reads may return a stale record, so they are opt-in.
    pub load_read_policy: ReadPolicy,
    /// Leading text of the description attached to each commit.
    pub description_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slot_name: DEFAULT_SLOT_NAME.to_string(),
            load_read_policy: ReadPolicy::NetworkOnly,
            description_prefix: DEFAULT_DESCRIPTION_PREFIX.to_string(),
        }
    }
}

impl SyncConfig {
    pub const MAX_SLOT_NAME_LEN: usize = 100;

    /// Parse and validate a JSON config; absent keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or fails [`SyncConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if the slot name is blank or too long.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.slot_name.trim();
        if name.is_empty() {
            return Err(ConfigError::BlankSlotName);
        }
        if name.chars().count() > Self::MAX_SLOT_NAME_LEN {
            return Err(ConfigError::SlotNameTooLong(self.slot_name.clone()));
        }
        Ok(())
    }

    /// Commit description, e.g. `Saved game at 2024-01-01 09:30:00`.
    #[must_use]
    pub fn describe_commit(&self, at: DateTime<Utc>) -> String {
        format!(
            "{} {}",
            self.description_prefix,
            at.format(DESCRIPTION_TIME_FORMAT)
        )
    }
}
