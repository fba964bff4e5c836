//! Persisted game progress snapshot.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{
    CURRENT_SCHEMA_VERSION, DEFAULT_ATTACK_DELAY, DEFAULT_ATTACK_POWER, DEFAULT_LEVEL,
    DEFAULT_SPEED, DEFAULT_XP_TO_NEXT_LEVEL, FIRST_STAGE, TICKS_PER_SECOND, UNIX_EPOCH_TICKS,
};

/// Best score reached so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInfo {
    #[serde(default)]
    pub high_score: i32,
}

/// Stage progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    #[serde(default = "StageInfo::default_stage")]
    pub current_stage: i32,
}

impl Default for StageInfo {
    fn default() -> Self {
        Self {
            current_stage: Self::default_stage(),
        }
    }
}

impl StageInfo {
    const fn default_stage() -> i32 {
        FIRST_STAGE
    }
}

/// Hero progression carried between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterInfo {
    pub level: i32,
    #[serde(rename = "currentXP")]
    pub current_xp: i32,
    pub xp_to_next_level: i32,
    pub attack_power: i32,
    pub speed: f32,
    pub attack_delay: f32,
}

impl Default for CharacterInfo {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            current_xp: 0,
            xp_to_next_level: DEFAULT_XP_TO_NEXT_LEVEL,
            attack_power: DEFAULT_ATTACK_POWER,
            speed: DEFAULT_SPEED,
            attack_delay: DEFAULT_ATTACK_DELAY,
        }
    }
}

/// The snapshot synchronized between the device and the cloud slot.
///
/// Field names on the wire match the files written by earlier clients, so
/// an existing `game_info.json` decodes without migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    /// Absent in the oldest files, which read as version 0.
    #[serde(rename = "version", default)]
    pub schema_version: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub score_info: ScoreInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stage_info: StageInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub character_info: CharacterInfo,
    #[serde(default)]
    pub gold: i32,
    /// UTC ticks (100 ns since 0001-01-01) of the last local save.
    #[serde(default)]
    pub saved_at_ticks: i64,
}

impl SaveRecord {
    /// Record created the first time the game runs on a device.
    #[must_use]
    pub fn first_run(now_ticks: i64) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            score_info: ScoreInfo::default(),
            stage_info: StageInfo::default(),
            character_info: CharacterInfo::default(),
            gold: 0,
            saved_at_ticks: now_ticks,
        }
    }

    #[must_use]
    pub const fn current_stage(&self) -> i32 {
        self.stage_info.current_stage
    }

    /// Wall-clock time of the last save, if the ticks are representable.
    #[must_use]
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        datetime_from_ticks(self.saved_at_ticks)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Convert a UTC timestamp into 100 ns ticks since 0001-01-01.
#[must_use]
pub fn ticks_from_datetime(at: DateTime<Utc>) -> i64 {
    let whole = at.timestamp().saturating_mul(TICKS_PER_SECOND);
    let fraction = i64::from(at.timestamp_subsec_nanos() / 100);
    UNIX_EPOCH_TICKS.saturating_add(whole).saturating_add(fraction)
}

/// Convert ticks back into a UTC timestamp.
#[must_use]
pub fn datetime_from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = u32::try_from(since_epoch.rem_euclid(TICKS_PER_SECOND) * 100).ok()?;
    DateTime::from_timestamp(secs, nanos)
}
