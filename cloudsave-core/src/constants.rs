//! Centralized defaults for save records, files and the remote slot.
//!
//! Character defaults mirror the hero's starting stats so a record that
//! lacks character data decodes into a playable hero.

// Record schema ------------------------------------------------------------
pub const CURRENT_SCHEMA_VERSION: i32 = 1;
pub const FIRST_STAGE: i32 = 1;

// Hero starting stats ------------------------------------------------------
pub const DEFAULT_LEVEL: i32 = 1;
pub const DEFAULT_XP_TO_NEXT_LEVEL: i32 = 100;
pub const DEFAULT_ATTACK_POWER: i32 = 20;
pub const DEFAULT_SPEED: f32 = 1.0;
pub const DEFAULT_ATTACK_DELAY: f32 = 0.5;

// Local files --------------------------------------------------------------
pub const SAVE_FILE_NAME: &str = "game_info.json";
pub const BACKUP_FILE_NAME: &str = "game_info_back.json";

// Remote slot --------------------------------------------------------------
pub const DEFAULT_SLOT_NAME: &str = "game_info";
pub const DEFAULT_DESCRIPTION_PREFIX: &str = "Saved game at";
pub(crate) const DESCRIPTION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub(crate) const SUMMARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

// Ticks --------------------------------------------------------------------
/// 100 ns ticks per second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;
/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

// Event stream -------------------------------------------------------------
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;
