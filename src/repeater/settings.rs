//! Per-chat settings with an in-memory cache over the durable store.
//!
//! The cache is the process-wide read-mostly view; every create/update is
//! written through to the `config` table so settings survive restarts. The
//! table is reconstructible from user commands, so a failed persist is
//! logged and tolerated rather than fatal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::repeater::database::Database;

pub const DEFAULT_THRESHOLD: u16 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u16 = 30;
pub const DEFAULT_TIMEZONE_OFFSET: i8 = 0;

pub const MIN_THRESHOLD: u16 = 3;
pub const MAX_THRESHOLD: u16 = 32767;
pub const MIN_TIMEOUT_SECONDS: u16 = 10;
pub const MAX_TIMEOUT_SECONDS: u16 = 32767;
pub const MIN_TIMEZONE_OFFSET: i8 = -12;
pub const MAX_TIMEZONE_OFFSET: i8 = 12;

/// Settings for one chat. Negative `chat_id` marks a group chat; the sign is
/// a semantic marker only, never compared with `<`/`>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    pub chat_id: i64,
    /// Occurrences (including the original) that trigger a repeat.
    pub threshold: u16,
    /// Seconds of idleness after which a fingerprint counter expires.
    pub timeout_seconds: u16,
    /// Hour offset from UTC, used for date-range query rendering.
    pub timezone_offset: i8,
}

impl ChatSettings {
    pub fn with_defaults(chat_id: i64) -> Self {
        Self {
            chat_id,
            threshold: DEFAULT_THRESHOLD,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            timezone_offset: DEFAULT_TIMEZONE_OFFSET,
        }
    }
}

/// Field overrides for `ensure`. Bounds are the caller's responsibility;
/// the store persists whatever it is handed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsUpdate {
    pub threshold: Option<u16>,
    pub timeout_seconds: Option<u16>,
    pub timezone_offset: Option<i8>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.threshold.is_none() && self.timeout_seconds.is_none() && self.timezone_offset.is_none()
    }

    fn apply(&self, settings: &mut ChatSettings) {
        if let Some(threshold) = self.threshold {
            settings.threshold = threshold;
        }
        if let Some(timeout) = self.timeout_seconds {
            settings.timeout_seconds = timeout;
        }
        if let Some(offset) = self.timezone_offset {
            settings.timezone_offset = offset;
        }
    }
}

/// Process-wide settings cache backed by the durable store.
pub struct SettingsCache {
    chats: RwLock<HashMap<i64, ChatSettings>>,
    db: Arc<Database>,
}

impl SettingsCache {
    /// Load every persisted row at startup.
    pub fn load(db: Arc<Database>) -> Self {
        let chats: HashMap<i64, ChatSettings> = db
            .load_all_settings()
            .into_iter()
            .map(|s| (s.chat_id, s))
            .collect();
        info!("Loaded settings for {} chat(s)", chats.len());
        Self {
            chats: RwLock::new(chats),
            db,
        }
    }

    pub fn get(&self, chat_id: i64) -> Option<ChatSettings> {
        self.chats
            .read()
            .expect("settings lock poisoned")
            .get(&chat_id)
            .copied()
    }

    /// Get-or-create with optional field overrides.
    ///
    /// Present + no overrides returns the cached value without a write.
    /// Otherwise the merged value is persisted via an upsert, so two
    /// concurrent creates for the same chat collapse into one row.
    pub fn ensure(&self, chat_id: i64, overrides: SettingsUpdate) -> ChatSettings {
        if overrides.is_empty()
            && let Some(existing) = self.get(chat_id)
        {
            return existing;
        }

        let mut chats = self.chats.write().expect("settings lock poisoned");
        let settings = chats
            .entry(chat_id)
            .or_insert_with(|| ChatSettings::with_defaults(chat_id));
        overrides.apply(settings);
        let settings = *settings;
        drop(chats);

        if let Err(e) = self.db.upsert_settings(&settings) {
            warn!("Failed to persist settings for chat {chat_id}: {e}");
        }
        settings
    }

    /// Number of group chats (negative ids) seen so far.
    pub fn group_count(&self) -> usize {
        self.chats
            .read()
            .expect("settings lock poisoned")
            .keys()
            .filter(|id| id.is_negative())
            .count()
    }
}
