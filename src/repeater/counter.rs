//! Ephemeral fingerprint counters with time-to-live semantics.
//!
//! Counters live outside the durable store on purpose: they need race-free
//! O(1) increments and automatic expiry, and losing them only under-counts an
//! in-flight repeat streak. The `CounterStore` trait is the seam that lets
//! the in-memory backend be swapped for an external cache without touching
//! the trigger engine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Deadline given to a freshly created counter before the engine's
/// unconditional TTL refresh lands.
const PROVISIONAL_TTL: Duration = Duration::from_secs(30);

/// Sweep fully-expired keys once the map grows past this.
const SWEEP_THRESHOLD: usize = 4096;

/// Counting capability keyed by `(chat_id, fingerprint)`.
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter, creating it at 1 if absent (or
    /// expired) and capturing `text` as the first-seen form on creation.
    ///
    /// An `Err` means the backing store is unavailable; the caller must not
    /// trigger on it. A failed bump never counts as 1.
    fn bump(&self, chat_id: i64, fingerprint: &str, text: &str) -> Result<u32, String>;

    /// Reset the counter's expiry. Called after every successful bump with
    /// the chat's TTL as configured at that moment.
    fn refresh_ttl(&self, chat_id: i64, fingerprint: &str, ttl: Duration);

    /// Number of live counters in the chat's namespace. Diagnostics only.
    fn count_distinct(&self, chat_id: i64) -> usize;

    /// The raw content captured when the counter was created, if still live.
    fn first_text(&self, chat_id: i64, fingerprint: &str) -> Option<String>;
}

struct Entry {
    count: u32,
    first_text: String,
    deadline: Instant,
}

/// In-process counter backend. The mutex makes each bump a single atomic
/// operation, so two occurrences racing on the same key still count up by
/// exactly one each.
pub struct MemoryCounter {
    entries: Mutex<HashMap<(i64, String), Entry>>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryCounter {
    fn bump(&self, chat_id: i64, fingerprint: &str, text: &str) -> Result<u32, String> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "counter state poisoned".to_string())?;
        let now = Instant::now();

        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, e| e.deadline > now);
        }

        let key = (chat_id, fingerprint.to_string());
        match entries.get_mut(&key) {
            Some(entry) if entry.deadline > now => {
                entry.count += 1;
                Ok(entry.count)
            }
            _ => {
                // Absent or expired: a fresh lifetime starts at 1.
                entries.insert(
                    key,
                    Entry {
                        count: 1,
                        first_text: text.to_string(),
                        deadline: now + PROVISIONAL_TTL,
                    },
                );
                Ok(1)
            }
        }
    }

    fn refresh_ttl(&self, chat_id: i64, fingerprint: &str, ttl: Duration) {
        let Ok(mut entries) = self.entries.lock() else {
            warn!("Counter state poisoned, TTL refresh dropped");
            return;
        };
        let key = (chat_id, fingerprint.to_string());
        if let Some(entry) = entries.get_mut(&key) {
            entry.deadline = Instant::now() + ttl;
        }
    }

    fn count_distinct(&self, chat_id: i64) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let now = Instant::now();
        entries.retain(|_, e| e.deadline > now);
        entries.keys().filter(|(chat, _)| *chat == chat_id).count()
    }

    fn first_text(&self, chat_id: i64, fingerprint: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        let now = Instant::now();
        entries
            .get(&(chat_id, fingerprint.to_string()))
            .filter(|e| e.deadline > now)
            .map(|e| e.first_text.clone())
    }
}
