//! Persistent SQLite store for chat settings, archived repeats and result sets.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::repeater::settings::ChatSettings;

/// Storage format of `created_at`: UTC, lexicographically ordered.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Matches rendered (and individually addressable) per query.
pub const DISPLAY_LIMIT: usize = 20;

/// One archived repeat. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedMessage {
    pub chat_id: i64,
    /// Transport id of the occurrence that hit the threshold.
    pub source_message_id: i64,
    /// Id of the bot's own re-broadcast; NULL when the attempt failed.
    pub rebroadcast_message_id: Option<i64>,
    pub content: String,
    pub created_at: String,
}

/// Matches for one query: the rendered prefix plus the full matched count.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub matches: Vec<ArchivedMessage>,
    pub total: usize,
}

/// Durable store for the repeat engine.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema();
        db
    }

    /// Load from file if it exists, otherwise create new.
    pub fn load_or_new(path: &Path) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema();

        let (settings, repeats) = db.get_counts();
        info!(
            "Loaded database from {:?} ({} chat settings, {} archived repeats)",
            path, settings, repeats
        );
        db
    }

    fn init_schema(&self) {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                chat_id INTEGER PRIMARY KEY,
                threshold INTEGER NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                timezone_offset INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS message (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                source_message_id INTEGER NOT NULL,
                rebroadcast_message_id INTEGER,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(chat_id, source_message_id)
            );

            CREATE TABLE IF NOT EXISTS record (
                chat_id INTEGER NOT NULL,
                anchor_message_id INTEGER NOT NULL,
                ordered_source_ids TEXT NOT NULL,
                PRIMARY KEY (chat_id, anchor_message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_message_chat_created ON message(chat_id, created_at);
        "#,
        )
        .expect("Failed to initialize database schema");
    }

    fn get_counts(&self) -> (usize, usize) {
        let conn = self.conn.lock().unwrap();
        let settings: i64 = conn
            .query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))
            .unwrap_or(0);
        let repeats: i64 = conn
            .query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
            .unwrap_or(0);
        (settings as usize, repeats as usize)
    }

    // ==================== SETTINGS METHODS ====================

    /// Insert or update a chat's settings. The primary key on `chat_id`
    /// guarantees a concurrent duplicate create degrades to an update.
    pub fn upsert_settings(&self, settings: &ChatSettings) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO config (chat_id, threshold, timeout_seconds, timezone_offset)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
                threshold = ?2,
                timeout_seconds = ?3,
                timezone_offset = ?4",
            params![
                settings.chat_id,
                settings.threshold,
                settings.timeout_seconds,
                settings.timezone_offset
            ],
        )
        .map_err(|e| format!("Failed to upsert settings: {e}"))?;
        Ok(())
    }

    /// All persisted settings, for the startup cache fill.
    pub fn load_all_settings(&self) -> Vec<ChatSettings> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn
            .prepare("SELECT chat_id, threshold, timeout_seconds, timezone_offset FROM config")
        {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!("Failed to read settings: {e}");
                return Vec::new();
            }
        };

        let rows = stmt.query_map([], |row| {
            Ok(ChatSettings {
                chat_id: row.get(0)?,
                threshold: row.get(1)?,
                timeout_seconds: row.get(2)?,
                timezone_offset: row.get(3)?,
            })
        });

        match rows {
            Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
            Err(e) => {
                warn!("Failed to read settings: {e}");
                Vec::new()
            }
        }
    }

    // ==================== ARCHIVE METHODS ====================

    /// Append one repeat to the log. Write-once: re-delivery of the same
    /// triggering occurrence is ignored via the (chat, source) uniqueness.
    pub fn archive_repeat(
        &self,
        chat_id: i64,
        source_message_id: i64,
        rebroadcast_message_id: Option<i64>,
        content: &str,
        created_at: &str,
    ) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO message
                (chat_id, source_message_id, rebroadcast_message_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat_id,
                source_message_id,
                rebroadcast_message_id,
                content,
                created_at
            ],
        )
        .map_err(|e| format!("Failed to archive repeat: {e}"))?;
        Ok(())
    }

    /// Repeats with `start <= created_at < end`, oldest first.
    pub fn query_range(&self, chat_id: i64, start: &str, end: &str) -> Result<QueryOutcome, String> {
        self.query_outcome(
            "SELECT COUNT(*) FROM message
             WHERE chat_id = ?1 AND created_at >= ?2 AND created_at < ?3",
            params![chat_id, start, end],
            "SELECT chat_id, source_message_id, rebroadcast_message_id, content, created_at
             FROM message
             WHERE chat_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC, id ASC LIMIT ?4",
            params![chat_id, start, end, DISPLAY_LIMIT as i64],
        )
    }

    /// Repeats whose content contains `needle` (byte-exact), oldest first.
    /// A blank needle is an error, never "match all".
    pub fn query_text(&self, chat_id: i64, needle: &str) -> Result<QueryOutcome, String> {
        if needle.trim().is_empty() {
            return Err("empty search text".to_string());
        }
        self.query_outcome(
            "SELECT COUNT(*) FROM message
             WHERE chat_id = ?1 AND INSTR(content, ?2) > 0",
            params![chat_id, needle],
            "SELECT chat_id, source_message_id, rebroadcast_message_id, content, created_at
             FROM message
             WHERE chat_id = ?1 AND INSTR(content, ?2) > 0
             ORDER BY created_at ASC, id ASC LIMIT ?3",
            params![chat_id, needle, DISPLAY_LIMIT as i64],
        )
    }

    /// The most recently archived repeats, presented oldest first.
    pub fn query_latest(&self, chat_id: i64) -> Result<QueryOutcome, String> {
        let mut outcome = self.query_outcome(
            "SELECT COUNT(*) FROM message WHERE chat_id = ?1",
            params![chat_id],
            "SELECT chat_id, source_message_id, rebroadcast_message_id, content, created_at
             FROM message
             WHERE chat_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            params![chat_id, DISPLAY_LIMIT as i64],
        )?;
        outcome.matches.reverse();
        Ok(outcome)
    }

    fn query_outcome(
        &self,
        count_sql: &str,
        count_params: impl rusqlite::Params,
        select_sql: &str,
        select_params: impl rusqlite::Params,
    ) -> Result<QueryOutcome, String> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn
            .query_row(count_sql, count_params, |row| row.get(0))
            .map_err(|e| format!("Count query failed: {e}"))?;

        let mut stmt = conn
            .prepare(select_sql)
            .map_err(|e| format!("Query failed: {e}"))?;
        let rows = stmt
            .query_map(select_params, |row| {
                Ok(ArchivedMessage {
                    chat_id: row.get(0)?,
                    source_message_id: row.get(1)?,
                    rebroadcast_message_id: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .map_err(|e| format!("Query failed: {e}"))?;

        let matches = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Row read failed: {e}"))?;

        Ok(QueryOutcome {
            matches,
            total: total as usize,
        })
    }

    // ==================== RECORD METHODS ====================

    /// Persist the mapping from a result-list message to the source ids it
    /// displays, index 0 = first shown item.
    pub fn save_record(
        &self,
        chat_id: i64,
        anchor_message_id: i64,
        ordered_source_ids: &[i64],
    ) -> Result<(), String> {
        let json = serde_json::to_string(ordered_source_ids)
            .map_err(|e| format!("Failed to serialize record: {e}"))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO record (chat_id, anchor_message_id, ordered_source_ids)
             VALUES (?1, ?2, ?3)",
            params![chat_id, anchor_message_id, json],
        )
        .map_err(|e| format!("Failed to save record: {e}"))?;
        Ok(())
    }

    /// Look up a result set by the message that presented it.
    pub fn load_record(&self, chat_id: i64, anchor_message_id: i64) -> Option<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let json: String = conn
            .query_row(
                "SELECT ordered_source_ids FROM record
                 WHERE chat_id = ?1 AND anchor_message_id = ?2",
                params![chat_id, anchor_message_id],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!("Record lookup failed: {e}");
                None
            })?;

        match serde_json::from_str(&json) {
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!("Corrupt record for chat {chat_id} anchor {anchor_message_id}: {e}");
                None
            }
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(db: &Database, source_id: i64, content: &str, created_at: &str) {
        db.archive_repeat(-12345, source_id, Some(source_id + 1000), content, created_at)
            .unwrap();
    }

    #[test]
    fn test_archive_roundtrip_exact_range() {
        let db = Database::new();
        archive(&db, 1, "lol\u{1F602} exact bytes", "2024-03-01 10:00:00");

        let outcome = db
            .query_range(-12345, "2024-03-01 10:00:00", "2024-03-01 10:00:01")
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.matches[0].content, "lol\u{1F602} exact bytes");
        assert_eq!(outcome.matches[0].created_at, "2024-03-01 10:00:00");
        assert_eq!(outcome.matches[0].rebroadcast_message_id, Some(1001));
    }

    #[test]
    fn test_range_end_is_exclusive() {
        let db = Database::new();
        archive(&db, 1, "a", "2024-03-01 10:00:00");
        archive(&db, 2, "b", "2024-03-02 00:00:00");

        let outcome = db
            .query_range(-12345, "2024-03-01 00:00:00", "2024-03-02 00:00:00")
            .unwrap();
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.matches[0].source_message_id, 1);
    }

    #[test]
    fn test_range_is_ordered_and_restartable() {
        let db = Database::new();
        archive(&db, 2, "second", "2024-03-01 11:00:00");
        archive(&db, 1, "first", "2024-03-01 10:00:00");

        for _ in 0..2 {
            let outcome = db
                .query_range(-12345, "2024-03-01 00:00:00", "2024-03-02 00:00:00")
                .unwrap();
            let ids: Vec<i64> = outcome.matches.iter().map(|m| m.source_message_id).collect();
            assert_eq!(ids, vec![1, 2]);
        }
    }

    #[test]
    fn test_append_is_idempotent_per_source() {
        let db = Database::new();
        archive(&db, 1, "lol", "2024-03-01 10:00:00");
        // Redelivery of the same triggering occurrence.
        db.archive_repeat(-12345, 1, None, "lol", "2024-03-01 10:00:05")
            .unwrap();

        let outcome = db
            .query_range(-12345, "2024-03-01 00:00:00", "2024-03-02 00:00:00")
            .unwrap();
        assert_eq!(outcome.total, 1);
        // The first write wins.
        assert_eq!(outcome.matches[0].created_at, "2024-03-01 10:00:00");
    }

    #[test]
    fn test_text_query_is_substring_containment() {
        let db = Database::new();
        archive(&db, 1, "hello world", "2024-03-01 10:00:00");
        archive(&db, 2, "worldwide", "2024-03-01 11:00:00");
        archive(&db, 3, "nothing here", "2024-03-01 12:00:00");

        let outcome = db.query_text(-12345, "world").unwrap();
        assert_eq!(outcome.total, 2);
        let ids: Vec<i64> = outcome.matches.iter().map(|m| m.source_message_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_text_query_rejects_blank_needle() {
        let db = Database::new();
        archive(&db, 1, "anything", "2024-03-01 10:00:00");
        assert!(db.query_text(-12345, "").is_err());
        assert!(db.query_text(-12345, "   ").is_err());
    }

    #[test]
    fn test_text_query_is_case_sensitive() {
        let db = Database::new();
        archive(&db, 1, "Hello", "2024-03-01 10:00:00");
        assert_eq!(db.query_text(-12345, "hello").unwrap().total, 0);
        assert_eq!(db.query_text(-12345, "Hello").unwrap().total, 1);
    }

    #[test]
    fn test_display_cap_reports_full_total() {
        let db = Database::new();
        for i in 0..25 {
            archive(&db, i, "lol", &format!("2024-03-01 10:00:{:02}", i));
        }

        let outcome = db.query_text(-12345, "lol").unwrap();
        assert_eq!(outcome.matches.len(), DISPLAY_LIMIT);
        assert_eq!(outcome.total, 25);
        // Capped prefix is the oldest part of the match set.
        assert_eq!(outcome.matches[0].source_message_id, 0);
    }

    #[test]
    fn test_latest_returns_newest_capped_oldest_first() {
        let db = Database::new();
        for i in 0..25 {
            archive(&db, i, "x", &format!("2024-03-01 10:00:{:02}", i));
        }

        let outcome = db.query_latest(-12345).unwrap();
        assert_eq!(outcome.matches.len(), DISPLAY_LIMIT);
        assert_eq!(outcome.total, 25);
        // Newest 20, shown chronologically.
        assert_eq!(outcome.matches[0].source_message_id, 5);
        assert_eq!(outcome.matches[19].source_message_id, 24);
    }

    #[test]
    fn test_queries_are_scoped_per_chat() {
        let db = Database::new();
        archive(&db, 1, "lol", "2024-03-01 10:00:00");
        db.archive_repeat(-999, 2, None, "lol", "2024-03-01 10:00:00")
            .unwrap();

        assert_eq!(db.query_text(-12345, "lol").unwrap().total, 1);
        assert_eq!(db.query_text(-999, "lol").unwrap().total, 1);
    }

    #[test]
    fn test_record_roundtrip() {
        let db = Database::new();
        db.save_record(-12345, 777, &[10, 20, 30]).unwrap();
        assert_eq!(db.load_record(-12345, 777), Some(vec![10, 20, 30]));
    }

    #[test]
    fn test_record_missing_or_wrong_chat() {
        let db = Database::new();
        db.save_record(-12345, 777, &[10]).unwrap();
        assert_eq!(db.load_record(-12345, 778), None);
        assert_eq!(db.load_record(-999, 777), None);
    }

    #[test]
    fn test_settings_upsert_never_duplicates() {
        let db = Database::new();
        let mut settings = ChatSettings::with_defaults(-1);
        db.upsert_settings(&settings).unwrap();
        settings.threshold = 7;
        db.upsert_settings(&settings).unwrap();

        let all = db.load_all_settings();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].threshold, 7);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repeatrix.db");
        {
            let db = Database::load_or_new(&path);
            archive(&db, 1, "lol", "2024-03-01 10:00:00");
        }
        let db = Database::load_or_new(&path);
        assert_eq!(db.query_text(-12345, "lol").unwrap().total, 1);
    }
}
