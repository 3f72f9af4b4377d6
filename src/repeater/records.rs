//! Result-list rendering and follow-up resolution.
//!
//! A query command produces one outgoing list message; the mapping from that
//! message to the archived sources it displays is persisted so a later reply
//! ("/anchor 2") can be resolved back to a concrete message id.

use chrono::{Duration, NaiveDateTime};

use crate::repeater::database::{ArchivedMessage, Database, TIMESTAMP_FORMAT};

/// Characters of content shown per list entry before truncation.
const PREVIEW_CHARS: usize = 64;

/// Outcome of resolving an index against a persisted result set. Terminal
/// either way; the user re-issues the query to get a fresh anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The source message id at the requested position.
    Resolved(i64),
    /// No result set is recorded for this (chat, message) pair.
    NotFound,
    /// The set exists but has no item at the requested index.
    IndexOutOfRange,
}

/// Render the numbered list for a non-empty match set.
///
/// Timestamps are shifted into the chat's configured timezone; previews are
/// flattened to one line and truncated with a continuation marker. Matches
/// past the display cap are summarized in a trailer but not listed.
pub fn render_result_list(
    matches: &[ArchivedMessage],
    total: usize,
    timezone_offset: i8,
) -> String {
    let mut lines: Vec<String> = matches
        .iter()
        .enumerate()
        .map(|(i, m)| {
            format!(
                "{}. [{}] {}",
                i + 1,
                local_stamp(&m.created_at, timezone_offset),
                preview(&m.content)
            )
        })
        .collect();

    if total > matches.len() {
        lines.push(format!("… and {} more", total - matches.len()));
    }

    lines.join("\n")
}

/// Resolve `index` (0-based) within the result set anchored at
/// `anchor_message_id`.
pub fn resolve(
    db: &Database,
    chat_id: i64,
    anchor_message_id: i64,
    index: usize,
) -> ResolveOutcome {
    match db.load_record(chat_id, anchor_message_id) {
        None => ResolveOutcome::NotFound,
        Some(ids) => match ids.get(index) {
            Some(&source_id) => ResolveOutcome::Resolved(source_id),
            None => ResolveOutcome::IndexOutOfRange,
        },
    }
}

/// Shift a stored UTC stamp into the chat's timezone for display.
fn local_stamp(created_at: &str, timezone_offset: i8) -> String {
    match NaiveDateTime::parse_from_str(created_at, TIMESTAMP_FORMAT) {
        Ok(utc) => (utc + Duration::hours(timezone_offset as i64))
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        // A stamp we wrote ourselves should always parse; show it raw if not.
        Err(_) => created_at.to_string(),
    }
}

fn preview(content: &str) -> String {
    let flat: String = content
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    if flat.chars().count() > PREVIEW_CHARS {
        let truncated: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{truncated}…")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archived(source_id: i64, content: &str, created_at: &str) -> ArchivedMessage {
        ArchivedMessage {
            chat_id: -12345,
            source_message_id: source_id,
            rebroadcast_message_id: None,
            content: content.to_string(),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn test_list_is_one_based_with_local_stamps() {
        let matches = vec![
            archived(10, "lol", "2024-03-01 22:30:00"),
            archived(20, "again", "2024-03-01 23:00:00"),
        ];
        let rendered = render_result_list(&matches, 2, 3);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "1. [2024-03-02 01:30] lol");
        assert_eq!(lines[1], "2. [2024-03-02 02:00] again");
    }

    #[test]
    fn test_negative_offset_shifts_back() {
        let matches = vec![archived(10, "lol", "2024-03-01 02:00:00")];
        let rendered = render_result_list(&matches, 1, -5);
        assert!(rendered.contains("[2024-02-29 21:00]"));
    }

    #[test]
    fn test_long_content_truncated_with_marker() {
        let matches = vec![archived(10, &"x".repeat(100), "2024-03-01 10:00:00")];
        let rendered = render_result_list(&matches, 1, 0);
        assert!(rendered.ends_with('…'));
        assert_eq!(rendered.matches('x').count(), 64);
    }

    #[test]
    fn test_newlines_flattened_in_preview() {
        let matches = vec![archived(10, "line1\nline2", "2024-03-01 10:00:00")];
        let rendered = render_result_list(&matches, 1, 0);
        assert!(rendered.contains("line1 line2"));
    }

    #[test]
    fn test_overflow_trailer() {
        let matches: Vec<_> = (0..20)
            .map(|i| archived(i, "x", "2024-03-01 10:00:00"))
            .collect();
        let rendered = render_result_list(&matches, 25, 0);
        assert!(rendered.ends_with("… and 5 more"));
    }

    #[test]
    fn test_resolve_every_index_roundtrips() {
        let db = Database::new();
        let ids = vec![10, 20, 30];
        db.save_record(-12345, 777, &ids).unwrap();

        for (i, &expected) in ids.iter().enumerate() {
            assert_eq!(
                resolve(&db, -12345, 777, i),
                ResolveOutcome::Resolved(expected)
            );
        }
        assert_eq!(
            resolve(&db, -12345, 777, ids.len()),
            ResolveOutcome::IndexOutOfRange
        );
    }

    #[test]
    fn test_resolve_unknown_anchor() {
        let db = Database::new();
        assert_eq!(resolve(&db, -12345, 777, 0), ResolveOutcome::NotFound);
    }

    #[test]
    fn test_resolve_is_chat_scoped() {
        let db = Database::new();
        db.save_record(-12345, 777, &[10]).unwrap();
        assert_eq!(resolve(&db, -999, 777, 0), ResolveOutcome::NotFound);
    }
}
