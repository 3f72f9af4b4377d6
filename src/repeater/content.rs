//! Canonical content derivation and fingerprinting.
//!
//! Two messages count as "the same" when their canonical content strings are
//! equal: trimmed text for text messages, a descriptor built from stable file
//! ids for attachments. The counter is keyed by a SHA-256 of that string so
//! keys stay bounded regardless of message length.

use sha2::{Digest, Sha256};

use crate::repeater::message::{Attachment, IncomingMessage};

/// Derive the comparable content of a message.
///
/// Returns `None` when there is nothing to compare: no text (or only
/// whitespace) and no recognized attachment. Such messages are ignored by
/// the trigger engine entirely.
pub fn derive_content(msg: &IncomingMessage) -> Option<String> {
    if let Some(ref text) = msg.text {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    msg.attachment.as_ref().map(describe_attachment)
}

/// Build the canonical descriptor for an attachment.
fn describe_attachment(attachment: &Attachment) -> String {
    match attachment {
        Attachment::Sticker {
            file_unique_id,
            set_name,
        } => format!(
            "sticker:{}:{}",
            set_name.as_deref().unwrap_or(""),
            file_unique_id
        ),
        Attachment::Photo {
            file_unique_ids,
            caption,
        } => with_caption(format!("photo:{}", file_unique_ids.join(",")), caption),
        Attachment::Document {
            file_unique_id,
            file_name,
            caption,
        } => with_caption(
            format!(
                "document:{}:{}",
                file_unique_id,
                file_name.as_deref().unwrap_or("")
            ),
            caption,
        ),
    }
}

fn with_caption(descriptor: String, caption: &Option<String>) -> String {
    match caption.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => format!("{descriptor}|{c}"),
        _ => descriptor,
    }
}

/// SHA-256 of the canonical content, as lowercase hex.
pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
