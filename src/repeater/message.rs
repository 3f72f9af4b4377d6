//! Inbound message model shared by the trigger engine and command layer.

/// The message an incoming one replies to, if any.
#[derive(Debug, Clone)]
pub struct ReplyRef {
    pub message_id: i64,
    pub sender_id: i64,
}

/// Non-text payload of a message, reduced to the fields that survive a
/// re-send. Telegram assigns a fresh `file_id` per upload but keeps
/// `file_unique_id` stable, so descriptors built from unique ids hash
/// identically across senders.
#[derive(Debug, Clone)]
pub enum Attachment {
    Sticker {
        file_unique_id: String,
        set_name: Option<String>,
    },
    Photo {
        /// Unique ids of the resolution variants, smallest first.
        file_unique_ids: Vec<String>,
        caption: Option<String>,
    },
    Document {
        file_unique_id: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
}

/// A message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Chat the message was sent in (negative = group, positive = DM).
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<ReplyRef>,
}
