//! Transport seam and the teloxide-backed client.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ReplyParameters};
use tracing::warn;

/// Outbound side of the chat transport. The engine only ever needs these
/// two actions, so tests can substitute a recording double.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message, returning the outgoing message's id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, String>;

    /// Re-broadcast an existing message back into its chat, returning the
    /// id the re-broadcast was assigned.
    async fn rebroadcast(&self, chat_id: i64, message_id: i64) -> Result<i64, String>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, String> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);

        if let Some(msg_id) = reply_to_message_id {
            let reply_params = ReplyParameters::new(MessageId(msg_id as i32));
            request = request.reply_parameters(reply_params);
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn rebroadcast(&self, chat_id: i64, message_id: i64) -> Result<i64, String> {
        let chat_id = ChatId(chat_id);
        self.bot
            .forward_message(chat_id, chat_id, MessageId(message_id as i32))
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to forward: {e}");
                warn!("{}", msg);
                msg
            })
    }
}
