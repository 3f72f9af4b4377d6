//! Tracing layer that mirrors warnings and errors into a Telegram chat.
//!
//! `on_event` must not block, so events go through an unbounded channel to a
//! single sender task.

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                send_log(&bot, chat_id, &text).await;
            }
        });

        Self { tx }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = if text.len() > 4000 {
        let truncated: String = text.chars().take(4000).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    };
    if let Err(e) = bot.send_message(chat_id, &text).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();

        // Only WARN and ERROR are worth a chat message.
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let prefix = if level == Level::ERROR { "❌" } else { "⚠️" };
        if self.tx.send(format!("{prefix} {}", visitor.message)).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
