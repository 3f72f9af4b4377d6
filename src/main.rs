mod config;
mod repeater;
mod telegram_log;

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use repeater::{
    Attachment, Database, IncomingMessage, MemoryCounter, ParseOutcome, RepeatEngine, ReplyRef,
    TelegramClient, parse,
};

struct BotState {
    engine: RepeatEngine,
    bot_username: Option<String>,
}

impl BotState {
    async fn new(config: &Config, bot: &Bot) -> Self {
        // Get bot info; without it we can't recognize our own messages
        // or commands addressed to us by name.
        let (bot_user_id, bot_username) = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                (me.id.0 as i64, Some(me.username().to_string()))
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                (0, None)
            }
        };

        let db = Arc::new(Database::load_or_new(&config.data_dir.join("repeatrix.db")));
        let telegram = Arc::new(TelegramClient::new(bot.clone()));
        let engine = RepeatEngine::new(db, Box::new(MemoryCounter::new()), telegram, bot_user_id);

        Self {
            engine,
            bot_username,
        }
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "repeatrix.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("repeatrix.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting repeatrix...");
    info!("Loaded config from {config_path}");

    let state = Arc::new(BotState::new(&config, &bot).await);

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let incoming = to_incoming(&msg);

    match incoming.text.as_deref() {
        Some(text) => match parse(text, state.bot_username.as_deref()) {
            ParseOutcome::Command(command) => {
                info!(
                    "Command from {} in chat {}: {:?}",
                    incoming.sender_name, incoming.chat_id, command
                );
                state.engine.handle_command(&incoming, command).await;
            }
            ParseOutcome::Rejected(notice) => {
                state.engine.notify(&incoming, &notice).await;
            }
            ParseOutcome::ForeignBot => {}
            ParseOutcome::NotACommand => {
                state.engine.handle_message(&incoming).await;
            }
        },
        None => state.engine.handle_message(&incoming).await,
    }

    Ok(())
}

/// Reduce a Telegram update to the core's inbound event.
fn to_incoming(msg: &Message) -> IncomingMessage {
    let user = msg.from.as_ref();
    let sender_id = user.map(|u| u.id.0 as i64).unwrap_or(0);
    let sender_name = user
        .and_then(|u| u.username.as_deref())
        .unwrap_or_else(|| user.map(|u| u.first_name.as_str()).unwrap_or("unknown"))
        .to_string();

    let attachment = if let Some(sticker) = msg.sticker() {
        Some(Attachment::Sticker {
            file_unique_id: sticker.file.unique_id.0.clone(),
            set_name: sticker.set_name.clone(),
        })
    } else if let Some(photo) = msg.photo() {
        Some(Attachment::Photo {
            file_unique_ids: photo.iter().map(|p| p.file.unique_id.0.clone()).collect(),
            caption: msg.caption().map(str::to_string),
        })
    } else {
        msg.document().map(|document| Attachment::Document {
            file_unique_id: document.file.unique_id.0.clone(),
            file_name: document.file_name.clone(),
            caption: msg.caption().map(str::to_string),
        })
    };

    let reply_to = msg.reply_to_message().map(|reply| ReplyRef {
        message_id: reply.id.0 as i64,
        sender_id: reply.from.as_ref().map(|u| u.id.0 as i64).unwrap_or(0),
    });

    IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0 as i64,
        sender_id,
        sender_name,
        text: msg.text().map(str::to_string),
        attachment,
        reply_to,
    }
}
