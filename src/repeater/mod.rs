//! Repeat detection core - counts repeated content and archives triggers.

pub mod commands;
pub mod content;
pub mod counter;
pub mod database;
pub mod engine;
pub mod message;
pub mod records;
pub mod settings;
pub mod telegram;


pub use commands::{Command, ParseOutcome, parse};
pub use counter::{CounterStore, MemoryCounter};
pub use database::Database;
pub use engine::RepeatEngine;
pub use message::{Attachment, IncomingMessage, ReplyRef};
pub use telegram::{TelegramClient, Transport};
