//! Repeat trigger engine and command execution.
//!
//! `RepeatEngine` is the one service object holding everything the core
//! needs: the settings cache, the ephemeral counter, the durable store, the
//! transport handle and the process-lifetime status fields. One instance is
//! built at startup and shared by every handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{Duration as TimeDelta, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::{info, warn};

use crate::repeater::commands::Command;
use crate::repeater::content;
use crate::repeater::counter::CounterStore;
use crate::repeater::database::{Database, QueryOutcome, TIMESTAMP_FORMAT};
use crate::repeater::message::IncomingMessage;
use crate::repeater::records::{self, ResolveOutcome};
use crate::repeater::settings::{ChatSettings, SettingsCache, SettingsUpdate};
use crate::repeater::telegram::Transport;

/// What a follow-up command does with the resolved message.
enum FollowUpAction {
    /// Reply to the original so the client surfaces a jump link.
    Anchor,
    /// Forward the original into the chat again.
    Forward,
}

/// The repeat engine.
pub struct RepeatEngine {
    settings: SettingsCache,
    counter: Box<dyn CounterStore>,
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    bot_user_id: i64,
    started_at: Instant,
    messages_seen: AtomicU64,
}

impl RepeatEngine {
    pub fn new(
        db: Arc<Database>,
        counter: Box<dyn CounterStore>,
        transport: Arc<dyn Transport>,
        bot_user_id: i64,
    ) -> Self {
        Self {
            settings: SettingsCache::load(db.clone()),
            counter,
            db,
            transport,
            bot_user_id,
            started_at: Instant::now(),
            messages_seen: AtomicU64::new(0),
        }
    }

    /// Handle one ordinary (non-command) message.
    pub async fn handle_message(&self, msg: &IncomingMessage) {
        if msg.sender_id == self.bot_user_id {
            // Our own re-broadcasts and lists come back through the
            // transport; counting them would self-trigger.
            return;
        }
        self.messages_seen.fetch_add(1, Ordering::Relaxed);

        let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());

        let Some(content) = content::derive_content(msg) else {
            return;
        };
        if content.starts_with('/') {
            // Command traffic is routed elsewhere; never counted.
            return;
        }

        let fingerprint = content::fingerprint(&content);
        let count = match self.counter.bump(msg.chat_id, &fingerprint, &content) {
            Ok(count) => count,
            Err(e) => {
                // A failed bump must not look like count=1: no trigger, no
                // refresh, this chat just misses a repeat during the outage.
                warn!("Counter bump failed for chat {}: {e}", msg.chat_id);
                return;
            }
        };

        // Strict equality: at most one trigger per counter lifetime, even
        // when two threshold hits race past each other.
        if count == u32::from(settings.threshold) {
            self.trigger(msg, &fingerprint, &content).await;
        }

        self.counter.refresh_ttl(
            msg.chat_id,
            &fingerprint,
            Duration::from_secs(u64::from(settings.timeout_seconds)),
        );
    }

    /// Re-broadcast the repeated message and archive the event.
    async fn trigger(&self, msg: &IncomingMessage, fingerprint: &str, content: &str) {
        info!(
            "Repeat threshold hit in chat {} (msg {})",
            msg.chat_id, msg.message_id
        );

        // Archive the form the streak started with, not the one that
        // happened to land on the threshold.
        let original = self
            .counter
            .first_text(msg.chat_id, fingerprint)
            .unwrap_or_else(|| content.to_string());

        let rebroadcast_id = match self.transport.rebroadcast(msg.chat_id, msg.message_id).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Rebroadcast failed in chat {}: {e}", msg.chat_id);
                None
            }
        };

        let created_at = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        if let Err(e) = self.db.archive_repeat(
            msg.chat_id,
            msg.message_id,
            rebroadcast_id,
            &original,
            &created_at,
        ) {
            warn!("Failed to archive repeat in chat {}: {e}", msg.chat_id);
        }
    }

    /// Execute a parsed command.
    pub async fn handle_command(&self, msg: &IncomingMessage, command: Command) {
        self.messages_seen.fetch_add(1, Ordering::Relaxed);

        match command {
            Command::Status => self.report_status(msg).await,
            Command::SetTimeout(seconds) => {
                self.update_settings(
                    msg,
                    SettingsUpdate {
                        timeout_seconds: Some(seconds),
                        ..Default::default()
                    },
                )
                .await
            }
            Command::SetThreshold(threshold) => {
                self.update_settings(
                    msg,
                    SettingsUpdate {
                        threshold: Some(threshold),
                        ..Default::default()
                    },
                )
                .await
            }
            Command::SetTimezone(offset) => {
                self.update_settings(
                    msg,
                    SettingsUpdate {
                        timezone_offset: Some(offset),
                        ..Default::default()
                    },
                )
                .await
            }
            Command::Today => {
                let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());
                let today = (Utc::now().naive_utc()
                    + TimeDelta::hours(i64::from(settings.timezone_offset)))
                .date();
                let outcome = self.run_range_query(&settings, today, today);
                self.present(msg.chat_id, &settings, outcome).await;
            }
            Command::Day(date) => {
                let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());
                let outcome = self.run_range_query(&settings, date, date);
                self.present(msg.chat_id, &settings, outcome).await;
            }
            Command::Interval(start, end) => {
                let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());
                let outcome = self.run_range_query(&settings, start, end);
                self.present(msg.chat_id, &settings, outcome).await;
            }
            Command::Recent => {
                let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());
                let outcome = self.db.query_latest(msg.chat_id);
                self.present(msg.chat_id, &settings, outcome).await;
            }
            Command::Search(needle) => {
                let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());
                let outcome = self.db.query_text(msg.chat_id, &needle);
                self.present(msg.chat_id, &settings, outcome).await;
            }
            Command::Anchor(index) => self.follow_up(msg, index, FollowUpAction::Anchor).await,
            Command::Forward(index) => self.follow_up(msg, index, FollowUpAction::Forward).await,
        }
    }

    /// Send a user-facing notice as a reply to the given message.
    pub async fn notify(&self, msg: &IncomingMessage, text: &str) {
        if let Err(e) = self
            .transport
            .send_message(msg.chat_id, text, Some(msg.message_id))
            .await
        {
            warn!("Failed to notify chat {}: {e}", msg.chat_id);
        }
    }

    async fn report_status(&self, msg: &IncomingMessage) {
        let settings = self.settings.ensure(msg.chat_id, SettingsUpdate::default());
        let report = format!(
            "Live repeat counters here: {}\n\
             Threshold: {}\n\
             Window: {}s\n\
             Timezone: UTC{:+}\n\n\
             Up {}. Seen {} message(s) across {} group chat(s).",
            self.counter.count_distinct(msg.chat_id),
            settings.threshold,
            settings.timeout_seconds,
            settings.timezone_offset,
            format_uptime(self.started_at.elapsed()),
            self.messages_seen.load(Ordering::Relaxed),
            self.settings.group_count(),
        );
        self.notify(msg, &report).await;
    }

    async fn update_settings(&self, msg: &IncomingMessage, update: SettingsUpdate) {
        let settings = self.settings.ensure(msg.chat_id, update);
        let confirmation = format!(
            "Saved. Threshold: {}; window: {}s; timezone: UTC{:+}.",
            settings.threshold, settings.timeout_seconds, settings.timezone_offset
        );
        self.notify(msg, &confirmation).await;
    }

    /// Query the archive for the local dates `start..=end`.
    fn run_range_query(
        &self,
        settings: &ChatSettings,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<QueryOutcome, String> {
        let offset = TimeDelta::hours(i64::from(settings.timezone_offset));
        let start_utc = start.and_time(NaiveTime::MIN) - offset;
        let end_utc = end
            .succ_opt()
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN)
            - offset;
        self.db.query_range(
            settings.chat_id,
            &format_stamp(start_utc),
            &format_stamp(end_utc),
        )
    }

    /// Send the result list and persist its result set, or the
    /// nothing-found notice when the query matched nothing.
    async fn present(
        &self,
        chat_id: i64,
        settings: &ChatSettings,
        outcome: Result<QueryOutcome, String>,
    ) {
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Archive query failed for chat {chat_id}: {e}");
                return;
            }
        };

        if outcome.matches.is_empty() {
            if let Err(e) = self
                .transport
                .send_message(chat_id, "Nothing found.", None)
                .await
            {
                warn!("Failed to send empty-result notice to chat {chat_id}: {e}");
            }
            return;
        }

        let body = records::render_result_list(
            &outcome.matches,
            outcome.total,
            settings.timezone_offset,
        );
        let anchor_id = match self.transport.send_message(chat_id, &body, None).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to send result list to chat {chat_id}: {e}");
                return;
            }
        };

        let ids: Vec<i64> = outcome
            .matches
            .iter()
            .map(|m| m.source_message_id)
            .collect();
        if let Err(e) = self.db.save_record(chat_id, anchor_id, &ids) {
            warn!("Failed to record result set for chat {chat_id}: {e}");
        }
    }

    /// The list-then-resolve follow-up: the command must reply to one of
    /// our result-list messages, then the index resolves or doesn't.
    async fn follow_up(&self, msg: &IncomingMessage, index: usize, action: FollowUpAction) {
        let Some(ref reply) = msg.reply_to else {
            self.notify(msg, "Reply to one of my result lists with that command.")
                .await;
            return;
        };
        if reply.sender_id != self.bot_user_id {
            self.notify(msg, "Reply to one of my result lists with that command.")
                .await;
            return;
        }

        match records::resolve(&self.db, msg.chat_id, reply.message_id, index) {
            ResolveOutcome::Resolved(source_id) => match action {
                FollowUpAction::Anchor => {
                    if let Err(e) = self
                        .transport
                        .send_message(msg.chat_id, "⚓", Some(source_id))
                        .await
                    {
                        warn!("Failed to anchor message {source_id}: {e}");
                    }
                }
                FollowUpAction::Forward => {
                    if let Err(e) = self.transport.rebroadcast(msg.chat_id, source_id).await {
                        warn!("Failed to forward message {source_id}: {e}");
                    }
                }
            },
            ResolveOutcome::NotFound => {
                self.notify(msg, "That message isn't one of my result lists.")
                    .await;
            }
            ResolveOutcome::IndexOutOfRange => {
                self.notify(msg, "That list has no item with that number.")
                    .await;
            }
        }
    }
}

fn format_stamp(datetime: NaiveDateTime) -> String {
    datetime.format(TIMESTAMP_FORMAT).to_string()
}

/// Uptime as a compact days/hours/minutes string.
fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d "));
    }
    if days > 0 || hours > 0 {
        out.push_str(&format!("{hours}h "));
    }
    out.push_str(&format!("{minutes}m"));
    out
}
