//! Text command grammar and validation.
//!
//! Parsing validates every argument against its bounds before anything
//! touches state; a violation becomes a user-facing rejection and nothing
//! else happens. Commands suffixed with another bot's name are dropped
//! silently so two bots sharing a group don't answer each other's traffic.

use chrono::NaiveDate;

use crate::repeater::settings::{
    MAX_THRESHOLD, MAX_TIMEOUT_SECONDS, MAX_TIMEZONE_OFFSET, MIN_THRESHOLD, MIN_TIMEOUT_SECONDS,
    MIN_TIMEZONE_OFFSET,
};

/// A validated command, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    SetTimeout(u16),
    SetThreshold(u16),
    SetTimezone(i8),
    Today,
    Recent,
    Day(NaiveDate),
    Interval(NaiveDate, NaiveDate),
    Search(String),
    /// 0-based index into the replied-to result list.
    Anchor(usize),
    /// 0-based index into the replied-to result list.
    Forward(usize),
}

/// What a piece of text turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Command(Command),
    /// A command of ours with a bad argument; the payload is the notice to
    /// send back. No state changes.
    Rejected(String),
    /// Addressed to a different bot; ignore silently.
    ForeignBot,
    /// Not a command (or not one of ours); counts as ordinary content
    /// unless the `/` prefix exempts it.
    NotACommand,
}

/// Parse one message text. `bot_username` is our own handle (without `@`),
/// used to match explicit `/command@bot` addressing.
pub fn parse(text: &str, bot_username: Option<&str>) -> ParseOutcome {
    let text = text.trim();
    if !text.starts_with('/') {
        return ParseOutcome::NotACommand;
    }

    let mut words = text.split_whitespace();
    let head = words.next().unwrap_or_default();
    let (name, suffix) = match head[1..].split_once('@') {
        Some((name, suffix)) => (name, Some(suffix)),
        None => (&head[1..], None),
    };

    if let Some(suffix) = suffix {
        let ours = bot_username.is_some_and(|own| suffix.eq_ignore_ascii_case(own));
        if !ours {
            return ParseOutcome::ForeignBot;
        }
    }

    let args: Vec<&str> = words.collect();

    match name {
        "status" => ParseOutcome::Command(Command::Status),
        "timeout" => parse_bounded(
            args.first().copied(),
            i64::from(MIN_TIMEOUT_SECONDS)..=i64::from(MAX_TIMEOUT_SECONDS),
            &format!(
                "Give me a window between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS} seconds, e.g. /timeout 60."
            ),
            |v| Command::SetTimeout(v as u16),
        ),
        "threshold" => parse_bounded(
            args.first().copied(),
            i64::from(MIN_THRESHOLD)..=i64::from(MAX_THRESHOLD),
            &format!(
                "Give me a threshold between {MIN_THRESHOLD} and {MAX_THRESHOLD}, e.g. /threshold 3."
            ),
            |v| Command::SetThreshold(v as u16),
        ),
        "timezone" => parse_bounded(
            args.first().copied(),
            i64::from(MIN_TIMEZONE_OFFSET)..=i64::from(MAX_TIMEZONE_OFFSET),
            &format!(
                "Give me a UTC offset between {MIN_TIMEZONE_OFFSET} and {MAX_TIMEZONE_OFFSET}, e.g. /timezone 2."
            ),
            |v| Command::SetTimezone(v as i8),
        ),
        "today" => ParseOutcome::Command(Command::Today),
        "recent" => ParseOutcome::Command(Command::Recent),
        "day" => match args.first().map(|a| parse_date(a)) {
            Some(Ok(date)) => ParseOutcome::Command(Command::Day(date)),
            _ => ParseOutcome::Rejected("Give me a date like /day 2024-01-31.".to_string()),
        },
        "interval" => match (args.first(), args.get(1)) {
            (Some(a), Some(b)) => match (parse_date(a), parse_date(b)) {
                (Ok(start), Ok(end)) if start <= end => {
                    ParseOutcome::Command(Command::Interval(start, end))
                }
                (Ok(_), Ok(_)) => {
                    ParseOutcome::Rejected("The interval start is after its end.".to_string())
                }
                _ => interval_usage(),
            },
            _ => interval_usage(),
        },
        "search" => {
            let needle = text[head.len()..].trim();
            if needle.is_empty() {
                ParseOutcome::Rejected("Give me some text to search for, e.g. /search lol.".to_string())
            } else {
                ParseOutcome::Command(Command::Search(needle.to_string()))
            }
        }
        "anchor" => parse_index(args.first().copied(), "anchor", Command::Anchor),
        "forward" => parse_index(args.first().copied(), "forward", Command::Forward),
        _ => ParseOutcome::NotACommand,
    }
}

fn parse_bounded(
    arg: Option<&str>,
    bounds: std::ops::RangeInclusive<i64>,
    notice: &str,
    build: impl FnOnce(i64) -> Command,
) -> ParseOutcome {
    match arg.and_then(|a| a.parse::<i64>().ok()) {
        Some(value) if bounds.contains(&value) => ParseOutcome::Command(build(value)),
        _ => ParseOutcome::Rejected(notice.to_string()),
    }
}

/// List items are displayed from 1; store the 0-based position.
fn parse_index(arg: Option<&str>, verb: &str, build: impl FnOnce(usize) -> Command) -> ParseOutcome {
    match arg.and_then(|a| a.parse::<usize>().ok()) {
        Some(n) if n >= 1 => ParseOutcome::Command(build(n - 1)),
        _ => ParseOutcome::Rejected(format!(
            "Reply to one of my result lists with the item number, e.g. /{verb} 2."
        )),
    }
}

fn parse_date(arg: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(arg, "%Y-%m-%d")
}

fn interval_usage() -> ParseOutcome {
    ParseOutcome::Rejected("Give me two dates like /interval 2024-01-01 2024-01-31.".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(text: &str) -> ParseOutcome {
        parse(text, Some("repeatrix_bot"))
    }

    fn assert_rejected(outcome: ParseOutcome) -> String {
        match outcome {
            ParseOutcome::Rejected(notice) => notice,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(cmd("lol"), ParseOutcome::NotACommand);
    }

    #[test]
    fn test_unknown_command_falls_through() {
        assert_eq!(cmd("/frobnicate"), ParseOutcome::NotACommand);
    }

    #[test]
    fn test_status() {
        assert_eq!(cmd("/status"), ParseOutcome::Command(Command::Status));
    }

    #[test]
    fn test_own_bot_suffix_accepted() {
        assert_eq!(
            cmd("/status@Repeatrix_Bot"),
            ParseOutcome::Command(Command::Status)
        );
    }

    #[test]
    fn test_foreign_bot_suffix_ignored() {
        assert_eq!(cmd("/status@other_bot"), ParseOutcome::ForeignBot);
    }

    #[test]
    fn test_suffix_without_known_identity_ignored() {
        assert_eq!(
            parse("/status@repeatrix_bot", None),
            ParseOutcome::ForeignBot
        );
    }

    #[test]
    fn test_timeout_bounds() {
        assert_eq!(
            cmd("/timeout 60"),
            ParseOutcome::Command(Command::SetTimeout(60))
        );
        assert_eq!(
            cmd("/timeout 10"),
            ParseOutcome::Command(Command::SetTimeout(10))
        );
        assert_eq!(
            cmd("/timeout 32767"),
            ParseOutcome::Command(Command::SetTimeout(32767))
        );
        assert!(assert_rejected(cmd("/timeout 9")).contains("10"));
        assert!(assert_rejected(cmd("/timeout 32768")).contains("32767"));
        assert_rejected(cmd("/timeout"));
        assert_rejected(cmd("/timeout soon"));
    }

    #[test]
    fn test_threshold_bounds() {
        assert_eq!(
            cmd("/threshold 5"),
            ParseOutcome::Command(Command::SetThreshold(5))
        );
        // 2 is below the floor: stays rejected even though it parses.
        assert!(assert_rejected(cmd("/threshold 2")).contains("3"));
        assert_rejected(cmd("/threshold -1"));
    }

    #[test]
    fn test_timezone_bounds() {
        assert_eq!(
            cmd("/timezone -12"),
            ParseOutcome::Command(Command::SetTimezone(-12))
        );
        assert_eq!(
            cmd("/timezone 12"),
            ParseOutcome::Command(Command::SetTimezone(12))
        );
        assert_rejected(cmd("/timezone 13"));
        assert_rejected(cmd("/timezone -13"));
    }

    #[test]
    fn test_day_parses_iso_date() {
        assert_eq!(
            cmd("/day 2024-01-31"),
            ParseOutcome::Command(Command::Day(
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
            ))
        );
        assert_rejected(cmd("/day yesterday"));
        assert_rejected(cmd("/day"));
    }

    #[test]
    fn test_interval_needs_ordered_dates() {
        let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            cmd("/interval 2024-01-01 2024-01-31"),
            ParseOutcome::Command(Command::Interval(jan1, jan31))
        );
        assert!(assert_rejected(cmd("/interval 2024-01-31 2024-01-01")).contains("after"));
        assert_rejected(cmd("/interval 2024-01-01"));
    }

    #[test]
    fn test_search_takes_rest_of_line() {
        assert_eq!(
            cmd("/search hello world"),
            ParseOutcome::Command(Command::Search("hello world".to_string()))
        );
    }

    #[test]
    fn test_search_rejects_blank() {
        assert_rejected(cmd("/search"));
        assert_rejected(cmd("/search   "));
    }

    #[test]
    fn test_anchor_and_forward_are_one_based() {
        assert_eq!(cmd("/anchor 1"), ParseOutcome::Command(Command::Anchor(0)));
        assert_eq!(cmd("/forward 3"), ParseOutcome::Command(Command::Forward(2)));
        assert_rejected(cmd("/anchor 0"));
        assert_rejected(cmd("/forward"));
        assert_rejected(cmd("/anchor second"));
    }
}
