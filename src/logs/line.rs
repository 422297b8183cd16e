//! Director log line parsing and formatting.
//!
//! Director processes log in the shape
//!
//! ```text
//! [director] 2024-05-01T12:00:00.123456789Z INFO - Listening on :25555
//! ```
//!
//! Anything else (kernel messages, init output, stack traces) is kept
//! verbatim and rendered unchanged.

use chrono::{DateTime, FixedOffset};
use owo_colors::OwoColorize;
use regex::Regex;
use std::sync::LazyLock;

static LOG_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\]\s+(\S+)\s+(\S+)\s+-\s+(.*)$").expect("log line pattern is valid")
});

/// A single log line, parsed when it has the director shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Emitting component; empty when unparsed.
    pub component: String,
    /// Parsed timestamp; `None` when unparsed.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Level (`INFO`, `ERROR`, ...); empty when unparsed.
    pub level: String,
    /// Message body; empty when unparsed.
    pub message: String,
    /// The original text.
    pub raw: String,
}

impl LogLine {
    /// Returns true if the line matched the director shape.
    pub fn is_parsed(&self) -> bool {
        self.timestamp.is_some()
    }

    fn unparsed(line: &str) -> Self {
        Self {
            component: String::new(),
            timestamp: None,
            level: String::new(),
            message: String::new(),
            raw: line.to_string(),
        }
    }
}

/// Parses one line. Never fails: unrecognized input comes back with only
/// `raw` populated.
pub fn parse_log_line(line: &str) -> LogLine {
    let Some(caps) = LOG_LINE_RE.captures(line) else {
        return LogLine::unparsed(line);
    };

    // A well-shaped line with a garbage timestamp is not a director line.
    let Ok(timestamp) = DateTime::parse_from_rfc3339(&caps[2]) else {
        return LogLine::unparsed(line);
    };

    LogLine {
        component: caps[1].to_string(),
        timestamp: Some(timestamp),
        level: caps[3].to_string(),
        message: caps[4].to_string(),
        raw: line.to_string(),
    }
}

/// Renders a line as `[component] HH:MM:SS.mmm LEVEL - message`.
///
/// Unparsed lines are returned as-is, colorized or not.
pub fn format_log_line(line: &LogLine, colorize: bool) -> String {
    let Some(timestamp) = line.timestamp else {
        return line.raw.clone();
    };

    let component = format!("[{}]", line.component);
    let time = timestamp.format("%H:%M:%S%.3f").to_string();

    if !colorize {
        return format!("{} {} {} - {}", component, time, line.level, line.message);
    }

    format!(
        "{} {} {} - {}",
        component.cyan(),
        time.bright_black(),
        colorize_level(&line.level),
        line.message
    )
}

fn colorize_level(level: &str) -> String {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => level.red().to_string(),
        "WARN" | "WARNING" => level.yellow().to_string(),
        "INFO" => level.green().to_string(),
        "DEBUG" => level.blue().to_string(),
        _ => level.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_director_line() {
        let line = parse_log_line("[director] 2024-05-01T12:00:00.123456789Z INFO - Listening on :25555");
        assert!(line.is_parsed());
        assert_eq!(line.component, "director");
        assert_eq!(line.level, "INFO");
        assert_eq!(line.message, "Listening on :25555");
    }

    #[test]
    fn test_bad_timestamp_is_unparsed() {
        let raw = "[director] yesterday INFO - hello";
        let line = parse_log_line(raw);
        assert!(!line.is_parsed());
        assert_eq!(line.raw, raw);
        assert!(line.component.is_empty());
    }

    #[test]
    fn test_format_keeps_source_offset() {
        let line = parse_log_line("[nats] 2024-05-01T12:34:56.789+02:00 WARN - slow consumer");
        assert_eq!(
            format_log_line(&line, false),
            "[nats] 12:34:56.789 WARN - slow consumer"
        );
    }

    #[test]
    fn test_colorized_contains_ansi() {
        let line = parse_log_line("[director] 2024-05-01T12:00:00Z ERROR - boom");
        let out = format_log_line(&line, true);
        assert!(out.contains("\u{1b}[31mERROR"));
        assert!(out.contains("\u{1b}[36m[director]"));
        assert!(out.ends_with(" - boom"));
    }
}
