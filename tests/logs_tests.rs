//! Tests for log capture: parsing, formatting, filtering writers and the
//! ring buffer.

use director_box::logs::{
    LogBuffer, LogFormat, LogWriter, TeeWriter, format_log_line, parse_log_line,
};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::thread;

const DIRECTOR_LINE: &str = "[director] 2024-05-01T12:00:00.123456789Z INFO - Listening on :25555";
const NATS_LINE: &str = "[nats] 2024-05-01T12:00:01+02:00 WARN - slow consumer";

// =============================================================================
// Parse / Format Tests
// =============================================================================

#[test]
fn test_format_preserves_component_level_message() {
    for raw in [DIRECTOR_LINE, NATS_LINE] {
        let parsed = parse_log_line(raw);
        let formatted = format_log_line(&parsed, false);
        let reparsed_fields = formatted.split_once(" - ").unwrap();

        assert!(formatted.starts_with(&format!("[{}]", parsed.component)));
        assert!(reparsed_fields.0.ends_with(&parsed.level));
        assert_eq!(reparsed_fields.1, parsed.message);
    }
}

#[test]
fn test_format_shortens_timestamp() {
    let formatted = format_log_line(&parse_log_line(DIRECTOR_LINE), false);
    assert_eq!(formatted, "[director] 12:00:00.123 INFO - Listening on :25555");
}

#[test]
fn test_unshaped_lines_are_identity() {
    for raw in [
        "",
        "plain text",
        "[director] not-a-time INFO - message",
        "[director] 2024-05-01T12:00:00Z INFO no separator",
        "   indented stack frame",
    ] {
        let parsed = parse_log_line(raw);
        assert!(!parsed.is_parsed(), "{:?} should not parse", raw);
        assert_eq!(format_log_line(&parsed, false), raw);
        assert_eq!(format_log_line(&parsed, true), raw);
    }
}

#[test]
fn test_colorized_line_keeps_message() {
    let formatted = format_log_line(&parse_log_line(DIRECTOR_LINE), true);
    assert!(formatted.contains("\u{1b}["), "expected ANSI escapes");
    assert!(formatted.ends_with("Listening on :25555"));
}

// =============================================================================
// LogWriter Tests
// =============================================================================

#[test]
fn test_writer_joins_partial_writes() {
    let mut writer = LogWriter::new(Vec::new());
    let raw = format!("{}\r\nplain\n", DIRECTOR_LINE);
    let (a, b) = raw.split_at(17);
    writer.write_all(a.as_bytes()).unwrap();
    writer.write_all(b.as_bytes()).unwrap();

    let out = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert_eq!(
        out,
        "[director] 12:00:00.123 INFO - Listening on :25555\nplain\n"
    );
}

#[test]
fn test_writer_component_filter_keeps_unparsed_lines() {
    let mut writer = LogWriter::new(Vec::new())
        .with_components(["director"])
        .with_format(LogFormat::MessageOnly);
    writeln!(writer, "{}", DIRECTOR_LINE).unwrap();
    writeln!(writer, "{}", NATS_LINE).unwrap();
    writeln!(writer, "booting").unwrap();

    let out = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert_eq!(out, "Listening on :25555\nbooting\n");
}

#[test]
fn test_writer_message_only_skips_empty_messages() {
    let mut writer = LogWriter::new(Vec::new()).with_format(LogFormat::MessageOnly);
    writeln!(writer, "[director] 2024-05-01T12:00:00Z INFO - ").unwrap();
    writeln!(writer, "[director] 2024-05-01T12:00:00Z INFO - done").unwrap();

    let out = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert_eq!(out, "done\n");
}

#[test]
fn test_writer_finish_emits_trailing_partial() {
    let mut writer = LogWriter::new(Vec::new());
    writer.write_all(b"first\nsecond").unwrap();

    let out = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert_eq!(out, "first\nsecond\n");
}

#[test]
fn test_empty_component_list_disables_filter() {
    let mut writer = LogWriter::new(Vec::new()).with_components(Vec::<String>::new());
    writeln!(writer, "{}", NATS_LINE).unwrap();

    let out = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert!(out.starts_with("[nats]"));
}

// =============================================================================
// LogBuffer Tests
// =============================================================================

#[test]
fn test_buffer_keeps_last_n_in_order() {
    let buffer = LogBuffer::new(3);
    let mut sink = buffer.clone();
    for i in 0..10 {
        writeln!(sink, "line {}", i).unwrap();
    }

    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.capacity(), 3);
    assert_eq!(buffer.lines(), vec!["line 7", "line 8", "line 9"]);
}

#[test]
fn test_buffer_below_capacity_keeps_everything() {
    let buffer = LogBuffer::new(100);
    buffer.push_bytes(b"a\nb\n");
    assert_eq!(buffer.lines(), vec!["a", "b"]);
    assert!(!buffer.is_empty());
}

#[test]
fn test_buffer_holds_back_partial_line() {
    let buffer = LogBuffer::new(4);
    buffer.push_bytes(b"complete\nparti");
    assert_eq!(buffer.lines(), vec!["complete"]);

    buffer.push_bytes(b"al\n");
    assert_eq!(buffer.lines(), vec!["complete", "partial"]);
}

#[test]
fn test_buffer_formats_on_read() {
    let buffer = LogBuffer::new(4);
    buffer.push_bytes(format!("{}\nraw\n", DIRECTOR_LINE).as_bytes());

    assert_eq!(buffer.lines()[0], DIRECTOR_LINE);
    assert_eq!(
        buffer.formatted_lines(false),
        vec![
            "[director] 12:00:00.123 INFO - Listening on :25555".to_string(),
            "raw".to_string()
        ]
    );
}

#[test]
fn test_buffer_shared_across_threads() {
    let buffer = LogBuffer::new(1000);
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let mut sink = buffer.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    writeln!(sink, "t{} {}", t, i).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(buffer.len(), 200);
}

// =============================================================================
// TeeWriter Tests
// =============================================================================

#[test]
fn test_tee_into_writer_and_buffer() {
    let buffer = LogBuffer::new(10);
    let writer = LogWriter::new(Vec::new()).with_format(LogFormat::MessageOnly);
    let mut tee = TeeWriter::new(writer, buffer.clone());

    writeln!(tee, "{}", DIRECTOR_LINE).unwrap();

    assert_eq!(buffer.lines(), vec![DIRECTOR_LINE]);
}

#[test]
fn test_tee_streams_do_not_splice_partial_lines() {
    let buffer = LogBuffer::new(10);
    let mut stdout = TeeWriter::new(LogWriter::new(Vec::new()), buffer.clone());
    let mut stderr = TeeWriter::new(LogWriter::new(Vec::new()), buffer.clone());

    stdout
        .write_all(b"[director] 2024-05-01T12:00:00Z INFO - long stdout li")
        .unwrap();
    stderr.write_all(b"panic: db down\n").unwrap();
    stdout.write_all(b"ne\n").unwrap();

    assert_eq!(
        buffer.lines(),
        vec![
            "panic: db down",
            "[director] 2024-05-01T12:00:00Z INFO - long stdout line",
        ]
    );
}
