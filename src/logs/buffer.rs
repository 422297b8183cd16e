//! Bounded ring buffer of raw log lines.

use super::line::{format_log_line, parse_log_line};
use super::writer::LineSplitter;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe FIFO of the most recent complete log lines.
///
/// Cloning yields another handle to the same ring, so one clone can be
/// handed to a log follower as its `io::Write` sink while another is read
/// for diagnostics. Only raw text is stored; formatting happens on read.
///
/// Every handle splits lines on its own: a clone starts with no pending
/// partial line, and a fragment written through one handle is never joined
/// with bytes written through another. Give each stream its own clone.
#[derive(Debug)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    splitter: Mutex<LineSplitter>,
    capacity: usize,
}

impl Clone for LogBuffer {
    fn clone(&self) -> Self {
        Self {
            lines: Arc::clone(&self.lines),
            splitter: Mutex::new(LineSplitter::default()),
            capacity: self.capacity,
        }
    }
}

impl LogBuffer {
    /// Creates a buffer holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            splitter: Mutex::new(LineSplitter::default()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A panicking writer cannot leave a half-pushed line behind.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Maximum number of stored lines.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored lines.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no complete line has been stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the stored lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Stored lines re-parsed and formatted, oldest first.
    pub fn formatted_lines(&self, colorize: bool) -> Vec<String> {
        self.lines()
            .iter()
            .map(|raw| format_log_line(&parse_log_line(raw), colorize))
            .collect()
    }

    /// Appends raw bytes from this handle's stream, storing every completed
    /// line.
    pub fn push_bytes(&self, buf: &[u8]) {
        let mut complete = Vec::new();
        self.splitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(buf, |line| complete.push(line.to_string()));
        if complete.is_empty() {
            return;
        }

        let mut lines = self.lock();
        for line in complete {
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let buffer = LogBuffer::new(2);
        buffer.push_bytes(b"a\nb\nc\n");
        assert_eq!(buffer.lines(), vec!["b", "c"]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clone_starts_without_partial() {
        let buffer = LogBuffer::new(4);
        buffer.push_bytes(b"frag");
        let other = buffer.clone();
        other.push_bytes(b"whole\n");
        buffer.push_bytes(b"ment\n");
        assert_eq!(buffer.lines(), vec!["whole", "fragment"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = LogBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
