//! Line-splitting writers that sit between a backend log stream and its sinks.

use super::line::{format_log_line, parse_log_line};
use std::collections::HashSet;
use std::io::{self, Write};

/// Accumulates bytes and yields complete `\n`-terminated lines.
///
/// A trailing `\r` is stripped; invalid UTF-8 is replaced lossily.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, buf: &[u8], mut emit: impl FnMut(&str)) {
        self.pending.extend_from_slice(buf);

        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let mut line = &self.pending[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            emit(&String::from_utf8_lossy(line));
            start = end + 1;
        }
        self.pending.drain(..start);
    }

    /// Returns the buffered partial line, if any, leaving the splitter empty.
    pub(crate) fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let partial = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(partial)
    }
}

/// Output mode of a [`LogWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// `[component] HH:MM:SS.mmm LEVEL - message`
    #[default]
    Full,
    /// Only the message body; lines with an empty message are skipped.
    MessageOnly,
}

/// `io::Write` adapter that re-renders a raw log stream line by line.
///
/// Partial input is buffered across calls; each complete line is parsed,
/// filtered by component and written to the inner writer with a trailing
/// newline.
pub struct LogWriter<W: Write> {
    inner: W,
    splitter: LineSplitter,
    components: Option<HashSet<String>>,
    format: LogFormat,
    colorize: bool,
}

impl<W: Write> LogWriter<W> {
    /// Creates a writer emitting full, uncolored lines for every component.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            splitter: LineSplitter::default(),
            components: None,
            format: LogFormat::Full,
            colorize: false,
        }
    }

    /// Restricts output to the given components.
    ///
    /// Lines without a parsed component always pass. An empty set disables
    /// filtering.
    pub fn with_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = components.into_iter().map(Into::into).collect();
        self.components = if set.is_empty() { None } else { Some(set) };
        self
    }

    /// Sets the output mode.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables ANSI colors in full mode.
    pub fn with_colorize(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    /// Emits any buffered partial line and returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(partial) = self.splitter.take_partial() {
            let mut out = Vec::new();
            self.render(&partial, &mut out);
            self.inner.write_all(&out)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn render(&self, raw: &str, out: &mut Vec<u8>) {
        let line = parse_log_line(raw);

        if let Some(allowed) = &self.components
            && !line.component.is_empty()
            && !allowed.contains(&line.component)
        {
            return;
        }

        let text = match self.format {
            LogFormat::Full => format_log_line(&line, self.colorize),
            LogFormat::MessageOnly if line.is_parsed() => {
                if line.message.is_empty() {
                    return;
                }
                line.message
            }
            // Nothing to strip from an unparsed line.
            LogFormat::MessageOnly => {
                if line.raw.is_empty() {
                    return;
                }
                line.raw
            }
        };

        out.extend_from_slice(text.as_bytes());
        out.push(b'\n');
    }
}

impl<W: Write> Write for LogWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = Vec::new();
        let mut lines = Vec::new();
        self.splitter.push(buf, |line| lines.push(line.to_string()));
        for line in &lines {
            self.render(line, &mut out);
        }
        if !out.is_empty() {
            self.inner.write_all(&out)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Duplicates every write into two writers.
pub struct TeeWriter<A: Write, B: Write> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> TeeWriter<A, B> {
    /// Creates a tee over `first` and `second`.
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splitter_carries_partial_lines() {
        let mut splitter = LineSplitter::default();
        let mut seen = Vec::new();
        splitter.push(b"hel", |l| seen.push(l.to_string()));
        assert!(seen.is_empty());
        splitter.push(b"lo\r\nwor", |l| seen.push(l.to_string()));
        assert_eq!(seen, vec!["hello"]);
        assert_eq!(splitter.take_partial().as_deref(), Some("wor"));
        assert_eq!(splitter.take_partial(), None);
    }

    #[test]
    fn test_tee_duplicates() {
        let mut tee = TeeWriter::new(Vec::new(), Vec::new());
        tee.write_all(b"abc").unwrap();
        let TeeWriter { first, second } = tee;
        assert_eq!(first, b"abc");
        assert_eq!(second, b"abc");
    }
}
