//! # Log Capture
//!
//! Turns the raw byte stream a backend produces for the director container
//! into something fit for a terminal, and keeps a bounded tail of it for
//! post-mortem diagnostics.
//!
//! ```text
//!  backend stream ──► TeeWriter ──► LogWriter (filter, format) ──► UI
//!                          │
//!                          └──────► LogBuffer (raw, last N lines)
//! ```
//!
//! Both writers split on `\n` and carry partial lines across writes, so a
//! backend may hand over arbitrarily sized chunks.

pub mod buffer;
pub mod line;
pub mod writer;

pub use buffer::LogBuffer;
pub use line::{LogLine, format_log_line, parse_log_line};
pub use writer::{LogFormat, LogWriter, TeeWriter};
