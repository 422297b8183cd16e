//! User-facing output and the confirmation gate.

use crate::error::{Error, Result};
use crate::logs::writer::LineSplitter;
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Side-effect channel for progress output and confirmation prompts.
pub trait Ui: Send + Sync {
    fn print_line(&self, line: &str);

    fn error_line(&self, line: &str);

    /// Asks a yes/no question; `Ok(false)` unless the user agrees.
    ///
    /// Blocks the calling thread until answered. Returns
    /// [`Error::UserAborted`] when no answer can be read.
    fn ask_for_confirmation(&self, prompt: &str) -> Result<bool>;
}

/// Terminal [`Ui`]: stdout for progress, stderr for errors, stdin for
/// answers.
#[derive(Debug, Clone, Default)]
pub struct ConsoleUi {
    assume_yes: bool,
    colorize: bool,
}

impl ConsoleUi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every confirmation with yes (`--yes`).
    pub fn with_assume_yes(mut self, assume_yes: bool) -> Self {
        self.assume_yes = assume_yes;
        self
    }

    pub fn with_colorize(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }
}

impl Ui for ConsoleUi {
    fn print_line(&self, line: &str) {
        println!("{}", line);
    }

    fn error_line(&self, line: &str) {
        if self.colorize {
            eprintln!("{}", line.red());
        } else {
            eprintln!("{}", line);
        }
    }

    fn ask_for_confirmation(&self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            println!("{} [y/N]: y (--yes)", prompt);
            return Ok(true);
        }

        {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{} [y/N]: ", prompt)?;
            stdout.flush()?;
        }
        off_runtime(|| read_answer(&mut io::stdin().lock()))
    }
}

/// Reads one answer line. End of input means no answer will ever arrive.
fn read_answer(input: &mut impl BufRead) -> Result<bool> {
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Err(Error::UserAborted);
    }
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

/// Runs a blocking read without stalling the other tasks of a multi-thread
/// runtime. Current-thread runtimes have no other worker to hand off to.
fn off_runtime<T>(read: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(read),
        _ => read(),
    }
}

/// `io::Write` sink that prints each complete line through a [`Ui`].
pub struct UiWriter {
    ui: Arc<dyn Ui>,
    splitter: LineSplitter,
}

impl UiWriter {
    pub fn new(ui: Arc<dyn Ui>) -> Self {
        Self {
            ui,
            splitter: LineSplitter::default(),
        }
    }
}

impl Write for UiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let ui = &self.ui;
        self.splitter.push(buf, |line| ui.print_line(line));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for UiWriter {
    fn drop(&mut self) {
        if let Some(partial) = self.splitter.take_partial() {
            self.ui.print_line(&partial);
        }
    }
}
