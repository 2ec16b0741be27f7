//! Output sinks for a streamed response.
//!
//! The console is always written through a [`Renderer`].  A [`TeeFile`]
//! additionally appends the response to the prompt file when tee mode is on.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Marker appended to the output when the user cancels a response.
pub const INTERRUPTED_MARKER: &str = "\n[interrupted]\n";

/// ANSI escape code for dim text (used for the echoed prompt).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for yellow text (used for the interruption marker).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering a response on the console.
pub trait Renderer: Send {
    /// Echo the prompt before a completion-mode response.
    fn print_prompt(&mut self, text: &str);

    /// Print a chunk of response text.
    ///
    /// Called incrementally as fragments clear the filters.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a response is complete.
    ///
    /// Leaves the cursor at the start of a line.
    fn finish_response(&mut self);

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    at_line_start: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer writing to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            at_line_start: true,
        }
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    // Console write failures (e.g. a closed pipe) are not worth aborting for.
    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
        self.at_line_start = text.ends_with('\n');
    }

    fn styled(&mut self, style: &str, text: &str) {
        if self.use_color {
            let _ = self.out.write_all(style.as_bytes());
            self.emit(text);
            let _ = self.out.write_all(ANSI_RESET.as_bytes());
            let _ = self.out.flush();
        } else {
            self.emit(text);
        }
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_prompt(&mut self, text: &str) {
        self.styled(ANSI_DIM, text);
    }

    fn print_text(&mut self, text: &str) {
        self.emit(text);
    }

    fn print_error(&mut self, error: &str) {
        if !self.at_line_start {
            self.emit("\n");
        }
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        if !self.at_line_start {
            self.emit("\n");
        }
        self.emit(info);
        self.emit("\n");
    }

    fn finish_response(&mut self) {
        if !self.at_line_start {
            self.emit("\n");
        }
    }

    fn print_interrupted(&mut self) {
        self.styled(ANSI_YELLOW, INTERRUPTED_MARKER);
    }
}

/// The prompt file, opened for appending the response.
///
/// Every write is flushed before returning so the file reflects what the
/// console shows.  The file is closed when the value is dropped.
#[derive(Debug)]
pub struct TeeFile {
    path: PathBuf,
    file: File,
}

impl TeeFile {
    /// Open `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|err| Error::io(format!("cannot open {}: {err}", path.display()), err))?;
        Ok(Self { path, file })
    }

    /// The file being appended to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `text` and flush.
    pub fn write(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|err| {
                Error::io(format!("cannot write {}: {err}", self.path.display()), err)
            })
    }
}
