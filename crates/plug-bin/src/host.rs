//! Terminal implementation of the host sink.
//!
//! On a terminal the most recent push is redrawn in place (cursor moved back
//! over the previously drawn rows, then cleared). Otherwise pushes are kept
//! per view and printed once by [`TerminalHost::finish`], so piped output only
//! carries final reports.

use core_events::{HostSink, ViewHandle};
use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::tty::IsTty;
use crossterm::{QueueableCommand, queue};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Screen {
    /// Rows written by the last in-place redraw.
    drawn: u16,
    pending: BTreeMap<u64, Vec<String>>,
}

pub struct TerminalHost {
    interactive: bool,
    screen: Mutex<Screen>,
}

impl TerminalHost {
    pub fn new() -> Self {
        Self::with_mode(io::stdout().is_tty())
    }

    pub fn with_mode(interactive: bool) -> Self {
        Self {
            interactive,
            screen: Mutex::new(Screen::default()),
        }
    }

    fn screen(&self) -> std::sync::MutexGuard<'_, Screen> {
        self.screen.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn redraw(out: &mut impl Write, drawn: u16, lines: &[String]) -> io::Result<u16> {
        if drawn > 0 {
            queue!(out, MoveUp(drawn))?;
        }
        queue!(out, MoveToColumn(0), Clear(ClearType::FromCursorDown))?;
        for line in lines {
            out.queue(Print(line))?.queue(Print("\r\n"))?;
        }
        out.flush()?;
        Ok(u16::try_from(lines.len()).unwrap_or(u16::MAX))
    }

    /// Print whatever was held back in non-interactive mode.
    pub fn finish(&self) {
        let pending = std::mem::take(&mut self.screen().pending);
        let mut out = io::stdout().lock();
        for lines in pending.into_values() {
            if let Err(e) = write_plain(&mut out, &lines) {
                warn!(target: "host", ?e, "stdout_write_failed");
                return;
            }
        }
    }
}

impl Default for TerminalHost {
    fn default() -> Self {
        Self::new()
    }
}

fn write_plain(out: &mut impl Write, lines: &[String]) -> io::Result<()> {
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()
}

impl HostSink for TerminalHost {
    fn push_lines(&self, target: ViewHandle, lines: Vec<String>) {
        let mut screen = self.screen();
        if !self.interactive {
            screen.pending.insert(target.0, lines);
            return;
        }
        let mut out = io::stdout().lock();
        match Self::redraw(&mut out, screen.drawn, &lines) {
            Ok(rows) => screen.drawn = rows,
            Err(e) => warn!(target: "host", %target, ?e, "redraw_failed"),
        }
    }

    fn report_error(&self, message: &str) {
        // Output below the redraw area is not ours to clear.
        self.screen().drawn = 0;
        eprintln!("oxplug: {message}");
    }

    fn notify(&self, message: &str) {
        self.screen().drawn = 0;
        println!("{message}");
    }

    fn updating_changed(&self, updating: bool) {
        debug!(target: "host", updating, "updating_changed");
    }

    fn generate_helptags(&self, doc_dir: &Path) {
        info!(target: "host", dir = %doc_dir.display(), "helptags_requested");
    }

    fn refresh_remote_plugins(&self) {
        info!(target: "host", "remote_plugins_refresh_requested");
    }
}
