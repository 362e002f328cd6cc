//! Byte-chunk to line splitting.
//!
//! Chunks arrive at arbitrary boundaries (possibly mid UTF-8 sequence), so bytes
//! are buffered until a `\n` completes the line. Decoding is lossy.

/// Reduce a raw line to what the log should show: the text after the final
/// carriage return, with trailing whitespace removed. Returns `None` for blank
/// results.
pub fn normalize_line(raw: &str) -> Option<&str> {
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    let last = raw.rsplit('\r').next().unwrap_or(raw);
    let trimmed = last.trim_end();
    if trimmed.trim_start().is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Incremental splitter for one output stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk, emitting every line it completes.
    pub fn feed<F: FnMut(&str)>(&mut self, chunk: &[u8], mut emit: F) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            Self::deliver(&self.pending, &mut emit);
            self.pending.clear();
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
    }

    /// Emit any unterminated trailing line (end of stream).
    pub fn finish<F: FnMut(&str)>(&mut self, mut emit: F) {
        if !self.pending.is_empty() {
            Self::deliver(&self.pending, &mut emit);
            self.pending.clear();
        }
    }

    fn deliver<F: FnMut(&str)>(bytes: &[u8], emit: &mut F) {
        let text = String::from_utf8_lossy(bytes);
        if let Some(line) = normalize_line(&text) {
            emit(line);
        }
    }
}
