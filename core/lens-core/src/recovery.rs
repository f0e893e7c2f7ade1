//! Best-effort command-text recovery from the screen buffer.
//!
//! When the control channel never supplied the command line, the tracker
//! falls back to reading it off the screen: take the row the cursor was on
//! when the command started, strip the shell prompt, and if that yields
//! nothing usable try the row above. An empty result is a valid outcome:
//! the record is still created and classifies to `other`/`normal`.

use crate::patterns::{RE_GARBLED, RE_PROMPT};

/// Read-only view of the terminal screen, addressed by row index. Owned by
/// the rendering engine; this subsystem only ever reads from it.
pub trait ScreenBuffer {
    fn line(&self, row: u32) -> Option<String>;
}

/// A screen view backed by a slice of rows. Row 0 is the top of the
/// visible buffer.
pub struct SliceScreen<'a> {
    rows: &'a [String],
}

impl<'a> SliceScreen<'a> {
    pub fn new(rows: &'a [String]) -> Self {
        Self { rows }
    }
}

impl ScreenBuffer for SliceScreen<'_> {
    fn line(&self, row: u32) -> Option<String> {
        self.rows.get(row as usize).cloned()
    }
}

/// Recovers a command string from the screen, or `""`. Never fails.
pub fn recover(buffer: &dyn ScreenBuffer, cursor_row: u32) -> String {
    if let Some(text) = usable_line(buffer, cursor_row) {
        return text;
    }
    if cursor_row > 0 {
        if let Some(text) = usable_line(buffer, cursor_row - 1) {
            return text;
        }
    }
    String::new()
}

fn usable_line(buffer: &dyn ScreenBuffer, row: u32) -> Option<String> {
    let line = buffer.line(row)?;
    let stripped = strip_prompt(line.trim());
    if stripped.is_empty() || looks_garbled(&stripped) {
        None
    } else {
        Some(stripped)
    }
}

/// Removes a leading shell prompt (anything through a trailing `$`, `#`,
/// `%`, or `>` plus whitespace).
pub fn strip_prompt(line: &str) -> String {
    match RE_PROMPT.captures(line) {
        Some(caps) => caps[1].trim().to_string(),
        None => line.trim().to_string(),
    }
}

/// Narrow detector for the one mis-decoding observed upstream (kana-block
/// or replacement characters). Deliberately not a general mojibake check.
fn looks_garbled(text: &str) -> bool {
    RE_GARBLED.is_match(text)
}
