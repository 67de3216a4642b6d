//! Shared canvas plumbing: cursor motion escape sequences and the common
//! constructor shape every concrete encoder (unicode-block, Kitty, iTerm2,
//! Sixel) is built from.

use std::sync::Arc;

use crate::clock::Duration;
use crate::framebuffer::Framebuffer;
use crate::sequencer::{BufferedWriteSequencer, SeqType};

pub const CSI: &str = "\x1b[";

/// Behavior every canvas implements: send a framebuffer, possibly moving
/// the cursor first, pacing/skipping through the shared write sequencer.
pub trait TerminalCanvas {
    /// Send `framebuffer`, having moved the cursor `dy` pixel-rows up (a
    /// negative value, as produced by the renderer) and `x` pixel-columns
    /// right of the current column from a prior `Send` in the same frame.
    fn send(&mut self, x: i64, dy: i64, framebuffer: &Framebuffer, seq_type: SeqType, end_of_frame: Duration);

    /// How many terminal cell-rows `pixels` (always `<= 0`) corresponds to,
    /// used by the grid renderer to know how far the cursor actually moved.
    fn cell_height_for_pixels(&self, pixels: i64) -> i64;
}

/// Shared state every canvas embeds: the sequencer to dispatch finished
/// writes to, and the column the cursor is known to be in relative to the
/// start of the current image (so repeated `Send` calls in the same grid
/// cell only emit the delta).
pub struct CanvasBase {
    pub write_sequencer: Arc<BufferedWriteSequencer>,
    last_column: i64,
}

impl CanvasBase {
    pub fn new(write_sequencer: Arc<BufferedWriteSequencer>) -> Self {
        CanvasBase {
            write_sequencer,
            last_column: 0,
        }
    }

    /// Build the cursor-motion prefix needed to get from wherever the
    /// cursor was left to column `x` down `dy` pixel rows, appending it to
    /// `out`. `cell_height_for_pixels` converts the pixel delta to a
    /// cell-row delta for the concrete canvas's glyph granularity.
    pub fn append_cursor_prefix(&mut self, out: &mut String, x: i64, dy: i64, cell_height_for_pixels: i64) {
        if dy < 0 {
            move_cursor_dy(out, cell_height_for_pixels);
        }
        let target_column = x;
        move_cursor_dx(out, target_column - self.last_column);
        self.last_column = target_column;
    }

    pub fn reset_column(&mut self) {
        self.last_column = 0;
    }
}

pub fn move_cursor_dy(out: &mut String, dy: i64) {
    use std::fmt::Write;
    if dy < 0 {
        let _ = write!(out, "{CSI}{}A", -dy);
    } else if dy > 0 {
        let _ = write!(out, "{CSI}{}B", dy);
    }
}

pub fn move_cursor_dx(out: &mut String, dx: i64) {
    use std::fmt::Write;
    if dx < 0 {
        let _ = write!(out, "{CSI}{}D", -dx);
    } else if dx > 0 {
        let _ = write!(out, "{CSI}{}C", dx);
    }
}
