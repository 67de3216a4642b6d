//! Grid layout on top of a [`crate::canvas::TerminalCanvas`]: arranges one
//! or more images into rows/columns of terminal cells, handles the
//! optional per-image title line, and tracks cursor deltas between cells.

use crate::canvas::TerminalCanvas;
use crate::clock::Duration;
use crate::framebuffer::Framebuffer;
use crate::sequencer::SeqType;

/// Expand the `%f`/`%b`/`%w`/`%h`/`%D` tokens documented for `--title`.
pub fn format_title(template: &str, filename: &str, basename: &str, width: usize, height: usize, duration_secs: f64) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => out.push_str(filename),
            Some('b') => out.push_str(basename),
            Some('w') => out.push_str(&width.to_string()),
            Some('h') => out.push_str(&height.to_string()),
            Some('D') => out.push_str(&format!("{duration_secs:.1}")),
            Some('%') => out.push('%'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Truncates `title` to `max_width` columns, center-padding short titles so
/// they sit visually centered over the image rather than left-aligned. Long
/// titles are cut from the head, keeping the tail (usually the more
/// identifying part of a path) and marking the cut with a leading `...`.
pub fn trim_title(title: &str, max_width: usize) -> String {
    let chars: Vec<char> = title.chars().collect();
    if chars.len() > max_width {
        if max_width <= 3 {
            return "...".chars().take(max_width).collect();
        }
        let keep = max_width - 3;
        let tail: String = chars[chars.len() - keep..].iter().collect();
        return format!("...{tail}");
    }
    let pad = (max_width - chars.len()) / 2;
    format!("{}{}", " ".repeat(pad), title)
}

/// Single column: images are simply stacked vertically. The very first
/// `Send` of a sequence draws in place (nothing has been emitted yet to move
/// up from); every later frame moves the cursor back up by the *previous*
/// frame's height first, so an animation overwrites its own last frame
/// rather than leaving a gap sized by the tallest frame seen.
pub struct SingleColumnRenderer {
    last_height_px: Option<i64>,
}

impl SingleColumnRenderer {
    pub fn new() -> Self {
        SingleColumnRenderer { last_height_px: None }
    }

    pub fn render(
        &mut self,
        canvas: &mut dyn TerminalCanvas,
        framebuffer: &Framebuffer,
        cell_height_px: i64,
        seq_type: SeqType,
        end_of_frame: Duration,
    ) {
        let dy = match self.last_height_px {
            Some(prev) => -prev,
            None => 0,
        };
        canvas.send(0, dy, framebuffer, seq_type, end_of_frame);
        self.last_height_px = Some(cell_height_px);
    }
}

impl Default for SingleColumnRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SingleColumnRenderer {
    fn drop(&mut self) {
        // Nothing to flush: every `send` already accounts for its own
        // height; kept as an explicit no-op Drop to mirror the original's
        // destructor, which exists for the multi-column case below.
    }
}

/// Multiple columns: each image occupies one grid cell, `columns` wide,
/// wrapping to a new row once that many cells have been placed. Tracks the
/// tallest cell seen in the current row so a shorter image doesn't leave the
/// next row starting too high.
pub struct MultiColumnRenderer {
    columns: i64,
    column_width_px: i64,
    current_column: i64,
    highest_column_height_px: i64,
    last_height_px: i64,
    first_render_call: bool,
}

impl MultiColumnRenderer {
    pub fn new(columns: usize, column_width_px: usize) -> Self {
        MultiColumnRenderer {
            columns: columns.max(1) as i64,
            column_width_px: column_width_px as i64,
            current_column: -1,
            highest_column_height_px: 0,
            last_height_px: 0,
            first_render_call: true,
        }
    }

    /// Advances to the next grid cell; call once per image before its
    /// frame(s) are rendered.
    pub fn start_cell(&mut self) {
        self.current_column += 1;
        if self.current_column >= self.columns {
            self.current_column = 0;
            self.highest_column_height_px = 0;
        }
        self.first_render_call = true;
    }

    pub fn render(
        &mut self,
        canvas: &mut dyn TerminalCanvas,
        framebuffer: &Framebuffer,
        cell_height_px: i64,
        seq_type: SeqType,
        end_of_frame: Duration,
    ) {
        let x_offset = self.current_column * self.column_width_px;
        let y_offset = if self.first_render_call {
            if self.current_column > 0 {
                -self.last_height_px
            } else {
                0
            }
        } else {
            -self.last_height_px
        };
        canvas.send(x_offset, y_offset, framebuffer, seq_type, end_of_frame);
        self.last_height_px = cell_height_px;
        self.highest_column_height_px = self.highest_column_height_px.max(self.last_height_px);
        self.first_render_call = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_tokens_are_substituted() {
        let out = format_title("%f (%wx%h)", "cat.png", "cat.png", 80, 24, 0.0);
        assert_eq!(out, "cat.png (80x24)");
    }

    #[test]
    fn literal_percent_is_preserved() {
        assert_eq!(format_title("100%%", "f", "b", 0, 0, 0.0), "100%");
    }

    #[test]
    fn trim_title_truncates_long_titles() {
        let out = trim_title("a very long title indeed", 10);
        assert_eq!(out.chars().count(), 10);
    }

    #[test]
    fn trim_title_cuts_the_head_and_keeps_the_tail() {
        let out = trim_title("a very long title indeed", 10);
        assert_eq!(out, "... indeed");
        assert!(out.starts_with("..."));
        assert!(out.ends_with("indeed"));
    }

    #[test]
    fn trim_title_centers_short_titles() {
        let out = trim_title("hi", 6);
        assert_eq!(out, "  hi");
    }
}
