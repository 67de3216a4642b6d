//! Half-block (▀/▄) and quarter-block differential canvas: the default,
//! most widely compatible encoder, since it only needs SGR color escapes
//! and Unicode block glyphs rather than an in-band graphics protocol.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::canvas::{move_cursor_dx, move_cursor_dy, CanvasBase, TerminalCanvas, CSI};
use crate::clock::Duration;
use crate::framebuffer::{linear_average, Framebuffer, LinearColor, Rgba};
use crate::options::DisplayOptions;
use crate::sequencer::{BufferedWriteSequencer, OutBuffer, SeqType};
use crate::threadpool::ThreadPool;

const UPPER_HALF_BLOCK: char = '\u{2580}';
const LOWER_HALF_BLOCK: char = '\u{2584}';
const QUADRANT_UPPER_LEFT: char = '\u{2598}';
const QUADRANT_UPPER_RIGHT: char = '\u{259D}';
const QUADRANT_LOWER_LEFT: char = '\u{2596}';
const QUADRANT_LOWER_RIGHT: char = '\u{259E}';
const QUADRANT_UPPER_LEFT_LOWER_RIGHT: char = '\u{259A}';
const FULL_BLOCK: char = '\u{2588}';

/// What we actually remember from the previous frame for a terminal cell,
/// so unchanged cells can be skipped entirely on redraw.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CellColor {
    fg: Rgba,
    bg: Rgba,
    glyph: char,
}

pub struct UnicodeBlockCanvas {
    base: CanvasBase,
    thread_pool: Arc<ThreadPool>,
    options: DisplayOptions,
    backing_buffer: Vec<Option<CellColor>>,
    last_width: usize,
    last_height: usize,
    /// Column of the last `send`, and the pixel height of the framebuffer it
    /// drew. A later `send` can only diff against `backing_buffer` instead of
    /// redrawing everything if it returns to exactly this column after
    /// moving the cursor up by exactly this many pixel rows — otherwise the
    /// backing buffer no longer lines up with what's on screen.
    last_x_indent: i64,
    last_pixel_height: i64,
}

impl UnicodeBlockCanvas {
    pub fn new(
        write_sequencer: Arc<BufferedWriteSequencer>,
        thread_pool: Arc<ThreadPool>,
        options: DisplayOptions,
    ) -> Self {
        UnicodeBlockCanvas {
            base: CanvasBase::new(write_sequencer),
            thread_pool,
            options,
            backing_buffer: Vec::new(),
            last_width: 0,
            last_height: 0,
            last_x_indent: 0,
            last_pixel_height: 0,
        }
    }

    fn ensure_buffers(&mut self, width: usize, height: usize) {
        let rows = (height + 1) / 2;
        if width != self.last_width || rows != self.last_height {
            self.backing_buffer = vec![None; width * rows];
            self.last_width = width;
            self.last_height = rows;
        }
    }

    fn pick_cell(&self, fb: &Framebuffer, x: usize, y_top: usize, y_bottom: Option<usize>) -> CellColor {
        if self.options.use_quarter_blocks {
            self.pick_quarter_cell(fb, x, y_top, y_bottom)
        } else {
            self.pick_half_cell(fb, x, y_top, y_bottom)
        }
    }

    fn pick_half_cell(&self, fb: &Framebuffer, x: usize, y_top: usize, y_bottom: Option<usize>) -> CellColor {
        let top = fb.at(x, y_top);
        let bottom = y_bottom.map(|y| fb.at(x, y)).unwrap_or(top);
        if top == bottom {
            return CellColor {
                fg: top,
                bg: top,
                glyph: ' ',
            };
        }
        if self.options.use_upper_half_block {
            CellColor {
                fg: top,
                bg: bottom,
                glyph: UPPER_HALF_BLOCK,
            }
        } else {
            CellColor {
                fg: bottom,
                bg: top,
                glyph: LOWER_HALF_BLOCK,
            }
        }
    }

    /// Picks one of the five quadrant glyphs (or a solid cell) whose
    /// two-color split best matches the four source pixels, by choosing the
    /// split that minimizes total linear-color distance to its two
    /// quadrant groups.
    fn pick_quarter_cell(&self, fb: &Framebuffer, x: usize, y_top: usize, y_bottom: Option<usize>) -> CellColor {
        let has_right = x + 1 < fb.width();
        let y_bot = y_bottom.unwrap_or(y_top);
        let tl = fb.at(x, y_top);
        let tr = if has_right { fb.at(x + 1, y_top) } else { tl };
        let bl = fb.at(x, y_bot);
        let br = if has_right { fb.at(x + 1, y_bot) } else { bl };

        let candidates: Vec<(char, Vec<Rgba>, Vec<Rgba>)> = vec![
            (FULL_BLOCK, vec![tl, tr, bl, br], vec![]),
            (QUADRANT_UPPER_LEFT, vec![tl], vec![tr, bl, br]),
            (QUADRANT_UPPER_RIGHT, vec![tr], vec![tl, bl, br]),
            (QUADRANT_LOWER_LEFT, vec![bl], vec![tl, tr, br]),
            (QUADRANT_LOWER_RIGHT, vec![br], vec![tl, tr, bl]),
            (QUADRANT_UPPER_LEFT_LOWER_RIGHT, vec![tl, br], vec![tr, bl]),
        ];

        let mut best_glyph = FULL_BLOCK;
        let mut best_fg = linear_average(&[tl, tr, bl, br]).repack();
        let mut best_bg = best_fg;
        let mut best_cost = u64::MAX;

        for (glyph, fg_group, bg_group) in &candidates {
            let fg = linear_average(fg_group).repack();
            let bg = if bg_group.is_empty() {
                fg
            } else {
                linear_average(bg_group).repack()
            };
            let cost = group_cost(fg_group, LinearColor::from(fg))
                + group_cost(bg_group, LinearColor::from(bg));
            if cost < best_cost {
                best_cost = cost;
                best_glyph = *glyph;
                best_fg = fg;
                best_bg = bg;
            }
        }

        CellColor {
            fg: best_fg,
            bg: best_bg,
            glyph: best_glyph,
        }
    }
}

fn group_cost(group: &[Rgba], avg: LinearColor) -> u64 {
    group.iter().map(|c| LinearColor::from(*c).dist(&avg)).sum()
}

impl TerminalCanvas for UnicodeBlockCanvas {
    fn send(&mut self, x: i64, dy: i64, framebuffer: &Framebuffer, seq_type: SeqType, end_of_frame: Duration) {
        let width = framebuffer.width();
        let height = framebuffer.height();
        self.ensure_buffers(width, height);

        let rows = (height + 1) / 2;
        let cell_rows = self.cell_height_for_pixels(dy.min(0));
        let target_column = x / self.options.cell_x_px as i64;

        // Only trust the backing buffer if we're back at exactly the column
        // and pixel height we left off at; otherwise what's on screen there
        // now is unrelated and every cell must be redrawn.
        let should_emit_difference = target_column == self.last_x_indent
            && self.last_pixel_height > 0
            && dy.abs() == self.last_pixel_height;

        let mut out = String::new();
        if dy < 0 {
            move_cursor_dy(&mut out, cell_rows);
        }

        let mut last_color: Option<(Rgba, Rgba)> = None;
        let mut y_skip: i64 = 0;
        for row in 0..rows {
            let y_top = row * 2;
            let y_bottom = if y_top + 1 < height { Some(y_top + 1) } else { None };
            let mut x_skip: i64 = target_column;
            let row_start_len = out.len();
            for col in 0..width {
                let cell = self.pick_cell(framebuffer, col, y_top, y_bottom);
                let backing_idx = row * width + col;
                if should_emit_difference && self.backing_buffer[backing_idx] == Some(cell) {
                    x_skip += 1;
                    continue;
                }
                self.backing_buffer[backing_idx] = Some(cell);

                if y_skip > 0 {
                    move_cursor_dy(&mut out, y_skip);
                    y_skip = 0;
                }
                if x_skip > 0 {
                    move_cursor_dx(&mut out, x_skip);
                    x_skip = 0;
                }
                if last_color != Some((cell.fg, cell.bg)) {
                    write_color_escape(&mut out, cell.fg, cell.bg, self.options.use_256_color);
                    last_color = Some((cell.fg, cell.bg));
                }
                out.push(cell.glyph);
            }
            if out.len() == row_start_len {
                // Nothing changed on this row; fold it into the next jump
                // instead of emitting an empty line.
                y_skip += 1;
            } else {
                out.push_str("\x1b[0m\n\r");
                last_color = None;
            }
        }

        if y_skip > 0 {
            // Trailing unchanged rows: still need to land the cursor at the
            // bottom of the image for whatever comes next.
            move_cursor_dy(&mut out, y_skip);
        }

        self.last_x_indent = target_column;
        self.last_pixel_height = height as i64;

        let pool = Arc::clone(&self.thread_pool);
        let encode = move || OutBuffer::from_vec(out.into_bytes());
        let handle = pool.exec_async(encode);
        self.base
            .write_sequencer
            .write_buffer(handle, seq_type, end_of_frame);
    }

    fn cell_height_for_pixels(&self, pixels: i64) -> i64 {
        assert!(pixels <= 0);
        (pixels - 1) / 2
    }
}

fn write_color_escape(out: &mut String, fg: Rgba, bg: Rgba, use_256: bool) {
    if use_256 {
        let fg_idx = fg.as_256_term_color();
        let bg_idx = bg.as_256_term_color();
        let _ = write!(out, "{CSI}38;5;{fg_idx};48;5;{bg_idx}m");
    } else {
        let _ = write!(
            out,
            "{CSI}38;2;{};{};{}m{CSI}48;2;{};{};{}m",
            fg.r, fg.g, fg.b, bg.r, bg.g, bg.b
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    fn test_canvas() -> UnicodeBlockCanvas {
        let pool = Arc::new(ThreadPool::new(1));
        let seq = Arc::new(BufferedWriteSequencer::new(
            std::io::sink(),
            Arc::new(AtomicBool::new(false)),
            true,
        ));
        UnicodeBlockCanvas::new(seq, pool, DisplayOptions::default())
    }

    #[derive(Clone, Default)]
    struct VecWriter(Arc<StdMutex<Vec<u8>>>);
    impl std::io::Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn recording_canvas() -> (UnicodeBlockCanvas, VecWriter) {
        let pool = Arc::new(ThreadPool::new(1));
        let sink = VecWriter::default();
        let seq = Arc::new(BufferedWriteSequencer::new(
            sink.clone(),
            Arc::new(AtomicBool::new(false)),
            true,
        ));
        (UnicodeBlockCanvas::new(seq, pool, DisplayOptions::default()), sink)
    }

    #[test]
    fn identical_rows_collapse_to_space_glyph() {
        let canvas = test_canvas();
        let mut fb = Framebuffer::new(1, 2);
        fb.set_pixel(0, 0, Rgba::new(1, 2, 3, 255));
        fb.set_pixel(0, 1, Rgba::new(1, 2, 3, 255));
        let cell = canvas.pick_half_cell(&fb, 0, 0, Some(1));
        assert_eq!(cell.glyph, ' ');
    }

    #[test]
    fn differing_rows_pick_half_block() {
        let canvas = test_canvas();
        let mut fb = Framebuffer::new(1, 2);
        fb.set_pixel(0, 0, Rgba::new(255, 0, 0, 255));
        fb.set_pixel(0, 1, Rgba::new(0, 255, 0, 255));
        let cell = canvas.pick_half_cell(&fb, 0, 0, Some(1));
        assert_ne!(cell.glyph, ' ');
    }

    #[test]
    fn returning_to_same_column_and_height_skips_unchanged_cells() {
        let (mut canvas, sink) = recording_canvas();
        let mut fb = Framebuffer::new(1, 2);
        fb.set_pixel(0, 0, Rgba::new(255, 0, 0, 255));
        fb.set_pixel(0, 1, Rgba::new(0, 255, 0, 255));

        canvas.send(0, 0, &fb, SeqType::FrameImmediate, Duration::ZERO);
        canvas
            .base
            .write_sequencer
            .flush();
        let first_len = sink.0.lock().unwrap().len();
        sink.0.lock().unwrap().clear();

        // Same column, and the cursor-up distance matches the previous
        // framebuffer's height exactly: nothing changed, so this redraw
        // should skip the cell instead of re-emitting its color escape.
        canvas.send(0, -2, &fb, SeqType::AnimationFrame, Duration::ZERO);
        canvas.base.write_sequencer.flush();
        let second = sink.0.lock().unwrap().clone();
        assert!(first_len > 0);
        assert!(!contains_color_escape(&second));
    }

    #[test]
    fn different_column_forces_full_redraw() {
        let (mut canvas, sink) = recording_canvas();
        let mut fb = Framebuffer::new(1, 2);
        fb.set_pixel(0, 0, Rgba::new(255, 0, 0, 255));
        fb.set_pixel(0, 1, Rgba::new(0, 255, 0, 255));

        canvas.send(0, 0, &fb, SeqType::FrameImmediate, Duration::ZERO);
        canvas.base.write_sequencer.flush();
        sink.0.lock().unwrap().clear();

        // Cursor-up distance matches, but the column moved: the backing
        // buffer no longer corresponds to what's on screen, so every cell
        // must be redrawn even though the pixels are identical.
        canvas.send(8, -2, &fb, SeqType::AnimationFrame, Duration::ZERO);
        canvas.base.write_sequencer.flush();
        let second = sink.0.lock().unwrap().clone();
        assert!(contains_color_escape(&second));
    }

    fn contains_color_escape(data: &[u8]) -> bool {
        data.windows(5).any(|w| w == b"38;2;")
    }
}
