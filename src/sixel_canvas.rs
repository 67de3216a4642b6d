//! Sixel canvas: NeuQuant-quantizes the framebuffer to a 256-color palette
//! and hand-encodes it into DEC sixel bands, since no Rust crate wraps
//! libsixel the way the original project links it directly.
//!
//! The cursor-placement quirk (some terminals put the cursor after the
//! image on the same row, others on the next row) is handled with the same
//! two escape-sequence workarounds the original project uses, selected by
//! whatever `term_query` determined about the connected terminal.

use std::fmt::Write as _;
use std::sync::Arc;

use color_quant::NeuQuant;

use crate::canvas::{CanvasBase, TerminalCanvas};
use crate::clock::Duration;
use crate::framebuffer::{Framebuffer, Rgba};
use crate::options::DisplayOptions;
use crate::sequencer::{BufferedWriteSequencer, OutBuffer, SeqType};
use crate::threadpool::ThreadPool;

const NEUQUANT_COLORS: usize = 256;
const NEUQUANT_SAMPLE_FACTOR: i32 = 10;

fn round_to_sixel(pixels: usize) -> usize {
    (pixels + 5) / 6 * 6
}

pub struct SixelCanvas {
    base: CanvasBase,
    thread_pool: Arc<ThreadPool>,
    options: DisplayOptions,
    cursor_move_before: &'static str,
    cursor_move_after: &'static str,
}

impl SixelCanvas {
    pub fn new(
        write_sequencer: Arc<BufferedWriteSequencer>,
        thread_pool: Arc<ThreadPool>,
        required_cursor_placement_workaround: bool,
        options: DisplayOptions,
    ) -> Self {
        let (cursor_move_before, cursor_move_after) = if !required_cursor_placement_workaround {
            // Default: works with konsole, mlterm, libvte-based terminals,
            // alacritty-sixel. Breaks on xterm/wezterm.
            ("\x1b[80h\x1b[?7730h\x1b[?8452l", "\r")
        } else {
            // Workaround: xterm, mlterm, wezterm, alacritty-sixel. Breaks on
            // konsole and libvte-based terminals.
            ("\x1b[80l\x1b[?7730l\x1b[?8452h", "\n")
        };
        SixelCanvas {
            base: CanvasBase::new(write_sequencer),
            thread_pool,
            options,
            cursor_move_before,
            cursor_move_after,
        }
    }
}

impl TerminalCanvas for SixelCanvas {
    fn send(&mut self, x: i64, dy: i64, framebuffer: &Framebuffer, seq_type: SeqType, end_of_frame: Duration) {
        let cell_rows = self.cell_height_for_pixels(dy.min(0));
        let mut prefix = String::new();
        self.base
            .append_cursor_prefix(&mut prefix, x / self.options.cell_x_px as i64, dy, cell_rows);

        let orig_height = framebuffer.height();
        let padded_height = round_to_sixel(orig_height);
        let width = framebuffer.width();

        let mut padded = Framebuffer::new(width, padded_height);
        for y in 0..orig_height {
            for col in 0..width {
                padded.set_pixel(col, y, framebuffer.at(col, y));
            }
        }
        let getter = self.options.bgcolor_getter.clone();
        let pattern = self.options.bg_pattern_color;
        let pattern_width = (self.options.pattern_size * self.options.cell_x_px) as i64;
        let pattern_height = (self.options.pattern_size * self.options.cell_y_px / 2) as i64;
        padded.alpha_compose_background(
            || getter.map(|g| g()).unwrap_or(Rgba::TRANSPARENT),
            pattern,
            pattern_width,
            pattern_height,
            orig_height,
        );

        let cursor_before = self.cursor_move_before;
        let cursor_after = self.cursor_move_after;
        let pool = Arc::clone(&self.thread_pool);
        let encode = move || {
            let mut out = OutBuffer::new();
            out.append_str(&prefix);
            out.append_str(cursor_before);
            out.append_str("\x1bPq");
            encode_sixel_body(&padded, &mut out);
            out.append_str("\x1b\\");
            out.append_str(cursor_after);
            out
        };
        let handle = pool.exec_async(encode);
        self.base
            .write_sequencer
            .write_buffer(handle, seq_type, end_of_frame);
    }

    fn cell_height_for_pixels(&self, pixels: i64) -> i64 {
        assert!(pixels <= 0);
        let pixels = -pixels as usize;
        -(((round_to_sixel(pixels) + self.options.cell_y_px - 1) / self.options.cell_y_px) as i64)
    }
}

fn encode_sixel_body(fb: &Framebuffer, out: &mut OutBuffer) {
    let width = fb.width();
    let height = fb.height();
    let rgba: Vec<u8> = fb
        .as_slice()
        .iter()
        .flat_map(|p| [p.r, p.g, p.b, p.a])
        .collect();
    let quant = NeuQuant::new(NEUQUANT_SAMPLE_FACTOR, NEUQUANT_COLORS, &rgba);
    let palette = quant.color_map_rgb();
    let num_colors = palette.len() / 3;

    let mut text = String::new();
    for i in 0..num_colors {
        let r = palette[i * 3] as u32 * 100 / 255;
        let g = palette[i * 3 + 1] as u32 * 100 / 255;
        let b = palette[i * 3 + 2] as u32 * 100 / 255;
        let _ = writeln!(text, "#{i};2;{r};{g};{b}");
    }

    let mut indices = vec![0u8; width * height];
    for (i, px) in fb.as_slice().iter().enumerate() {
        let idx = quant.index_of(&[px.r, px.g, px.b, px.a]);
        indices[i] = idx as u8;
    }

    let bands = height / 6;
    for band in 0..bands {
        let mut colors_used: Vec<u8> = Vec::new();
        for x in 0..width {
            for row in 0..6 {
                let idx = indices[(band * 6 + row) * width + x];
                if !colors_used.contains(&idx) {
                    colors_used.push(idx);
                }
            }
        }
        colors_used.sort_unstable();

        for (ci, &color_idx) in colors_used.iter().enumerate() {
            let _ = write!(text, "#{color_idx}");
            let mut run_char = 0u8;
            let mut run_len = 0u32;
            for x in 0..width {
                let mut bits = 0u8;
                for row in 0..6 {
                    if indices[(band * 6 + row) * width + x] == color_idx {
                        bits |= 1 << row;
                    }
                }
                let ch = 63 + bits;
                if run_len > 0 && ch == run_char {
                    run_len += 1;
                } else {
                    flush_run(&mut text, run_char, run_len);
                    run_char = ch;
                    run_len = 1;
                }
            }
            flush_run(&mut text, run_char, run_len);
            if ci + 1 < colors_used.len() {
                text.push('$');
            }
        }
        if band + 1 < bands {
            text.push('-');
        }
    }

    out.append_str(&text);
}

fn flush_run(text: &mut String, ch: u8, len: u32) {
    if len == 0 {
        return;
    }
    if len <= 3 {
        for _ in 0..len {
            text.push(ch as char);
        }
    } else {
        let _ = write!(text, "!{len}{}", ch as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_multiple_of_six() {
        assert_eq!(round_to_sixel(1), 6);
        assert_eq!(round_to_sixel(6), 6);
        assert_eq!(round_to_sixel(7), 12);
    }
}
