//! iTerm2/WezTerm inline-image protocol canvas: a single OSC 1337 escape
//! carrying a base64 PNG, no chunking required since these terminals accept
//! the whole payload in one sequence.

use std::sync::Arc;

use base64ct::{Base64, Encoding};

use crate::canvas::{CanvasBase, TerminalCanvas};
use crate::clock::Duration;
use crate::framebuffer::Framebuffer;
use crate::options::DisplayOptions;
use crate::png_encode::encode_png;
use crate::sequencer::{BufferedWriteSequencer, OutBuffer, SeqType};
use crate::threadpool::ThreadPool;

pub struct Iterm2Canvas {
    base: CanvasBase,
    thread_pool: Arc<ThreadPool>,
    options: DisplayOptions,
}

impl Iterm2Canvas {
    pub fn new(
        write_sequencer: Arc<BufferedWriteSequencer>,
        thread_pool: Arc<ThreadPool>,
        options: DisplayOptions,
    ) -> Self {
        Iterm2Canvas {
            base: CanvasBase::new(write_sequencer),
            thread_pool,
            options,
        }
    }
}

impl TerminalCanvas for Iterm2Canvas {
    fn send(&mut self, x: i64, dy: i64, framebuffer: &Framebuffer, seq_type: SeqType, end_of_frame: Duration) {
        let cell_rows = self.cell_height_for_pixels(dy.min(0));
        let mut prefix = String::new();
        self.base
            .append_cursor_prefix(&mut prefix, x / self.options.cell_x_px as i64, dy, cell_rows);

        let width = framebuffer.width();
        let height = framebuffer.height();
        let pixels: Vec<u8> = framebuffer
            .as_slice()
            .iter()
            .flat_map(|p| [p.r, p.g, p.b, p.a])
            .collect();

        let pool = Arc::clone(&self.thread_pool);
        let encode = move || {
            let png_bytes = encode_png(width as u32, height as u32, &pixels).unwrap_or_default();
            let b64_len = Base64::encoded_len(&png_bytes);
            let mut b64 = vec![0u8; b64_len];
            let encoded = Base64::encode(&png_bytes, &mut b64).unwrap_or(&[]);

            let mut out = OutBuffer::new();
            out.append_str(&prefix);
            out.append_str(&format!(
                "\x1b]1337;File=size={};width={}px;height={}px;inline=1:",
                png_bytes.len(),
                width,
                height
            ));
            out.data.extend_from_slice(encoded);
            out.append_str("\x07\n");
            out
        };
        let handle = pool.exec_async(encode);
        self.base
            .write_sequencer
            .write_buffer(handle, seq_type, end_of_frame);
    }

    fn cell_height_for_pixels(&self, pixels: i64) -> i64 {
        assert!(pixels <= 0);
        -((-pixels + self.options.cell_y_px as i64 - 1) / self.options.cell_y_px as i64)
    }
}
