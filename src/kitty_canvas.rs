//! Kitty terminal graphics protocol canvas: PNG-encodes the framebuffer and
//! streams it as base64 in 4096-byte chunks inside `\x1b_G...\x1b\\`
//! escapes, following the protocol's `m=1`/`m=0` continuation convention.

use std::sync::Arc;

use base64ct::{Base64, Encoding};

use crate::canvas::{CanvasBase, TerminalCanvas};
use crate::clock::Duration;
use crate::framebuffer::Framebuffer;
use crate::options::DisplayOptions;
use crate::png_encode::encode_png;
use crate::sequencer::{BufferedWriteSequencer, OutBuffer, SeqType};
use crate::threadpool::ThreadPool;

const CHUNK_SIZE: usize = 4096;

pub struct KittyCanvas {
    base: CanvasBase,
    thread_pool: Arc<ThreadPool>,
    options: DisplayOptions,
    image_id: u32,
}

impl KittyCanvas {
    pub fn new(
        write_sequencer: Arc<BufferedWriteSequencer>,
        thread_pool: Arc<ThreadPool>,
        options: DisplayOptions,
    ) -> Self {
        KittyCanvas {
            base: CanvasBase::new(write_sequencer),
            thread_pool,
            options,
            image_id: 1,
        }
    }
}

impl TerminalCanvas for KittyCanvas {
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
        let image_id = self.image_id;
        self.image_id = self.image_id.wrapping_add(1).max(1);

        let pool = Arc::clone(&self.thread_pool);
        let encode = move || {
            let png_bytes = encode_png(width as u32, height as u32, &pixels)
                .unwrap_or_default();
            let b64_len = Base64::encoded_len(&png_bytes);
            let mut b64 = vec![0u8; b64_len];
            let encoded = Base64::encode(&png_bytes, &mut b64).unwrap_or(&[]);
            let encoded_len = encoded.len();

            let mut out = OutBuffer::new();
            out.append_str(&prefix);
            let mut offset = 0;
            while offset < encoded_len {
                let end = (offset + CHUNK_SIZE).min(encoded_len);
                let more = if end < encoded_len { 1 } else { 0 };
                if offset == 0 {
                    out.append_str(&format!(
                        "\x1b_Ga=T,f=100,i={image_id},m={more};"
                    ));
                } else {
                    out.append_str(&format!("\x1b_Gm={more};"));
                }
                out.data
                    .extend_from_slice(&b64[offset..end]);
                out.append_str("\x1b\\");
                offset = end;
            }
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
