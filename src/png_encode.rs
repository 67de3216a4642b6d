//! PNG encoding for the Kitty and iTerm2 canvases. Configured to match the
//! original project's libpng settings: SUB filtering only and a low
//! compression level, since these images are sent once and never stored —
//! encode speed matters more than output size.

use std::io::Cursor;

use png::{BitDepth, ColorType, Compression, Encoder, FilterType};

pub fn encode_png(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    {
        let mut encoder = Encoder::new(Cursor::new(&mut buf), width, height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_compression(Compression::Fast);
        encoder.set_filter(FilterType::Sub);
        let mut writer = encoder
            .write_header()
            .map_err(|e| format!("png header: {e}"))?;
        writer
            .write_image_data(rgba)
            .map_err(|e| format!("png data: {e}"))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_single_pixel() {
        let png = encode_png(1, 1, &[10, 20, 30, 255]).unwrap();
        assert_eq!(&png[0..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }
}
