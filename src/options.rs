//! Display configuration shared by every canvas and the grid renderer,
//! mirroring the original project's `DisplayOptions` struct field-for-field.

use std::sync::Arc;

use crate::clock::Duration;
use crate::framebuffer::Rgba;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateMode {
    Exif,
    Off,
}

/// A callback retrieving the background color to composite transparent
/// pixels against. Deferred rather than a plain `Option<Rgba>` so that a
/// terminal-background probe (`term_query::query_background_color`) is only
/// ever invoked from inside `Framebuffer::alpha_compose_background`, and
/// only when a sub-opaque pixel actually needs it.
pub type BgColorGetter = Arc<dyn Fn() -> Rgba + Send + Sync>;

#[derive(Clone)]
pub struct DisplayOptions {
    /// Terminal cell width in pixels, as reported by `term_query`.
    pub cell_x_px: usize,
    /// Terminal cell height in pixels.
    pub cell_y_px: usize,
    /// Background used behind transparent pixels, `None` for "leave
    /// transparent" (sentinel parsed from the CLI's `"none"`).
    pub bgcolor_getter: Option<BgColorGetter>,
    /// Second checkerboard color; only meaningful if `bgcolor_getter` is
    /// also set.
    pub bg_pattern_color: Option<Rgba>,
    pub pattern_size: usize,
    pub use_quarter_blocks: bool,
    pub use_upper_half_block: bool,
    pub use_256_color: bool,
    pub rotate: RotateMode,
    pub center_horizontally: bool,
    pub allow_upscale: bool,
    pub fit_width: bool,
    pub local_alpha_handling: bool,
    /// Whether the write sequencer may drop a late `AnimationFrame` rather
    /// than writing it behind schedule.
    pub allow_frame_skip: bool,
    /// Scroll a static image horizontally/vertically instead of displaying
    /// it once.
    pub scroll_animation: bool,
    pub scroll_dx: i64,
    pub scroll_dy: i64,
    pub scroll_delay: Duration,
}

impl std::fmt::Debug for DisplayOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayOptions")
            .field("cell_x_px", &self.cell_x_px)
            .field("cell_y_px", &self.cell_y_px)
            .field("bgcolor_getter", &self.bgcolor_getter.is_some())
            .field("bg_pattern_color", &self.bg_pattern_color)
            .field("pattern_size", &self.pattern_size)
            .field("use_quarter_blocks", &self.use_quarter_blocks)
            .field("use_upper_half_block", &self.use_upper_half_block)
            .field("use_256_color", &self.use_256_color)
            .field("rotate", &self.rotate)
            .field("center_horizontally", &self.center_horizontally)
            .field("allow_upscale", &self.allow_upscale)
            .field("fit_width", &self.fit_width)
            .field("local_alpha_handling", &self.local_alpha_handling)
            .field("allow_frame_skip", &self.allow_frame_skip)
            .field("scroll_animation", &self.scroll_animation)
            .field("scroll_dx", &self.scroll_dx)
            .field("scroll_dy", &self.scroll_dy)
            .field("scroll_delay", &self.scroll_delay)
            .finish()
    }
}

impl Default for DisplayOptions {
    fn default() -> Self {
        DisplayOptions {
            cell_x_px: 8,
            cell_y_px: 16,
            bgcolor_getter: None,
            bg_pattern_color: None,
            pattern_size: 1,
            use_quarter_blocks: false,
            use_upper_half_block: false,
            use_256_color: false,
            rotate: RotateMode::Exif,
            center_horizontally: false,
            allow_upscale: false,
            fit_width: false,
            local_alpha_handling: true,
            allow_frame_skip: true,
            scroll_animation: false,
            scroll_dx: 1,
            scroll_dy: 0,
            scroll_delay: Duration::millis(50),
        }
    }
}
