mod canvas;
mod clock;
mod error;
mod framebuffer;
mod iterm_canvas;
mod kitty_canvas;
mod options;
mod png_encode;
mod producer;
mod renderer;
mod resize_watcher;
mod sequencer;
mod sixel_canvas;
mod term_query;
mod threadpool;
mod unicode_canvas;

use std::io::{self, stdout, BufWriter, IsTerminal, Write};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use clap::Parser;

use canvas::TerminalCanvas;
use clock::Duration;
use error::{Result, TimgError};
use framebuffer::{Framebuffer, Rgba};
use iterm_canvas::Iterm2Canvas;
use kitty_canvas::KittyCanvas;
use options::{BgColorGetter, DisplayOptions, RotateMode};
use producer::{FrameCounter, GstProducer, Producer, ProducerMessage};
use renderer::{format_title, trim_title, MultiColumnRenderer, SingleColumnRenderer};
use resize_watcher::ResizeWatcher;
use sequencer::{BufferedWriteSequencer, OutBuffer, SeqType};
use sixel_canvas::SixelCanvas;
use term_query::GraphicsProtocol;
use unicode_canvas::UnicodeBlockCanvas;

/// Render images and animations directly in the terminal.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// File(s) or URL(s) to display. A bare `-` reads from stdin. Multiple
    /// sources are laid out with `--grid`, one per cell.
    #[arg(required = true)]
    sources: Vec<String>,

    /// Treat each source as a remote URL rather than a local path.
    #[arg(short = 'u', long)]
    url: bool,

    /// Output geometry as `WxH` in terminal cells; defaults to the full
    /// detected terminal size.
    #[arg(short = 'g', long)]
    geometry: Option<String>,

    /// Force xterm-256 color instead of 24-bit truecolor.
    #[arg(short = 'a', long = "256color")]
    ansi256: bool,

    /// Number of times to loop an animation; 0 means loop forever.
    #[arg(long, default_value_t = 0)]
    loops: u32,

    /// Arrange multiple inputs in a WxH grid of cells.
    #[arg(long)]
    grid: Option<String>,

    /// Background color behind transparent pixels (`#rrggbb`, a named
    /// color, `auto` to query the terminal's actual background, or `none`
    /// for no compositing).
    #[arg(short = 'b', long, default_value = "none")]
    bgcolor: String,

    /// Second checkerboard color; only used together with `--bgcolor`.
    #[arg(long)]
    bg_pattern_color: Option<String>,

    /// Scroll the image instead of displaying it once; optional delay in
    /// milliseconds between steps (default 50).
    #[arg(long, num_args = 0..=1, default_missing_value = "50")]
    scroll: Option<u64>,

    /// Scroll direction as `dx:dy` pixels per step; only used with
    /// `--scroll`.
    #[arg(long, default_value = "1:0")]
    delta_move: String,

    /// Disable animation-frame skipping: every frame is written even once
    /// playback has fallen more than 250ms behind schedule.
    #[arg(long)]
    no_frame_skip: bool,

    /// EXIF-orient the image before display.
    #[arg(long, default_value = "exif")]
    rotate: String,

    /// Center the image horizontally in the terminal.
    #[arg(long)]
    center: bool,

    /// Allow upscaling images smaller than the target geometry.
    #[arg(long)]
    upscale: bool,

    /// Scale to the full terminal width even if that crops height.
    #[arg(long)]
    fit_width: bool,

    /// Title format string; supports %f %b %w %h %D tokens.
    #[arg(long)]
    title: Option<String>,

    /// Seconds to wait for the decoder pipeline to report capabilities.
    #[arg(short = 't', long, default_value_t = 5)]
    timeout: u64,

    /// Force quarter-block glyphs instead of half-block glyphs.
    #[arg(long)]
    quarter_blocks: bool,

    /// Use the upper half-block glyph instead of the lower one.
    #[arg(long)]
    upper_block: bool,

    /// Force the Kitty graphics protocol instead of auto-detecting.
    #[arg(long)]
    kitty: bool,

    /// Force the iTerm2/WezTerm inline-image protocol.
    #[arg(long)]
    iterm2: bool,

    /// Force the sixel protocol.
    #[arg(long)]
    sixel: bool,
}

struct HideCursor<W: Write> {
    out: W,
}

impl<W: Write> HideCursor<W> {
    fn new(mut out: W) -> io::Result<Self> {
        write!(out, "\x1b[?25l")?;
        out.flush()?;
        Ok(HideCursor { out })
    }

    fn show(&mut self) {
        let _ = write!(self.out, "\x1b[?25h");
        let _ = self.out.flush();
    }
}

impl<W: Write> Drop for HideCursor<W> {
    fn drop(&mut self) {
        self.show();
    }
}

impl<W: Write> Deref for HideCursor<W> {
    type Target = W;
    fn deref(&self) -> &W {
        &self.out
    }
}

impl<W: Write> DerefMut for HideCursor<W> {
    fn deref_mut(&mut self) -> &mut W {
        &mut self.out
    }
}

fn print_dropped_frames(counter: &FrameCounter) {
    log::info!("{counter}");
}

fn parse_geometry(spec: &str) -> Result<(usize, usize)> {
    let (w, h) = spec
        .split_once('x')
        .ok_or_else(|| TimgError::Parameter(format!("invalid geometry '{spec}', expected WxH")))?;
    let w: usize = w
        .parse()
        .map_err(|_| TimgError::Parameter(format!("invalid width in '{spec}'")))?;
    let h: usize = h
        .parse()
        .map_err(|_| TimgError::Parameter(format!("invalid height in '{spec}'")))?;
    Ok((w, h))
}

fn parse_delta_move(spec: &str) -> Result<(i64, i64)> {
    let (dx, dy) = spec
        .split_once(':')
        .ok_or_else(|| TimgError::Parameter(format!("invalid delta-move '{spec}', expected dx:dy")))?;
    let dx: i64 = dx
        .parse()
        .map_err(|_| TimgError::Parameter(format!("invalid dx in '{spec}'")))?;
    let dy: i64 = dy
        .parse()
        .map_err(|_| TimgError::Parameter(format!("invalid dy in '{spec}'")))?;
    Ok((dx, dy))
}

fn rgba_slice_to_framebuffer(data: &[u8], width: usize, height: usize) -> Framebuffer {
    let mut fb = Framebuffer::new(width, height);
    let pixels = fb.as_mut_slice();
    for (i, px) in pixels.iter_mut().enumerate() {
        let base = i * 4;
        if base + 3 < data.len() {
            *px = Rgba::new(data[base], data[base + 1], data[base + 2], data[base + 3]);
        }
    }
    fb
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn emit_control_text(
    write_sequencer: &Arc<BufferedWriteSequencer>,
    thread_pool: &Arc<threadpool::ThreadPool>,
    text: String,
) {
    let pool = Arc::clone(thread_pool);
    let handle = pool.exec_async(move || OutBuffer::from_vec(text.into_bytes()));
    write_sequencer.write_buffer(handle, SeqType::ControlWrite, Duration::ZERO);
}

/// Plays `source` through a GStreamer pipeline scaled to `width_cells`
/// terminal columns, dispatching each decoded frame to `render_frame`. Set
/// `animate` to keep consuming frames until the stream ends or is
/// interrupted; when false, returns after the first frame (used for grid
/// cells, which show a single still per source rather than live video).
#[allow(clippy::too_many_arguments)]
fn play_source(
    args: &Args,
    source: &str,
    width_cells: usize,
    cell_x_px: usize,
    interrupted: &Arc<AtomicBool>,
    write_sequencer: &Arc<BufferedWriteSequencer>,
    thread_pool: &Arc<threadpool::ThreadPool>,
    canvas: &mut dyn TerminalCanvas,
    animate: bool,
    title_template: Option<&str>,
    mut render_frame: impl FnMut(&mut dyn TerminalCanvas, &Framebuffer, i64, SeqType, Duration),
) -> Result<()> {
    let pipeline = format!(
        "playbin uri=\"{}\" video-sink=\"videoconvert ! videoscale ! capsfilter name=caps caps=video/x-raw,width={out_w},pixel-aspect-ratio=1/1 ! appsink name=app_sink caps=video/x-raw,format=RGBA\"",
        if args.url {
            source.to_string()
        } else {
            format!("file://{source}")
        },
        out_w = width_cells * cell_x_px,
    );

    let mut gst_producer = GstProducer::new(&pipeline, StdDuration::from_secs(args.timeout))
        .map_err(|e| TimgError::Decode(e.to_string()))?;
    let wait = gst_producer.subscribe();
    let counter = gst_producer.counter();

    let (mut width, mut height) = (0usize, 0usize);
    let mut seq_type = SeqType::StartOfAnimation;
    let mut title_emitted = false;

    while !interrupted.load(Ordering::Relaxed) {
        match wait.recv_timeout(StdDuration::from_secs(3)) {
            Ok(ProducerMessage::Initialize { width: w, height: h }) => {
                width = w as usize;
                height = h as usize;
                seq_type = SeqType::StartOfAnimation;
                if let (Some(template), false) = (title_template, title_emitted) {
                    let title = format_title(template, source, basename(source), width, height, 0.0);
                    let title = trim_title(&title, width_cells);
                    emit_control_text(write_sequencer, thread_pool, format!("{title}\n\r"));
                    title_emitted = true;
                }
            }
            Ok(ProducerMessage::FrameReady) => {
                if width == 0 || height == 0 {
                    continue;
                }
                let frame_bytes = match gst_producer.frame() {
                    Some(guard) => guard.clone(),
                    None => continue,
                };
                if frame_bytes.is_empty() {
                    continue;
                }
                let fb = rgba_slice_to_framebuffer(&frame_bytes, width, height);
                render_frame(canvas, &fb, height as i64, seq_type, Duration::millis(33));
                seq_type = SeqType::AnimationFrame;
                if !animate {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    print_dropped_frames(&counter);
    let _ = &mut gst_producer;
    Ok(())
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Scrolls `img` by `(dx, dy)` pixels per step, wrapping at the image edges,
/// for `loop_count` full cycles (or until interrupted). The number of steps
/// per cycle is the least common multiple of how many steps each axis needs
/// to return to its starting alignment, so a diagonal scroll still tiles
/// cleanly.
#[allow(clippy::too_many_arguments)]
fn scroll_image(
    img: &Framebuffer,
    display_w: usize,
    display_h: usize,
    dx: i64,
    dy: i64,
    scroll_delay: Duration,
    loop_count: u32,
    interrupted: &Arc<AtomicBool>,
    canvas: &mut dyn TerminalCanvas,
    renderer: &mut SingleColumnRenderer,
) {
    let img_width = img.width() as i64;
    let img_height = img.height() as i64;
    let display_w = display_w.min(img.width());
    let display_h = display_h.min(img.height());
    if img_width == 0 || img_height == 0 || display_w == 0 || display_h == 0 {
        return;
    }

    let x_steps = if dx == 0 {
        1
    } else if img_width % dx.abs() == 0 {
        img_width / dx.abs()
    } else {
        img_width
    };
    let y_steps = if dy == 0 {
        1
    } else if img_height % dy.abs() == 0 {
        img_height / dy.abs()
    } else {
        img_height
    };
    let cycle_steps = x_steps * y_steps / gcd(x_steps, y_steps);

    let x_init = if dx < 0 {
        img_width - display_w as i64 - dx * cycle_steps
    } else {
        0
    };
    let y_init = if dy < 0 {
        img_height - display_h as i64 - dy * cycle_steps
    } else {
        0
    };

    let mut display_fb = Framebuffer::new(display_w, display_h);
    let mut time_from_first_frame = Duration::ZERO;
    let mut seq_type = SeqType::StartOfAnimation;

    'cycles: for _ in 0..loop_count {
        for cycle_pos in 0..=cycle_steps {
            if interrupted.load(Ordering::Relaxed) {
                break 'cycles;
            }
            let x_cycle_pos = dx * cycle_pos;
            let y_cycle_pos = dy * cycle_pos;
            for y in 0..display_h {
                for x in 0..display_w {
                    let x_src = (x_init + x_cycle_pos + x as i64).rem_euclid(img_width) as usize;
                    let y_src = (y_init + y_cycle_pos + y as i64).rem_euclid(img_height) as usize;
                    display_fb.set_pixel(x, y, img.at(x_src, y_src));
                }
            }
            time_from_first_frame = time_from_first_frame + scroll_delay;
            renderer.render(canvas, &display_fb, display_h as i64, seq_type, time_from_first_frame);
            seq_type = SeqType::AnimationFrame;
        }
    }
}

fn build_canvas(
    protocol: GraphicsProtocol,
    force_sixel: bool,
    write_sequencer: Arc<BufferedWriteSequencer>,
    thread_pool: Arc<threadpool::ThreadPool>,
    display_options: DisplayOptions,
) -> Box<dyn TerminalCanvas> {
    if force_sixel {
        return Box::new(SixelCanvas::new(write_sequencer, thread_pool, false, display_options));
    }
    match protocol {
        GraphicsProtocol::Kitty => Box::new(KittyCanvas::new(write_sequencer, thread_pool, display_options)),
        GraphicsProtocol::Iterm2 => Box::new(Iterm2Canvas::new(write_sequencer, thread_pool, display_options)),
        GraphicsProtocol::None => {
            Box::new(UnicodeBlockCanvas::new(write_sequencer, thread_pool, display_options))
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if args.geometry.is_none() && !io::stdout().is_terminal() {
        return Err(TimgError::NotATerminal);
    }

    let term_size = term_query::determine_term_size();
    let (cell_x_px, cell_y_px) = term_size
        .map(|s| (s.cell_x_px, s.cell_y_px))
        .unwrap_or((8, 16));
    let term_cols = term_size.map(|s| s.cols).unwrap_or(80);

    let (out_cols, _out_rows) = match &args.geometry {
        Some(spec) => parse_geometry(spec)?,
        None => (term_cols, term_size.map(|s| s.rows).unwrap_or(24)),
    };

    let (scroll_dx, scroll_dy) = parse_delta_move(&args.delta_move)?;

    // `bgcolor_getter` is only ever invoked from inside
    // `Framebuffer::alpha_compose_background`, and only once a sub-opaque
    // pixel is actually found, so the `auto` case's terminal probe never
    // runs for fully-opaque images.
    let bgcolor_getter: Option<BgColorGetter> = if args.bgcolor.eq_ignore_ascii_case("auto") {
        Some(Arc::new(|| {
            term_query::query_background_color().unwrap_or(Rgba::new(0, 0, 0, 255))
        }))
    } else {
        framebuffer::parse_color(&args.bgcolor).map(|color| {
            let getter: BgColorGetter = Arc::new(move || color);
            getter
        })
    };

    let mut display_options = DisplayOptions {
        cell_x_px,
        cell_y_px,
        bgcolor_getter,
        bg_pattern_color: args
            .bg_pattern_color
            .as_deref()
            .and_then(framebuffer::parse_color),
        use_quarter_blocks: args.quarter_blocks,
        use_upper_half_block: args.upper_block,
        use_256_color: args.ansi256,
        rotate: if args.rotate == "off" {
            RotateMode::Off
        } else {
            RotateMode::Exif
        },
        center_horizontally: args.center,
        allow_upscale: args.upscale,
        fit_width: args.fit_width,
        allow_frame_skip: !args.no_frame_skip,
        scroll_animation: args.scroll.is_some(),
        scroll_dx,
        scroll_dy,
        scroll_delay: Duration::millis(args.scroll.unwrap_or(50)),
        ..DisplayOptions::default()
    };
    if args.kitty {
        display_options.use_256_color = false;
    }

    let protocol = if args.kitty {
        GraphicsProtocol::Kitty
    } else if args.iterm2 {
        GraphicsProtocol::Iterm2
    } else if args.sixel {
        GraphicsProtocol::None // handled by force_sixel below
    } else {
        term_query::query_supported_graphics_protocol()
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .map_err(|e| TimgError::Parameter(format!("failed to install signal handler: {e}")))?;
    }

    let thread_pool = Arc::new(threadpool::ThreadPool::default_sized());
    let stdout_writer = BufWriter::new(stdout());
    let write_sequencer = Arc::new(BufferedWriteSequencer::new(
        stdout_writer,
        Arc::clone(&interrupted),
        display_options.allow_frame_skip,
    ));

    let mut canvas = build_canvas(
        protocol,
        args.sixel,
        Arc::clone(&write_sequencer),
        Arc::clone(&thread_pool),
        display_options.clone(),
    );

    let mut hide_cursor = HideCursor::new(io::stderr())?;
    let mut watcher = resize_watcher::default_watcher().ok();

    let grid_columns_arg = match &args.grid {
        Some(spec) => Some(parse_geometry(spec)?.0),
        None => None,
    };
    let is_grid = grid_columns_arg.is_some() || args.sources.len() > 1;

    if is_grid {
        let columns = grid_columns_arg
            .unwrap_or_else(|| ((args.sources.len() as f64).sqrt().ceil() as usize).max(1))
            .max(1);
        let cell_cols = (out_cols / columns).max(1);
        let mut grid_renderer = MultiColumnRenderer::new(columns, cell_cols * cell_x_px);

        for source in &args.sources {
            if interrupted.load(Ordering::Relaxed) {
                break;
            }
            grid_renderer.start_cell();
            play_source(
                args,
                source,
                cell_cols,
                cell_x_px,
                &interrupted,
                &write_sequencer,
                &thread_pool,
                canvas.as_mut(),
                false,
                None, // title prefixing needs canvas-level support (AddPrefixNextSend
                      // equivalent) to stay column-accurate across grid cells; only
                      // wired up for the single-source path below.
                |c, fb, h, st, eof| grid_renderer.render(c, fb, h, st, eof),
            )?;
        }
    } else {
        let source = &args.sources[0];
        let mut renderer = SingleColumnRenderer::new();
        let loop_count = if args.loops == 0 { u32::MAX } else { args.loops };

        if display_options.scroll_animation {
            let mut captured: Option<Framebuffer> = None;
            play_source(
                args,
                source,
                out_cols,
                cell_x_px,
                &interrupted,
                &write_sequencer,
                &thread_pool,
                canvas.as_mut(),
                false,
                args.title.as_deref(),
                |_c, fb, _h, _st, _eof| captured = Some(fb.clone()),
            )?;
            if let Some(img) = captured {
                scroll_image(
                    &img,
                    out_cols * cell_x_px,
                    img.height(),
                    display_options.scroll_dx,
                    display_options.scroll_dy,
                    display_options.scroll_delay,
                    loop_count,
                    &interrupted,
                    canvas.as_mut(),
                    &mut renderer,
                );
            }
        } else {
            for _ in 0..loop_count {
                if interrupted.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(w) = watcher.as_mut() {
                    if w.resized() {
                        log::info!("terminal resized, continuing with original geometry");
                    }
                }
                play_source(
                    args,
                    source,
                    out_cols,
                    cell_x_px,
                    &interrupted,
                    &write_sequencer,
                    &thread_pool,
                    canvas.as_mut(),
                    true,
                    args.title.as_deref(),
                    |c, fb, h, st, eof| renderer.render(c, fb, h, st, eof),
                )?;
            }
        }
    }

    write_sequencer.flush();
    hide_cursor.show();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    gstreamer::init().expect("failed to initialize gstreamer");

    let args = Args::parse();
    match run(&args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}
