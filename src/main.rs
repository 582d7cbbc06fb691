//! HDR Video Player - Main Entry Point
//!
//! Decodes a video file and presents it through the buffer pipeline, either
//! on the GPU (wgpu) or headless from CPU memory.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use hdr_video_player::gpu::{
    BufferAllocator, GpuContext, HeadlessSurface, MemoryAllocator, PresentationSurface, WgpuAllocator, WgpuPresenter,
};
use hdr_video_player::settings::{Backend, PlayerConfig};
use hdr_video_player::telemetry::{init_logging, FrameProfiler, LogConfig};
use hdr_video_player::video::{
    Allocation, CoordinatorOptions, FfmpegSource, LoggingHdrSink, MediaSource, OverlayStream, PresentationCoordinator,
    TickOutcome,
};

/// Parsed command line
#[derive(Debug, Default)]
struct CliArgs {
    fullscreen: bool,
    subtitle: bool,
    config: Option<PathBuf>,
    backend: Option<Backend>,
    video: Option<PathBuf>,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-f" | "--fullscreen" => cli.fullscreen = true,
            "-s" | "--subtitle" => cli.subtitle = true,
            "-h" | "--help" => cli.help = true,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                cli.config = Some(PathBuf::from(path));
            }
            "--backend" => {
                let name = iter.next().context("--backend needs a name")?;
                cli.backend = Some(Backend::parse(name).with_context(|| format!("unknown backend '{}'", name))?);
            }
            other if other.starts_with('-') => bail!("unknown option '{}'", other),
            other => {
                if cli.video.is_some() {
                    bail!("only one video file can be played");
                }
                cli.video = Some(PathBuf::from(other));
            }
        }
    }
    Ok(cli)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options] <video_file>", program);
    eprintln!();
    eprintln!("  -f, --fullscreen      Run in fullscreen");
    eprintln!("  -s, --subtitle        Show subtitle overlay");
    eprintln!("      --config <path>   Read settings from this XML file");
    eprintln!("      --backend <name>  wgpu (default) or memory");
    eprintln!("  -h, --help            Show this help");
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("hdr-video-player");

    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(program);
            std::process::exit(1);
        }
    };
    if cli.help {
        print_usage(program);
        return Ok(());
    }
    let Some(video_path) = cli.video.clone() else {
        print_usage(program);
        std::process::exit(1);
    };

    let mut config = PlayerConfig::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;
    config.fullscreen |= cli.fullscreen;
    config.overlay |= cli.subtitle;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let log_config = LogConfig {
        file_enabled: config.log_file.is_some(),
        file_path: config.log_file.clone(),
        ..LogConfig::with_level(config.log_level.clone())
    };

    // Keep the guard alive for the program duration
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    tracing::info!("HDR Video Player v{}", env!("CARGO_PKG_VERSION"));

    if !video_path.exists() {
        bail!("File not found: {}", video_path.display());
    }

    let source =
        FfmpegSource::open(&video_path).with_context(|| format!("Failed to open {}", video_path.display()))?;

    match config.backend {
        Backend::Wgpu => {
            let context = Arc::new(pollster::block_on(GpuContext::new_headless())?);
            let allocator = WgpuAllocator::new(Arc::clone(&context));
            play(
                source,
                allocator,
                WgpuPresenter::new(Arc::clone(&context)),
                WgpuPresenter::new(Arc::clone(&context)),
                &config,
                true,
                |wait| context.poll(wait),
            )
        }
        Backend::Memory => play(
            source,
            MemoryAllocator::new(),
            HeadlessSurface::default(),
            HeadlessSurface::default(),
            &config,
            false,
            |_| {},
        ),
    }
}

/// Run the stream to its end
///
/// `poll` runs display completion callbacks; with `true` it blocks until the
/// display has caught up. With `realtime`, frames are paced to the stream
/// frame rate.
fn play<A, P>(
    source: FfmpegSource,
    allocator: A,
    video_surface: P,
    overlay_surface: P,
    config: &PlayerConfig,
    realtime: bool,
    mut poll: impl FnMut(bool),
) -> anyhow::Result<()>
where
    A: BufferAllocator + Clone,
    P: PresentationSurface<A::Buffer>,
{
    let info = source.stream_info().clone();
    let frame_interval = (info.frame_rate > 0.0).then(|| Duration::from_secs_f64(1.0 / info.frame_rate));

    let options = CoordinatorOptions {
        buffer_count: config.buffer_count,
        backpressure: config.backpressure,
    };
    let mut coordinator = PresentationCoordinator::open(
        source,
        allocator.clone(),
        video_surface,
        LoggingHdrSink::default(),
        options,
    )?;

    // Fullscreen covers the display, which is taken to match the video
    let window = if config.fullscreen {
        Allocation {
            x: 0,
            y: 0,
            width: info.width,
            height: info.height,
        }
    } else {
        Allocation {
            x: 0,
            y: 0,
            width: config.window_width,
            height: config.window_height,
        }
    };

    let mut overlay = if config.overlay {
        let mut overlay = OverlayStream::new(allocator, overlay_surface, config.overlay_color);
        overlay.resize(window)?;
        Some(overlay)
    } else {
        None
    };

    let mut profiler = FrameProfiler::new();
    let mut next_deadline = Instant::now();

    loop {
        poll(false);
        match coordinator.tick()? {
            TickOutcome::Presented(_) => {
                profiler.begin_frame();
                if let Some(overlay) = overlay.as_mut() {
                    overlay.redraw();
                }
                if let (true, Some(interval)) = (realtime, frame_interval) {
                    next_deadline += interval;
                    let now = Instant::now();
                    if next_deadline > now {
                        std::thread::sleep(next_deadline - now);
                    } else {
                        next_deadline = now;
                    }
                }
            }
            TickOutcome::Deferred => poll(true),
            TickOutcome::Dropped => {}
            TickOutcome::EndOfStream => break,
        }
    }

    poll(true);
    coordinator.process_releases();
    coordinator.stats().log_summary();
    profiler.log_summary();

    let pump = coordinator.pump_stats();
    tracing::info!(
        packets = pump.packets_read,
        filtered = pump.packets_filtered,
        decode_errors = pump.decode_errors,
        "Decoder statistics"
    );

    if let Some(overlay) = overlay.as_mut() {
        overlay.close();
    }
    coordinator.close();
    Ok(())
}
