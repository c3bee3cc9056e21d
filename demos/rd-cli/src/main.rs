//! `rd-cli` — wires a capture engine, optional scaler/converter, and a file
//! sink into one [`rd_core::Pipeline`] so the media graph can be exercised
//! end to end without a real network peer, the way the teacher's sender
//! binary drives its own pipeline straight into a transport sink during
//! manual testing.
//!
//! Exit codes: `0` on a clean stop (timer elapsed or Ctrl-C), `1` on setup
//! failure, matching spec.md §6's "Exit codes (example harnesses)".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rd_capture::{create_engine, CaptureSource, Technology as CaptureTechnology};
use rd_convert::PixelFormatConverter;
use rd_core::{CaptureConfig, ConverterConfig, Pipeline, PixelFormat, ScaleAlgorithm, ScalerConfig};
use rd_scale::VideoScaler;
use rd_sinks::{RawDumper, Y4mWriter};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Backend {
    Auto,
    X11,
    DesktopDuplication,
}

impl From<Backend> for CaptureTechnology {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Auto => CaptureTechnology::Auto,
            Backend::X11 => CaptureTechnology::X11,
            Backend::DesktopDuplication => CaptureTechnology::DesktopDuplication,
        }
    }
}

/// Capture the desktop, scale/convert it, and dump frames to a file.
#[derive(Parser, Debug)]
#[command(name = "rd-cli", version)]
struct Args {
    /// Capture backend to use.
    #[arg(long, value_enum, default_value = "auto")]
    backend: Backend,

    /// Capture frame rate in Hz.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Capture width in pixels (0 = full monitor).
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Capture height in pixels (0 = full monitor).
    #[arg(long, default_value_t = 0)]
    height: u32,

    /// Monitor index to capture (0-based).
    #[arg(long, default_value_t = 0)]
    monitor: usize,

    /// Scale output to this resolution, e.g. `1280x720`. Omit to skip scaling.
    #[arg(long, value_parser = parse_resolution)]
    scale: Option<(u32, u32)>,

    /// Let the scaler letterbox instead of stretching to the exact target.
    #[arg(long, default_value_t = true)]
    maintain_aspect_ratio: bool,

    /// Output file. A `.y4m` extension writes a Y4M container (forces I420);
    /// anything else dumps raw converted bytes frame-after-frame.
    #[arg(long, default_value = "capture.raw")]
    output: std::path::PathBuf,

    /// Pixel format to convert to before a non-Y4M sink. Ignored for `.y4m`
    /// outputs, which always convert to I420.
    #[arg(long, value_enum, default_value = "bgra32")]
    format: OutputFormat,

    /// Stop after this many seconds. 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 0)]
    duration: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Bgra32,
    Rgba32,
    Rgb24,
    Bgr24,
    I420,
}

impl From<OutputFormat> for PixelFormat {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Bgra32 => PixelFormat::Bgra32,
            OutputFormat::Rgba32 => PixelFormat::Rgba32,
            OutputFormat::Rgb24 => PixelFormat::Rgb24,
            OutputFormat::Bgr24 => PixelFormat::Bgr24,
            OutputFormat::I420 => PixelFormat::I420,
        }
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s.split_once('x').ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w: u32 = w.parse().map_err(|_| format!("invalid width in '{s}'"))?;
    let h: u32 = h.parse().map_err(|_| format!("invalid height in '{s}'"))?;
    Ok((w, h))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    match run(Args::parse()) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("rd-cli: {e:#}");
            std::process::exit(-1);
        }
    }
}

fn run(args: Args) -> Result<()> {
    let is_y4m = args.output.extension().map(|ext| ext == "y4m").unwrap_or(false);
    let sink_format = if is_y4m { PixelFormat::I420 } else { args.format.into() };

    let engine = create_engine(args.backend.into())
        .ok_or_else(|| anyhow!("capture backend {:?} is not compiled in on this platform", args.backend))?;

    let capture_config = CaptureConfig {
        frame_rate: args.fps,
        width: args.width,
        height: args.height,
        monitor_index: args.monitor,
        ..CaptureConfig::default()
    };
    engine.initialize(capture_config).context("capture engine initialize failed")?;

    let source = CaptureSource::new(engine.clone());

    let mut pipeline = Pipeline::new();
    pipeline.set_source(source.clone());

    if let Some((target_w, target_h)) = args.scale {
        let scaler = VideoScaler::new(ScalerConfig {
            target_width: target_w,
            target_height: target_h,
            algorithm: ScaleAlgorithm::Bilinear,
            maintain_aspect_ratio: args.maintain_aspect_ratio,
            enable_threading: false,
        });
        pipeline.add_processor(scaler);
    }

    let converter = PixelFormatConverter::new(ConverterConfig {
        input_format: PixelFormat::Unknown,
        output_format: sink_format,
        enable_threading: false,
    });
    pipeline.add_processor(converter);

    if is_y4m {
        let writer = Y4mWriter::new(&args.output);
        pipeline.set_sink(writer);
    } else {
        let dumper = RawDumper::new(&args.output);
        pipeline.set_sink(dumper);
    }

    if !pipeline.link_all() {
        return Err(anyhow!("failed to link pipeline: {}", pipeline.pipeline_info()));
    }
    info!("{}", pipeline.pipeline_info());

    if !pipeline.start() {
        pipeline.stop();
        return Err(anyhow!("failed to start pipeline (sink/processor refused to start)"));
    }

    engine.start().context("capture engine failed to start")?;
    info!("capturing to {} (Ctrl-C to stop)", args.output.display());

    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_handler = should_stop.clone();
    ctrlc::set_handler(move || should_stop_handler.store(true, Ordering::Relaxed))
        .context("failed to install Ctrl-C handler")?;

    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    while !should_stop.load(Ordering::Relaxed) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    info!("stopping");
    engine.stop();
    pipeline.stop();

    Ok(())
}
