//! livefps: live capture with rotation and FPS measurement

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use livefps::capture::session::{capture_one_async, close_async, open_async};
use livefps::capture::SyntheticSource;
use livefps::measure::{measure_batch_async, measure_window_async, CsvSink};
use livefps::pipeline::{Delivery, LatestFrame};
use livefps::{CameraService, Config, LiveCamera, MeasurementHarness, StopSignal};

#[derive(Debug, Parser)]
#[command(name = "livefps", version, about = "Live video capture and frame-rate measurement")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the built-in test-pattern source instead of a V4L2 device
    #[arg(long, global = true)]
    synthetic: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List capture devices
    Devices,
    /// Capture one frame and write its pixels to a file
    Snapshot {
        #[arg(long)]
        out: PathBuf,
    },
    /// Run a live session and log the rate
    Live {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// Measure one window and write its CSV
    Measure,
    /// Measure every configured combination and write a summary
    Batch,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livefps=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.synthetic && !config.capture.device.starts_with("synthetic") {
        config.capture.device = "synthetic".into();
    }
    livefps::CONFIG.store(Arc::new(config.clone()));

    match cli.command {
        Command::Devices => list_devices(),
        Command::Snapshot { out } => snapshot(&config, cli.synthetic, out).await,
        Command::Live { seconds } => live(&config, cli.synthetic, seconds).await,
        Command::Measure => {
            let harness = MeasurementHarness::new(camera(cli.synthetic));
            let capture = config.capture.to_configuration()?;
            let sink = CsvSink::new(&config.measure.output_dir);
            let (_, sink, report) =
                measure_window_async(harness, capture, config.measure.window(), sink).await?;
            match report.summary {
                Some(s) => info!(
                    samples = s.count,
                    avg = s.avg,
                    p50 = s.p50,
                    p90 = s.p90,
                    p99 = s.p99,
                    dir = %sink.dir().display(),
                    "Measurement complete"
                ),
                None => warn!("No rate samples collected"),
            }
            Ok(())
        }
        Command::Batch => {
            let harness = MeasurementHarness::new(camera(cli.synthetic));
            let base = config.capture.to_configuration()?;
            let sink = CsvSink::new(&config.measure.output_dir);
            let (_, _, report) = measure_batch_async(
                harness,
                config.measure.grid(),
                base,
                config.measure.window(),
                sink,
            )
            .await?;
            for skip in &report.skipped {
                warn!(
                    "Skipped {} rot{} @ {} fps: {}",
                    skip.pixel_format, skip.angle, skip.target_fps, skip.reason
                );
            }
            info!(measured = report.rows.len(), skipped = report.skipped.len(), "Batch done");
            Ok(())
        }
    }
}

#[cfg(feature = "v4l2")]
fn camera(synthetic: bool) -> LiveCamera {
    if synthetic {
        LiveCamera::new(SyntheticSource::new())
    } else {
        LiveCamera::new(livefps::capture::V4l2Source::default())
    }
}

#[cfg(not(feature = "v4l2"))]
fn camera(_synthetic: bool) -> LiveCamera {
    LiveCamera::new(SyntheticSource::new())
}

#[cfg(feature = "v4l2")]
fn list_devices() -> Result<()> {
    let devices = livefps::utils::list_devices();
    if devices.is_empty() {
        warn!("No capture devices found");
    }
    for dev in devices {
        let formats: Vec<String> = dev.formats.iter().map(|f| f.to_string()).collect();
        let preferred = dev
            .preferred_format()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{}\t{}\t[{}]\tpreferred {}", dev.path, dev.card, formats.join(","), preferred);
    }
    Ok(())
}

#[cfg(not(feature = "v4l2"))]
fn list_devices() -> Result<()> {
    println!("synthetic\tbuilt-in test pattern");
    Ok(())
}

async fn snapshot(config: &Config, synthetic: bool, out: PathBuf) -> Result<()> {
    let capture = config.capture.to_configuration()?;
    let camera = camera(synthetic);
    let session = camera.session();

    open_async(session.clone(), capture.device_id().to_string()).await?;
    let frame = capture_one_async(session.clone(), capture).await?;
    close_async(session).await?;

    tokio::fs::write(&out, &frame.data).await?;
    info!(
        "Wrote {}x{} {} frame ({} bytes) to {}",
        frame.width(),
        frame.height(),
        frame.format(),
        frame.data.len(),
        out.display()
    );
    Ok(())
}

async fn live(config: &Config, synthetic: bool, seconds: u64) -> Result<()> {
    let capture = config.capture.to_configuration()?;
    let mut camera = camera(synthetic);
    open_async(camera.session(), capture.device_id().to_string()).await?;

    let rates = camera.subscribe_rate();
    let frames = camera.subscribe_frames(config.pipeline.frame_channel_capacity, Delivery::DropNewest);
    let signal = StopSignal::new();
    camera.start_live(capture, signal.clone())?;
    info!("Live session running for {}s, Ctrl-C to stop", seconds);

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut received = 0u64;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            update = rates.recv_async() => match update {
                Ok(update) => info!(fps = update.fps, frames = received, "Rate"),
                Err(_) => break,
            },
            frame = frames.recv_async() => {
                if frame.is_ok() {
                    received += 1;
                }
            }
        }
    }

    // The live buffer is cleared by stop
    let mut latest = LatestFrame::default();
    if camera.try_get_latest_frame(&mut latest) {
        info!("Last frame #{} {}x{}", latest.sequence, latest.width, latest.height);
    }

    signal.cancel();
    let clean = tokio::task::block_in_place(|| camera.stop_live());
    if !clean {
        warn!("Capture worker did not stop in time");
    }
    let stats = camera.live_stats();
    info!(
        published = stats.frames_published,
        read_failures = stats.read_failures,
        dropped = stats.notifications_dropped,
        "Live session finished"
    );
    tokio::task::block_in_place(|| camera.close());
    Ok(())
}
