//! Timed measurement windows and configuration grids

use std::time::{Duration, Instant};

use chrono::Local;
use flume::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::camera::CameraService;
use crate::capture::config::CaptureConfiguration;
use crate::error::Result;
use crate::measure::report::{OutputSink, RunReport, Sample, SummaryRow};
use crate::pipeline::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureWindow {
    /// Rate updates before this point are discarded
    pub warmup: Duration,
    /// Length of the collected interval after warm-up
    pub measure: Duration,
}

impl MeasureWindow {
    pub fn from_secs(warmup: f64, measure: f64) -> Self {
        Self {
            warmup: Duration::from_secs_f64(warmup.max(0.0)),
            measure: Duration::from_secs_f64(measure.max(0.0)),
        }
    }
}

/// Axes of a batch; every combination is measured once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGrid {
    pub pixel_formats: Vec<String>,
    pub angles: Vec<u32>,
    pub target_fps: Vec<f64>,
}

impl BatchGrid {
    pub fn len(&self) -> usize {
        self.pixel_formats.len() * self.angles.len() * self.target_fps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A grid cell that never produced a run
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRun {
    pub pixel_format: String,
    pub angle: u32,
    pub target_fps: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub rows: Vec<SummaryRow>,
    pub skipped: Vec<SkippedRun>,
}

pub struct MeasurementHarness<C> {
    camera: C,
}

impl<C: CameraService> MeasurementHarness<C> {
    pub fn new(camera: C) -> Self {
        Self { camera }
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn into_camera(self) -> C {
        self.camera
    }

    /// Run one live session on the configured device (reopening the camera
    /// if it holds another one), keep the rate updates that land after
    /// warm-up, and hand the run to `sink`. Returns the report and the name
    /// the sink stored it under.
    #[instrument(skip_all, fields(format = config.pixel_format(), rotate = config.rotate().degrees(), fps = config.target_fps()))]
    pub fn measure_window(
        &mut self,
        config: &CaptureConfiguration,
        window: MeasureWindow,
        sink: &mut dyn OutputSink,
    ) -> Result<(RunReport, String)> {
        match self.camera.device_id() {
            Some(current) if current == config.device_id() => {}
            current => {
                if let Some(previous) = current {
                    info!(from = %previous, to = config.device_id(), "Switching capture device");
                }
                self.camera.open(config.device_id())?;
            }
        }

        let rates = self.camera.subscribe_rate();
        let started_at = Local::now();
        self.camera.start_live(config.clone(), StopSignal::new())?;

        let t0 = Instant::now();
        let collect_from = t0 + window.warmup;
        let end = collect_from + window.measure;
        let mut samples = Vec::new();

        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            match rates.recv_timeout(end - now) {
                Ok(update) if update.instant >= collect_from && update.instant <= end => {
                    samples.push(Sample {
                        at: update.at,
                        fps: update.fps,
                    });
                }
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if !self.camera.stop_live() {
            warn!("Measurement session did not stop cleanly");
        }
        drop(rates);

        let report = RunReport::new(config.clone(), started_at, samples);
        if let Some(s) = &report.summary {
            info!(samples = s.count, avg = s.avg, p50 = s.p50, p99 = s.p99, "Window measured");
        } else {
            warn!("Window produced no rate samples");
        }
        let name = sink.write_run(&report)?;
        Ok((report, name))
    }

    /// Measure every cell of `grid` one after another, deriving each cell's
    /// configuration from `base`. A cell that fails is recorded as skipped
    /// and the batch moves on.
    pub fn measure_batch(
        &mut self,
        grid: &BatchGrid,
        base: &CaptureConfiguration,
        window: MeasureWindow,
        sink: &mut dyn OutputSink,
    ) -> Result<BatchReport> {
        let started_at = Local::now();
        let mut report = BatchReport::default();
        info!(cells = grid.len(), "Starting batch measurement");

        for pixel_format in &grid.pixel_formats {
            for &angle in &grid.angles {
                for &target_fps in &grid.target_fps {
                    let outcome = base
                        .to_builder()
                        .pixel_format(pixel_format.as_str())
                        .rotate_degrees(angle)
                        .target_fps(target_fps)
                        .build()
                        .and_then(|config| self.measure_window(&config, window, sink));

                    match outcome {
                        Ok((run, name)) => report.rows.push(SummaryRow::from_report(&run, name)),
                        Err(e) => {
                            warn!(
                                format = %pixel_format,
                                angle,
                                target_fps,
                                error = %e,
                                "Skipping configuration"
                            );
                            report.skipped.push(SkippedRun {
                                pixel_format: pixel_format.clone(),
                                angle,
                                target_fps,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        sink.write_summary(&report.rows, started_at)?;
        info!(
            measured = report.rows.len(),
            skipped = report.skipped.len(),
            "Batch finished"
        );
        Ok(report)
    }
}

/// [`MeasurementHarness::measure_batch`] on the blocking pool. The harness
/// and sink come back with the report so the caller can keep using them.
pub async fn measure_batch_async<C, S>(
    mut harness: MeasurementHarness<C>,
    grid: BatchGrid,
    base: CaptureConfiguration,
    window: MeasureWindow,
    mut sink: S,
) -> Result<(MeasurementHarness<C>, S, BatchReport)>
where
    C: CameraService + 'static,
    S: OutputSink + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<_> {
        let report = harness.measure_batch(&grid, &base, window, &mut sink)?;
        Ok((harness, sink, report))
    })
    .await?
}

/// Single window on the blocking pool
pub async fn measure_window_async<C, S>(
    mut harness: MeasurementHarness<C>,
    config: CaptureConfiguration,
    window: MeasureWindow,
    mut sink: S,
) -> Result<(MeasurementHarness<C>, S, RunReport)>
where
    C: CameraService + 'static,
    S: OutputSink + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<_> {
        let (report, _) = harness.measure_window(&config, window, &mut sink)?;
        Ok((harness, sink, report))
    })
    .await?
}
