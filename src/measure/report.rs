//! Per-run and batch-summary CSV output

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::capture::config::CaptureConfiguration;
use crate::error::Result;
use crate::measure::stats::Summary;

pub const RUN_HEADER: &str =
    "Timestamp,FPS,Width,Height,PixelFormat,ConvertRgb,RotateAngle,FlipH,FlipV,TargetFps";
pub const SUMMARY_HEADER: &str =
    "PixelFormat,Angle,TargetFps,Width,Height,Samples,Avg,P50,P90,P99,Min,Max,SrcCsv";

const ROW_TIME: &str = "%Y-%m-%d %H:%M:%S%.3f";
const FILE_TIME: &str = "%Y%m%d_%H%M%S";

/// One closed FPS window inside the measured interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: DateTime<Local>,
    pub fps: f64,
}

/// Result of one measurement window
#[derive(Debug, Clone)]
pub struct RunReport {
    pub config: CaptureConfiguration,
    pub started_at: DateTime<Local>,
    pub samples: Vec<Sample>,
    pub summary: Option<Summary>,
}

impl RunReport {
    pub fn new(config: CaptureConfiguration, started_at: DateTime<Local>, samples: Vec<Sample>) -> Self {
        let fps: Vec<f64> = samples.iter().map(|s| s.fps).collect();
        Self {
            summary: Summary::from_samples(&fps),
            config,
            started_at,
            samples,
        }
    }
}

/// One line of the batch summary
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub pixel_format: String,
    pub angle: u32,
    pub target_fps: f64,
    pub width: u32,
    pub height: u32,
    pub summary: Option<Summary>,
    pub src_csv: String,
}

impl SummaryRow {
    pub fn from_report(report: &RunReport, src_csv: String) -> Self {
        Self {
            pixel_format: report.config.pixel_format().to_string(),
            angle: report.config.rotate().degrees(),
            target_fps: report.config.target_fps(),
            width: report.config.width(),
            height: report.config.height(),
            summary: report.summary,
            src_csv,
        }
    }
}

/// Where measurement results go
pub trait OutputSink {
    /// Persist one run; the returned name is referenced from the summary
    fn write_run(&mut self, report: &RunReport) -> Result<String>;

    fn write_summary(&mut self, rows: &[SummaryRow], started_at: DateTime<Local>) -> Result<()>;
}

/// Writes CSV files into one directory
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create(&self, name: &str) -> Result<BufWriter<File>> {
        fs::create_dir_all(&self.dir)?;
        Ok(BufWriter::new(File::create(self.dir.join(name))?))
    }
}

impl OutputSink for CsvSink {
    fn write_run(&mut self, report: &RunReport) -> Result<String> {
        let name = run_file_name(&report.config, report.started_at);
        let mut out = self.create(&name)?;
        write_run_csv(&mut out, report)?;
        out.flush()?;
        info!(file = %self.dir.join(&name).display(), samples = report.samples.len(), "Run CSV written");
        Ok(name)
    }

    fn write_summary(&mut self, rows: &[SummaryRow], started_at: DateTime<Local>) -> Result<()> {
        let name = format!("livefps_summary_{}.csv", started_at.format(FILE_TIME));
        let mut out = self.create(&name)?;
        write_summary_csv(&mut out, rows)?;
        out.flush()?;
        info!(file = %self.dir.join(&name).display(), rows = rows.len(), "Batch summary written");
        Ok(())
    }
}

/// Keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub runs: Vec<RunReport>,
    pub summaries: Vec<Vec<SummaryRow>>,
}

impl OutputSink for MemorySink {
    fn write_run(&mut self, report: &RunReport) -> Result<String> {
        self.runs.push(report.clone());
        Ok(run_file_name(&report.config, report.started_at))
    }

    fn write_summary(&mut self, rows: &[SummaryRow], _started_at: DateTime<Local>) -> Result<()> {
        self.summaries.push(rows.to_vec());
        Ok(())
    }
}

/// `livefps_{w}x{h}_pf{PF}_conv{0|1}_rot{deg}_fh{0|1}_fv{0|1}_tfps{fps}_{yyyyMMdd_HHmmss}.csv`
pub fn run_file_name(config: &CaptureConfiguration, started_at: DateTime<Local>) -> String {
    format!(
        "livefps_{}x{}_pf{}_conv{}_rot{}_fh{}_fv{}_tfps{}_{}.csv",
        config.width(),
        config.height(),
        config.pixel_format(),
        flag(config.convert_rgb()),
        config.rotate().degrees(),
        flag(config.flip_horizontal()),
        flag(config.flip_vertical()),
        config.target_fps(),
        started_at.format(FILE_TIME),
    )
}

pub fn write_run_csv<W: Write>(out: &mut W, report: &RunReport) -> io::Result<()> {
    let c = &report.config;
    writeln!(out, "{RUN_HEADER}")?;
    for sample in &report.samples {
        writeln!(
            out,
            "{},{:.3},{},{},{},{},{},{},{},{}",
            sample.at.format(ROW_TIME),
            sample.fps,
            c.width(),
            c.height(),
            c.pixel_format(),
            flag(c.convert_rgb()),
            c.rotate().degrees(),
            flag(c.flip_horizontal()),
            flag(c.flip_vertical()),
            c.target_fps(),
        )?;
    }
    Ok(())
}

pub fn write_summary_csv<W: Write>(out: &mut W, rows: &[SummaryRow]) -> io::Result<()> {
    writeln!(out, "{SUMMARY_HEADER}")?;
    for row in rows {
        let s = row.summary.unwrap_or(Summary {
            count: 0,
            avg: 0.0,
            min: 0.0,
            max: 0.0,
            p50: 0.0,
            p90: 0.0,
            p99: 0.0,
        });
        writeln!(
            out,
            "{},{},{},{},{},{},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{}",
            row.pixel_format,
            row.angle,
            row.target_fps,
            row.width,
            row.height,
            s.count,
            s.avg,
            s.p50,
            s.p90,
            s.p99,
            s.min,
            s.max,
            row.src_csv,
        )?;
    }
    Ok(())
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> CaptureConfiguration {
        CaptureConfiguration::builder("/dev/video0")
            .resolution(1280, 720)
            .target_fps(30.0)
            .pixel_format("mjpg")
            .rotate_degrees(90)
            .flip(true, false)
            .convert_rgb(true)
            .build()
            .unwrap()
    }

    fn at(ms: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 5, 14, 7, 9)
            .unwrap()
            + chrono::Duration::milliseconds(ms as i64)
    }

    #[test]
    fn file_name_encodes_the_configuration() {
        assert_eq!(
            run_file_name(&config(), at(0)),
            "livefps_1280x720_pfMJPG_conv1_rot90_fh1_fv0_tfps30_20240305_140709.csv"
        );
        let fractional = config().with_target_fps(29.97).unwrap();
        assert!(run_file_name(&fractional, at(0)).contains("_tfps29.97_"));
    }

    #[test]
    fn run_rows_are_bit_exact() {
        let report = RunReport::new(
            config(),
            at(0),
            vec![
                Sample { at: at(42), fps: 29.87654 },
                Sample { at: at(1042), fps: 30.0 },
            ],
        );
        let mut out = Vec::new();
        write_run_csv(&mut out, &report).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Timestamp,FPS,Width,Height,PixelFormat,ConvertRgb,RotateAngle,FlipH,FlipV,TargetFps\n\
             2024-03-05 14:07:09.042,29.877,1280,720,MJPG,1,90,1,0,30\n\
             2024-03-05 14:07:10.042,30.000,1280,720,MJPG,1,90,1,0,30\n"
        );
    }

    #[test]
    fn summary_rows_use_three_decimals() {
        let report = RunReport::new(
            config(),
            at(0),
            [1.0, 2.0, 3.0, 4.0, 5.0]
                .iter()
                .map(|&fps| Sample { at: at(0), fps })
                .collect(),
        );
        let row = SummaryRow::from_report(&report, "run.csv".into());
        let empty = SummaryRow {
            summary: None,
            src_csv: "empty.csv".into(),
            ..row.clone()
        };
        let mut out = Vec::new();
        write_summary_csv(&mut out, &[row, empty]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], SUMMARY_HEADER);
        assert_eq!(lines[1], "MJPG,90,30,1280,720,5,3.000,3.000,5.000,5.000,1.000,5.000,run.csv");
        assert_eq!(lines[2], "MJPG,90,30,1280,720,0,0.000,0.000,0.000,0.000,0.000,0.000,empty.csv");
    }

    #[test]
    fn csv_sink_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().join("nested"));
        let report = RunReport::new(config(), at(0), vec![Sample { at: at(5), fps: 12.5 }]);
        let name = sink.write_run(&report).unwrap();
        let text = fs::read_to_string(sink.dir().join(&name)).unwrap();
        assert_eq!(text.lines().count(), 2);

        let row = SummaryRow::from_report(&report, name);
        sink.write_summary(&[row], at(0)).unwrap();
        let summary = sink.dir().join("livefps_summary_20240305_140709.csv");
        assert!(summary.exists());
    }
}
