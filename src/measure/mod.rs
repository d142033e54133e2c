pub mod harness;
pub mod report;
pub mod stats;

pub use harness::{
    measure_batch_async, measure_window_async, BatchGrid, BatchReport, MeasureWindow,
    MeasurementHarness, SkippedRun,
};
pub use report::{CsvSink, MemorySink, OutputSink, RunReport, Sample, SummaryRow};
pub use stats::{percentile, Summary};
