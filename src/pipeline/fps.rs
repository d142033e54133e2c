//! Rolling one-second frame-rate window

use std::time::{Duration, Instant};

pub const WINDOW: Duration = Duration::from_secs(1);

/// Counts frames and converts them to a rate once at least [`WINDOW`] has
/// elapsed. Emission is driven by ticks, so a stalled producer delays the
/// next update instead of producing a spurious zero.
#[derive(Debug, Clone)]
pub struct FpsMeter {
    count: u64,
    window_start: Instant,
    latest: f64,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            count: 0,
            window_start: start,
            latest: 0.0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Count one frame observed at `now`. Returns the window's rate exactly
    /// once, on the tick that closes it.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < WINDOW {
            return None;
        }
        let fps = self.count as f64 / elapsed.as_secs_f64();
        self.latest = fps;
        self.count = 0;
        self.window_start = now;
        Some(fps)
    }

    /// Last computed rate, 0.0 until the first window closes
    pub fn latest_value(&self) -> f64 {
        self.latest
    }

    /// Frames counted in the open window
    pub fn pending(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
        self.latest = 0.0;
    }
}
