//! Summary statistics over FPS samples

/// Nearest-rank percentile of an ascending slice: the element at
/// `round((n - 1) * q)`, clamped to the slice. `None` when empty.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let last = sorted.len() - 1;
    let rank = (last as f64 * q).round();
    let index = if rank.is_nan() || rank < 0.0 {
        0
    } else {
        (rank as usize).min(last)
    };
    Some(sorted[index])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl Summary {
    pub fn from_samples(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let avg = sorted.iter().sum::<f64>() / count as f64;
        Some(Self {
            count,
            avg,
            min: sorted[0],
            max: sorted[count - 1],
            p50: percentile(&sorted, 0.50)?,
            p90: percentile(&sorted, 0.90)?,
            p99: percentile(&sorted, 0.99)?,
        })
    }
}
