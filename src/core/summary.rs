use super::types::{PathMatrix, SummaryBands};

/// Percentile `p` (0..=100) of `values`, interpolating linearly between the
/// two nearest order statistics at rank `p / 100 * (n - 1)`.
///
/// Sorts `values` in place. Empty input yields NaN.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

/// Per-day mean, extrema and 10th/90th percentiles across all paths.
pub fn summarize(matrix: &PathMatrix) -> SummaryBands {
    let days = matrix.horizon_days();
    let mut bands = SummaryBands {
        mean: Vec::with_capacity(days),
        max: Vec::with_capacity(days),
        min: Vec::with_capacity(days),
        p10: Vec::with_capacity(days),
        p90: Vec::with_capacity(days),
    };

    let mut scratch = Vec::with_capacity(matrix.num_paths());
    for row in matrix.rows() {
        scratch.clear();
        scratch.extend_from_slice(row);

        bands
            .mean
            .push(scratch.iter().sum::<f64>() / scratch.len() as f64);
        bands.p10.push(percentile(&mut scratch, 10.0));
        bands.p90.push(percentile(&mut scratch, 90.0));
        // scratch is sorted now
        bands.min.push(scratch[0]);
        bands.max.push(scratch[scratch.len() - 1]);
    }

    bands
}

impl SummaryBands {
    pub fn from_matrix(matrix: &PathMatrix) -> Self {
        summarize(matrix)
    }
}
