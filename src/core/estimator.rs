use tracing::{debug, warn};

use super::error::{Result, SimulationError};
use super::types::{PriceSeries, ReturnStatistics};

/// Fractional day-over-day changes `(p_t - p_{t-1}) / p_{t-1}`.
///
/// The first price has no predecessor, so the result has `len - 1` entries.
pub fn daily_returns(series: &PriceSeries) -> Vec<f64> {
    series
        .points()
        .windows(2)
        .map(|pair| (pair[1].adj_close - pair[0].adj_close) / pair[0].adj_close)
        .collect()
}

/// Sample mean and N-1 standard deviation of the daily returns.
///
/// A two-point series yields a single return whose sample deviation is
/// undefined; it is reported as zero, which makes every simulated path
/// identical.
pub fn estimate(series: &PriceSeries) -> Result<ReturnStatistics> {
    if series.len() < 2 {
        return Err(SimulationError::InsufficientData {
            points: series.len(),
        });
    }

    let returns = daily_returns(series);
    let n = returns.len();
    let mu = returns.iter().sum::<f64>() / n as f64;

    let sigma = if n < 2 {
        warn!("only one daily return available; volatility set to zero");
        0.0
    } else {
        let ss: f64 = returns.iter().map(|r| (r - mu) * (r - mu)).sum();
        (ss / (n as f64 - 1.0)).sqrt()
    };

    if !mu.is_finite() || !sigma.is_finite() {
        return Err(SimulationError::DegenerateSeries);
    }

    debug!(observations = n, mu, sigma, "estimated daily return statistics");
    Ok(ReturnStatistics {
        mu,
        sigma,
        observations: n,
    })
}
