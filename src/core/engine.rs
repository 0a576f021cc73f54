use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, info};

use super::error::{Result, SimulationError};
use super::estimator::estimate;
use super::summary::summarize;
use super::types::{Forecast, ForecastRequest, GrowthPolicy, PathMatrix, SimulationConfig};
use crate::market_data::MarketDataProvider;

/// Source of independent standard-normal deviates.
pub trait RandomSource {
    fn standard_normal(&mut self) -> f64;
}

impl<T: RandomSource + ?Sized> RandomSource for &mut T {
    fn standard_normal(&mut self) -> f64 {
        (**self).standard_normal()
    }
}

/// Seeded PRNG; the same seed always produces the same deviates.
pub struct SeededRng {
    inner: StdRng,
    seed: u64,
}

impl SeededRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Seeds from the OS entropy source. The drawn seed is kept so the run
    /// can be replayed with [`SeededRng::from_seed`].
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random::<u64>())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRng {
    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.inner)
    }
}

/// Simulates `num_paths` price trajectories over `horizon_days`.
///
/// Each daily return is `mu + sigma * z` with `z` drawn from `rng`, drawn
/// day by day across all paths. Returns compound as simple growth factors
/// `1 + r` onto the starting price.
pub fn simulate<R: RandomSource>(config: &SimulationConfig, rng: &mut R) -> Result<PathMatrix> {
    let days = config.horizon_days();
    let paths = config.num_paths();
    let (mu, sigma) = (config.mu(), config.sigma());

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(days);
    let mut current = vec![config.starting_price(); paths];

    for day in 0..days {
        for (path, price) in current.iter_mut().enumerate() {
            let daily_return = mu + sigma * rng.standard_normal();
            let growth = apply_growth_policy(config.growth_policy(), 1.0 + daily_return, day, path)?;
            *price *= growth;
        }
        rows.push(current.clone());
    }

    debug!(days, paths, mu, sigma, "simulated price paths");
    Ok(PathMatrix::from_rows(rows))
}

fn apply_growth_policy(policy: GrowthPolicy, growth: f64, day: usize, path: usize) -> Result<f64> {
    match policy {
        GrowthPolicy::Reject if growth <= 0.0 || !growth.is_finite() => {
            Err(SimulationError::NumericInstability {
                day,
                path,
                growth_factor: growth,
            })
        }
        GrowthPolicy::Reject => Ok(growth),
        GrowthPolicy::Floor(floor) => Ok(growth.max(floor)),
    }
}

/// Fetches history for the requested window, estimates return statistics
/// and simulates forward from the last close.
pub fn run_forecast<P, R>(provider: &P, request: &ForecastRequest, rng: &mut R) -> Result<Forecast>
where
    P: MarketDataProvider + ?Sized,
    R: RandomSource,
{
    let horizon_days = request.resolved_horizon_days()?;
    let series = provider.fetch_prices(&request.symbol, request.start, request.end)?;

    let mut stats = estimate(&series)?;
    if request.require_volatility {
        stats = stats.require_volatility()?;
    }

    let starting_price = match request.starting_price {
        Some(price) => price,
        None => series
            .last_price()
            .ok_or(SimulationError::InsufficientData { points: 0 })?,
    };

    let config =
        SimulationConfig::from_statistics(horizon_days, request.num_paths, starting_price, &stats)?
            .with_growth_policy(request.growth_policy)?;

    info!(
        symbol = %request.symbol,
        history = series.len(),
        horizon_days,
        paths = request.num_paths,
        starting_price,
        "running forecast"
    );

    let paths = simulate(&config, rng)?;
    let bands = summarize(&paths);

    Ok(Forecast {
        symbol: request.symbol.clone(),
        stats,
        starting_price,
        paths,
        bands,
    })
}
