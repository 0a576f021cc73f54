use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{Result, SimulationError};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub date: NaiveDate,
    pub adj_close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, adj_close: f64) -> Self {
        Self { date, adj_close }
    }
}

/// Chronologically ascending adjusted closes with unique dates and
/// strictly positive prices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(points: Vec<PricePoint>) -> Result<Self> {
        for (index, point) in points.iter().enumerate() {
            if !point.adj_close.is_finite() || point.adj_close <= 0.0 {
                return Err(SimulationError::InvalidPriceSeries {
                    index,
                    reason: format!("price {} must be finite and > 0", point.adj_close),
                });
            }
            if index > 0 && point.date <= points[index - 1].date {
                return Err(SimulationError::InvalidPriceSeries {
                    index,
                    reason: format!(
                        "date {} does not follow {}",
                        point.date,
                        points[index - 1].date
                    ),
                });
            }
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.adj_close)
    }

    pub fn last_price(&self) -> Option<f64> {
        self.points.last().map(|p| p.adj_close)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnStatistics {
    pub mu: f64,
    pub sigma: f64,
    /// Number of daily returns the statistics were computed from.
    pub observations: usize,
}

impl ReturnStatistics {
    pub fn require_volatility(self) -> Result<Self> {
        if self.sigma > 0.0 {
            Ok(self)
        } else {
            Err(SimulationError::DegenerateSeries)
        }
    }
}

/// What to do when a sampled growth factor `1 + r` is not positive.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum GrowthPolicy {
    #[default]
    Reject,
    /// Raise every growth factor below the floor up to it.
    Floor(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationConfig {
    horizon_days: usize,
    num_paths: usize,
    starting_price: f64,
    mu: f64,
    sigma: f64,
    growth_policy: GrowthPolicy,
}

impl SimulationConfig {
    pub fn new(
        horizon_days: usize,
        num_paths: usize,
        starting_price: f64,
        mu: f64,
        sigma: f64,
    ) -> Result<Self> {
        if horizon_days < 1 {
            return Err(SimulationError::InvalidConfig(
                "horizon days must be >= 1".to_string(),
            ));
        }
        if num_paths < 1 {
            return Err(SimulationError::InvalidConfig(
                "number of paths must be >= 1".to_string(),
            ));
        }
        if !starting_price.is_finite() || starting_price <= 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "starting price must be > 0, got {starting_price}"
            )));
        }
        if !mu.is_finite() {
            return Err(SimulationError::InvalidConfig(format!(
                "mean return must be finite, got {mu}"
            )));
        }
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(SimulationError::InvalidConfig(format!(
                "return volatility must be finite and >= 0, got {sigma}"
            )));
        }

        Ok(Self {
            horizon_days,
            num_paths,
            starting_price,
            mu,
            sigma,
            growth_policy: GrowthPolicy::Reject,
        })
    }

    pub fn from_statistics(
        horizon_days: usize,
        num_paths: usize,
        starting_price: f64,
        stats: &ReturnStatistics,
    ) -> Result<Self> {
        Self::new(
            horizon_days,
            num_paths,
            starting_price,
            stats.mu,
            stats.sigma,
        )
    }

    pub fn with_growth_policy(mut self, policy: GrowthPolicy) -> Result<Self> {
        if let GrowthPolicy::Floor(floor) = policy {
            if !floor.is_finite() || floor <= 0.0 {
                return Err(SimulationError::InvalidConfig(format!(
                    "growth floor must be > 0, got {floor}"
                )));
            }
        }
        self.growth_policy = policy;
        Ok(self)
    }

    pub fn horizon_days(&self) -> usize {
        self.horizon_days
    }

    pub fn num_paths(&self) -> usize {
        self.num_paths
    }

    pub fn starting_price(&self) -> f64 {
        self.starting_price
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn growth_policy(&self) -> GrowthPolicy {
        self.growth_policy
    }
}

/// Simulated prices, one row per day and one column per path.
///
/// Row 0 is the first simulated day; the starting price is not a row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PathMatrix {
    rows: Vec<Vec<f64>>,
}

impl PathMatrix {
    pub(crate) fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn horizon_days(&self) -> usize {
        self.rows.len()
    }

    pub fn num_paths(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, day: usize) -> Option<&[f64]> {
        self.rows.get(day).map(Vec::as_slice)
    }

    pub fn path(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.num_paths() {
            return None;
        }
        Some(self.rows.iter().map(|row| row[index]).collect())
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.rows
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryBands {
    pub mean: Vec<f64>,
    pub max: Vec<f64>,
    pub min: Vec<f64>,
    pub p10: Vec<f64>,
    pub p90: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForecastRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub num_paths: usize,
    /// Defaults to the calendar length of the history window.
    pub horizon_days: Option<usize>,
    /// Defaults to the last adjusted close in the window.
    pub starting_price: Option<f64>,
    pub require_volatility: bool,
    pub growth_policy: GrowthPolicy,
}

impl ForecastRequest {
    pub fn new(symbol: impl Into<String>, start: NaiveDate, end: NaiveDate, num_paths: usize) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
            num_paths,
            horizon_days: None,
            starting_price: None,
            require_volatility: false,
            growth_policy: GrowthPolicy::Reject,
        }
    }

    pub fn resolved_horizon_days(&self) -> Result<usize> {
        if let Some(days) = self.horizon_days {
            return Ok(days);
        }
        if self.end < self.start {
            return Err(SimulationError::InvalidConfig(format!(
                "end date {} is before start date {}",
                self.end, self.start
            )));
        }
        let days = (self.end - self.start).num_days() + 1;
        usize::try_from(days).map_err(|_| {
            SimulationError::InvalidConfig(format!("horizon of {days} days is out of range"))
        })
    }
}

#[derive(Clone, Debug)]
pub struct Forecast {
    pub symbol: String,
    pub stats: ReturnStatistics,
    pub starting_price: f64,
    pub paths: PathMatrix,
    pub bands: SummaryBands,
}
