mod engine;
mod error;
mod estimator;
mod summary;
mod types;

pub use engine::{RandomSource, SeededRng, run_forecast, simulate};
pub use error::{Result, SimulationError};
pub use estimator::{daily_returns, estimate};
pub use summary::{percentile, summarize};
pub use types::{
    Forecast, ForecastRequest, GrowthPolicy, PathMatrix, PricePoint, PriceSeries,
    ReturnStatistics, SimulationConfig, SummaryBands,
};
