use thiserror::Error;

use crate::market_data::DataUnavailable;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("insufficient data: need at least 2 prices, got {points}")]
    InsufficientData { points: usize },

    #[error("degenerate series: daily returns have zero variance")]
    DegenerateSeries,

    #[error("invalid price series at index {index}: {reason}")]
    InvalidPriceSeries { index: usize, reason: String },

    #[error("invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailable),

    #[error(
        "numeric instability: growth factor {growth_factor} on day {day} of path {path} is not positive"
    )]
    NumericInstability {
        day: usize,
        path: usize,
        growth_factor: f64,
    },
}

pub type Result<T> = std::result::Result<T, SimulationError>;
