//! Historical price sources feeding the forecast pipeline.
//!
//! - [`CsvDirectoryProvider`] reads vendor CSV exports, one file per symbol
//! - [`InMemoryProvider`] serves fixed series for tests and demos

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::core::{PricePoint, PriceSeries};

#[derive(Debug, Error)]
pub enum DataUnavailable {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("no trading days for {symbol} between {start} and {end}")]
    NoTradingDays {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed price data at line {line}: {message}")]
    Malformed { line: u64, message: String },

    #[error("invalid price series for {symbol}: {message}")]
    InvalidSeries { symbol: String, message: String },
}

/// Supplies adjusted daily closes for `symbol` over `start..=end`.
///
/// `end` is inclusive so a forecast window names its last trading day; vendor
/// download APIs that treat `end` as exclusive need one day added.
pub trait MarketDataProvider {
    fn fetch_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataUnavailable>;
}

pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// Ticker-shaped: non-empty, ASCII alphanumerics plus `.`, `-` and `^`,
/// and not made of dots alone.
pub fn is_ticker(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^'))
        && symbol.chars().any(|c| c != '.')
}

fn window(
    symbol: &str,
    mut points: Vec<PricePoint>,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceSeries, DataUnavailable> {
    points.retain(|p| p.date >= start && p.date <= end);
    points.sort_by_key(|p| p.date);

    if points.is_empty() {
        return Err(DataUnavailable::NoTradingDays {
            symbol: symbol.to_string(),
            start,
            end,
        });
    }

    PriceSeries::new(points).map_err(|e| DataUnavailable::InvalidSeries {
        symbol: symbol.to_string(),
        message: e.to_string(),
    })
}

/// Reads `<root>/<SYMBOL>.csv` files with `Date` and `Adj Close` columns.
///
/// `Close` is used when the export has no adjusted column. Rows whose price
/// cell does not parse (vendors write `null` for missing sessions) are skipped.
#[derive(Debug, Clone)]
pub struct CsvDirectoryProvider {
    root: PathBuf,
}

impl CsvDirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("{symbol}.csv"))
    }

    fn read_points(&self, path: &Path) -> Result<Vec<PricePoint>, DataUnavailable> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| DataUnavailable::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let headers = reader
            .headers()
            .map_err(|e| DataUnavailable::Malformed {
                line: 1,
                message: format!("failed to read headers: {e}"),
            })?
            .clone();

        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let date_idx = find("Date").ok_or_else(|| DataUnavailable::Malformed {
            line: 1,
            message: "missing Date column".to_string(),
        })?;
        let price_idx = find("Adj Close")
            .or_else(|| find("Close"))
            .ok_or_else(|| DataUnavailable::Malformed {
                line: 1,
                message: "missing Adj Close column".to_string(),
            })?;

        let mut points = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| DataUnavailable::Malformed {
                line: e.position().map_or(0, |p| p.line()),
                message: e.to_string(),
            })?;
            let line = record.position().map_or(0, |p| p.line());

            let raw_date = record.get(date_idx).unwrap_or_default().trim();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|e| {
                DataUnavailable::Malformed {
                    line,
                    message: format!("bad date {raw_date:?}: {e}"),
                }
            })?;

            let Ok(price) = record.get(price_idx).unwrap_or_default().trim().parse::<f64>() else {
                continue;
            };
            if !price.is_finite() {
                continue;
            }
            points.push(PricePoint::new(date, price));
        }

        Ok(points)
    }
}

impl MarketDataProvider for CsvDirectoryProvider {
    fn fetch_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataUnavailable> {
        let symbol = normalize_symbol(symbol);
        if !is_ticker(&symbol) {
            return Err(DataUnavailable::UnknownSymbol(symbol));
        }
        let path = self.path_for(&symbol);
        if !path.is_file() {
            return Err(DataUnavailable::UnknownSymbol(symbol));
        }

        let points = self.read_points(&path)?;
        debug!(symbol = %symbol, rows = points.len(), path = %path.display(), "loaded price history");
        window(&symbol, points, start, end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    series: HashMap<String, Vec<PricePoint>>,
}

impl InMemoryProvider {
    pub fn insert(&mut self, symbol: &str, points: Vec<PricePoint>) {
        self.series.insert(normalize_symbol(symbol), points);
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn fetch_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, DataUnavailable> {
        let symbol = normalize_symbol(symbol);
        let points = self
            .series
            .get(&symbol)
            .ok_or_else(|| DataUnavailable::UnknownSymbol(symbol.clone()))?;
        window(&symbol, points.clone(), start, end)
    }
}
