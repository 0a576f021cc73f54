use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::core::{
    Forecast, ForecastRequest, GrowthPolicy, PathMatrix, SeededRng, SimulationError, SummaryBands,
    run_forecast,
};
use crate::market_data::{
    CsvDirectoryProvider, DataUnavailable, MarketDataProvider, is_ticker, normalize_symbol,
};

pub const DEFAULT_SYMBOLS: [&str; 5] = ["AAPL", "MSFT", "GOOGL", "AMZN", "FB"];

const MIN_API_SIMULATIONS: usize = 100;
const MAX_API_SIMULATIONS: usize = 2_000;
/// About ten years of calendar days.
const MAX_API_HORIZON_DAYS: usize = 3_660;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    symbol: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    simulations: Option<usize>,
    horizon_days: Option<usize>,
    seed: Option<u64>,
    starting_price: Option<f64>,
    include_paths: Option<bool>,
    require_volatility: Option<bool>,
    growth_floor: Option<f64>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "stocksim",
    about = "Monte Carlo stock price simulation from historical daily returns"
)]
pub struct Cli {
    #[arg(long, default_value = "AAPL")]
    symbol: String,
    #[arg(long, default_value = "2020-01-01", help = "First day of the history window")]
    start: NaiveDate,
    #[arg(long, default_value = "2023-01-01", help = "Last day of the history window")]
    end: NaiveDate,
    #[arg(long, default_value_t = 1000, help = "Number of simulated paths")]
    simulations: usize,
    #[arg(
        long,
        help = "Trading days to simulate; defaults to the calendar length of the history window"
    )]
    horizon_days: Option<usize>,
    #[arg(long, help = "RNG seed; a fresh seed is drawn and reported when omitted")]
    seed: Option<u64>,
    #[arg(long, help = "Simulation base price; defaults to the last adjusted close")]
    starting_price: Option<f64>,
    #[arg(
        long,
        default_value = "data",
        help = "Directory with one <SYMBOL>.csv price export per symbol"
    )]
    data_dir: PathBuf,
    #[arg(long, help = "Include every simulated path in the output")]
    include_paths: bool,
    #[arg(long, help = "Fail when historical returns have zero variance")]
    require_volatility: bool,
    #[arg(
        long,
        help = "Raise growth factors below this floor instead of failing on returns <= -100%"
    )]
    growth_floor: Option<f64>,
}

#[derive(Debug)]
struct ApiRequest {
    forecast: ForecastRequest,
    seed: Option<u64>,
    include_paths: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
    seed: u64,
    horizon_days: usize,
    num_paths: usize,
    starting_price: f64,
    mu: f64,
    sigma: f64,
    observations: usize,
    bands: SummaryBands,
    #[serde(skip_serializing_if = "Option::is_none")]
    paths: Option<PathMatrix>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct SymbolsResponse {
    symbols: Vec<&'static str>,
}

#[derive(Clone)]
struct AppState {
    provider: Arc<dyn MarketDataProvider + Send + Sync>,
}

fn build_request(cli: &Cli) -> Result<ApiRequest, String> {
    let symbol = normalize_symbol(&cli.symbol);
    if symbol.is_empty() {
        return Err("--symbol must not be empty".to_string());
    }
    if !is_ticker(&symbol) {
        return Err(
            "--symbol may only contain ASCII letters, digits, '.', '-' and '^'".to_string(),
        );
    }

    if cli.end < cli.start {
        return Err("--end must be on or after --start".to_string());
    }

    if cli.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    if cli.horizon_days == Some(0) {
        return Err("--horizon-days must be > 0".to_string());
    }

    if let Some(price) = cli.starting_price {
        if !price.is_finite() || price <= 0.0 {
            return Err("--starting-price must be > 0".to_string());
        }
    }

    let growth_policy = match cli.growth_floor {
        None => GrowthPolicy::Reject,
        Some(floor) if floor.is_finite() && floor > 0.0 => GrowthPolicy::Floor(floor),
        Some(_) => return Err("--growth-floor must be > 0".to_string()),
    };

    let mut forecast = ForecastRequest::new(
        symbol,
        cli.start,
        cli.end,
        cli.simulations,
    );
    forecast.horizon_days = cli.horizon_days;
    forecast.starting_price = cli.starting_price;
    forecast.require_volatility = cli.require_volatility;
    forecast.growth_policy = growth_policy;

    Ok(ApiRequest {
        forecast,
        seed: cli.seed,
        include_paths: cli.include_paths,
    })
}

fn default_cli_for_api() -> Cli {
    Cli {
        symbol: DEFAULT_SYMBOLS[0].to_string(),
        start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN),
        end: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or(NaiveDate::MIN),
        simulations: 1_000,
        horizon_days: None,
        seed: None,
        starting_price: None,
        data_dir: PathBuf::from("data"),
        include_paths: false,
        require_volatility: false,
        growth_floor: None,
    }
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.symbol {
        cli.symbol = v;
    }
    if let Some(v) = payload.start {
        cli.start = v;
    }
    if let Some(v) = payload.end {
        cli.end = v;
    }
    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.horizon_days {
        cli.horizon_days = Some(v);
    }
    if let Some(v) = payload.seed {
        cli.seed = Some(v);
    }
    if let Some(v) = payload.starting_price {
        cli.starting_price = Some(v);
    }
    if let Some(v) = payload.include_paths {
        cli.include_paths = v;
    }
    if let Some(v) = payload.require_volatility {
        cli.require_volatility = v;
    }
    if let Some(v) = payload.growth_floor {
        cli.growth_floor = Some(v);
    }

    if !(MIN_API_SIMULATIONS..=MAX_API_SIMULATIONS).contains(&cli.simulations) {
        return Err(format!(
            "simulations must be between {MIN_API_SIMULATIONS} and {MAX_API_SIMULATIONS}"
        ));
    }

    let request = build_request(&cli)?;
    let horizon_days = request
        .forecast
        .resolved_horizon_days()
        .map_err(|e| e.to_string())?;
    if horizon_days > MAX_API_HORIZON_DAYS {
        let source = if request.forecast.horizon_days.is_some() {
            "horizonDays"
        } else {
            "the start..end window (set horizonDays or move end)"
        };
        return Err(format!(
            "horizon of {horizon_days} days from {source} exceeds {MAX_API_HORIZON_DAYS} days"
        ));
    }

    Ok(request)
}

fn run_request(
    provider: &(dyn MarketDataProvider + Send + Sync),
    request: ApiRequest,
) -> Result<SimulateResponse, SimulationError> {
    let mut rng = match request.seed {
        Some(seed) => SeededRng::from_seed(seed),
        None => SeededRng::from_entropy(),
    };
    let seed = rng.seed();
    let forecast = run_forecast(provider, &request.forecast, &mut rng)?;
    Ok(build_simulate_response(
        &request.forecast,
        forecast,
        seed,
        request.include_paths,
    ))
}

fn build_simulate_response(
    request: &ForecastRequest,
    forecast: Forecast,
    seed: u64,
    include_paths: bool,
) -> SimulateResponse {
    SimulateResponse {
        symbol: forecast.symbol,
        start: request.start,
        end: request.end,
        seed,
        horizon_days: forecast.paths.horizon_days(),
        num_paths: forecast.paths.num_paths(),
        starting_price: forecast.starting_price,
        mu: forecast.stats.mu,
        sigma: forecast.stats.sigma,
        observations: forecast.stats.observations,
        bands: forecast.bands,
        paths: include_paths.then_some(forecast.paths),
    }
}

fn status_for(err: &SimulationError) -> StatusCode {
    match err {
        SimulationError::DataUnavailable(
            DataUnavailable::UnknownSymbol(_) | DataUnavailable::NoTradingDays { .. },
        ) => StatusCode::NOT_FOUND,
        SimulationError::DataUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// One-shot forecast for the command line; returns pretty JSON.
pub fn run_cli(cli: Cli) -> Result<String, String> {
    let request = build_request(&cli)?;
    let provider = CsvDirectoryProvider::new(cli.data_dir);
    let response = run_request(&provider, request).map_err(|e| e.to_string())?;
    serde_json::to_string_pretty(&response).map_err(|e| format!("Failed to encode forecast: {e}"))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/symbols", get(symbols_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(config: ServerConfig) -> std::io::Result<()> {
    let addr = config
        .bind_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let state = AppState {
        provider: Arc::new(CsvDirectoryProvider::new(config.data_dir.clone())),
    };

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, data_dir = %config.data_dir.display(), "stock simulation HTTP API listening");

    axum::serve(listener, router(state)).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn symbols_handler() -> Response {
    json_response(
        StatusCode::OK,
        SymbolsResponse {
            symbols: DEFAULT_SYMBOLS.to_vec(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_handler_impl(state: AppState, payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let symbol = request.forecast.symbol.clone();
    let outcome =
        tokio::task::spawn_blocking(move || run_request(state.provider.as_ref(), request)).await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(err)) => {
            warn!(%symbol, error = %err, "forecast failed");
            error_response(status_for(&err), &err.to_string())
        }
        Err(join_err) => {
            error!(%symbol, error = %join_err, "forecast task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PricePoint;
    use crate::market_data::InMemoryProvider;
    use chrono::Days;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sample_state() -> AppState {
        let base = date(2022, 1, 3);
        let points = (0..40u64)
            .map(|i| {
                let wiggle = if i % 2 == 0 { 1.5 } else { -1.0 };
                PricePoint::new(base + Days::new(i), 100.0 + i as f64 * 0.25 + wiggle)
            })
            .collect();
        let mut provider = InMemoryProvider::default();
        provider.insert("AAPL", points);
        AppState {
            provider: Arc::new(provider),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[test]
    fn build_request_uses_history_window_and_reject_policy_by_default() {
        let request = build_request(&sample_cli()).expect("valid defaults");
        assert_eq!(request.forecast.symbol, "AAPL");
        assert_eq!(request.forecast.num_paths, 1_000);
        assert_eq!(request.forecast.growth_policy, GrowthPolicy::Reject);
        assert_eq!(
            request.forecast.resolved_horizon_days().expect("horizon"),
            1_097
        );
        assert!(request.seed.is_none());
        assert!(!request.include_paths);
    }

    #[test]
    fn build_request_rejects_reversed_dates() {
        let mut cli = sample_cli();
        cli.start = date(2023, 1, 1);
        cli.end = date(2022, 1, 1);
        let err = build_request(&cli).expect_err("must reject reversed window");
        assert!(err.contains("--end"));
    }

    #[test]
    fn build_request_rejects_zero_simulations_and_horizon() {
        let mut cli = sample_cli();
        cli.simulations = 0;
        assert!(
            build_request(&cli)
                .expect_err("zero paths")
                .contains("--simulations")
        );

        let mut cli = sample_cli();
        cli.horizon_days = Some(0);
        assert!(
            build_request(&cli)
                .expect_err("zero horizon")
                .contains("--horizon-days")
        );
    }

    #[test]
    fn build_request_validates_starting_price_and_growth_floor() {
        let mut cli = sample_cli();
        cli.starting_price = Some(-5.0);
        assert!(
            build_request(&cli)
                .expect_err("negative price")
                .contains("--starting-price")
        );

        let mut cli = sample_cli();
        cli.growth_floor = Some(0.0);
        assert!(
            build_request(&cli)
                .expect_err("zero floor")
                .contains("--growth-floor")
        );

        let mut cli = sample_cli();
        cli.growth_floor = Some(0.001);
        let request = build_request(&cli).expect("valid floor");
        assert_eq!(request.forecast.growth_policy, GrowthPolicy::Floor(0.001));
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "stocksim",
            "--symbol",
            "msft",
            "--start",
            "2021-06-01",
            "--end",
            "2021-12-31",
            "--simulations",
            "250",
            "--horizon-days",
            "30",
            "--seed",
            "7",
            "--include-paths",
        ])
        .expect("flags should parse");
        let request = build_request(&cli).expect("valid request");
        assert_eq!(request.forecast.symbol, "MSFT");
        assert_eq!(request.forecast.start, date(2021, 6, 1));
        assert_eq!(request.forecast.horizon_days, Some(30));
        assert_eq!(request.seed, Some(7));
        assert!(request.include_paths);
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let json = r#"{
          "symbol": "googl",
          "start": "2021-01-04",
          "end": "2021-03-31",
          "simulations": 500,
          "horizonDays": 20,
          "seed": 99,
          "startingPrice": 88.5,
          "includePaths": true,
          "requireVolatility": true,
          "growthFloor": 0.05
        }"#;
        let request = api_request_from_json(json).expect("json should parse");
        let forecast = request.forecast;

        assert_eq!(forecast.symbol, "GOOGL");
        assert_eq!(forecast.start, date(2021, 1, 4));
        assert_eq!(forecast.end, date(2021, 3, 31));
        assert_eq!(forecast.num_paths, 500);
        assert_eq!(forecast.horizon_days, Some(20));
        assert_approx(forecast.starting_price.expect("price"), 88.5);
        assert!(forecast.require_volatility);
        assert_eq!(forecast.growth_policy, GrowthPolicy::Floor(0.05));
        assert_eq!(request.seed, Some(99));
        assert!(request.include_paths);
    }

    #[test]
    fn api_request_enforces_simulation_bounds() {
        for simulations in [99, 2_001] {
            let json = format!(r#"{{ "simulations": {simulations} }}"#);
            let err = api_request_from_json(&json).expect_err("out of range");
            assert!(err.contains("simulations"));
        }
        assert!(api_request_from_json(r#"{ "simulations": 100 }"#).is_ok());
        assert!(api_request_from_json(r#"{ "simulations": 2000 }"#).is_ok());
    }

    #[test]
    fn api_request_enforces_horizon_bounds() {
        let err = api_request_from_json(r#"{ "horizonDays": 1000000000, "simulations": 2000 }"#)
            .expect_err("explicit horizon too long");
        assert!(err.contains("horizonDays"));

        let err = api_request_from_json(r#"{ "start": "0001-01-01", "end": "9999-12-31" }"#)
            .expect_err("default horizon too long");
        assert!(err.contains("end"));

        let request = api_request_from_json(r#"{ "horizonDays": 3660 }"#).expect("at the limit");
        assert_eq!(request.forecast.horizon_days, Some(3_660));

        let request = api_request_from_json(
            r#"{ "start": "0001-01-01", "end": "9999-12-31", "horizonDays": 30 }"#,
        )
        .expect("explicit horizon overrides a wide window");
        assert_eq!(request.forecast.horizon_days, Some(30));
    }

    #[test]
    fn build_request_rejects_symbols_that_are_not_tickers() {
        for symbol in ["../secret", "a/b", "..", "AA PL"] {
            let mut cli = sample_cli();
            cli.symbol = symbol.to_string();
            let err = build_request(&cli).expect_err("must reject path-like symbol");
            assert!(err.contains("--symbol"), "{symbol}: {err}");
        }

        let err = api_request_from_json(r#"{ "symbol": "../secret" }"#)
            .expect_err("payload symbol must be a ticker");
        assert!(err.contains("--symbol"));

        let mut cli = sample_cli();
        cli.symbol = " brk.b ".to_string();
        let request = build_request(&cli).expect("dotted ticker");
        assert_eq!(request.forecast.symbol, "BRK.B");
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let state = sample_state();
        let request = api_request_from_json(
            r#"{ "start": "2022-01-01", "end": "2022-03-31", "horizonDays": 4, "seed": 5, "simulations": 100 }"#,
        )
        .expect("valid request");
        let response = run_request(state.provider.as_ref(), request).expect("forecast");

        assert_eq!(response.seed, 5);
        assert_eq!(response.horizon_days, 4);
        assert_eq!(response.num_paths, 100);
        assert_eq!(response.observations, 39);

        let json = serde_json::to_string(&response).expect("response should serialize");
        for key in [
            "\"symbol\"",
            "\"seed\"",
            "\"horizonDays\"",
            "\"numPaths\"",
            "\"startingPrice\"",
            "\"mu\"",
            "\"sigma\"",
            "\"bands\"",
            "\"p10\"",
            "\"p90\"",
        ] {
            assert!(json.contains(key), "missing {key}");
        }
        assert!(!json.contains("\"paths\""));
    }

    #[test]
    fn seeded_requests_are_reproducible() {
        let state = sample_state();
        let json = r#"{ "start": "2022-01-01", "end": "2022-03-31", "horizonDays": 3, "seed": 11, "simulations": 100, "includePaths": true }"#;
        let a = run_request(
            state.provider.as_ref(),
            api_request_from_json(json).expect("request"),
        )
        .expect("forecast");
        let b = run_request(
            state.provider.as_ref(),
            api_request_from_json(json).expect("request"),
        )
        .expect("forecast");
        assert_eq!(a.paths, b.paths);
        assert_eq!(a.paths.expect("paths included").num_paths(), 100);
    }

    #[test]
    fn errors_map_to_http_status() {
        let unknown = SimulationError::DataUnavailable(DataUnavailable::UnknownSymbol("X".into()));
        assert_eq!(status_for(&unknown), StatusCode::NOT_FOUND);

        let io = SimulationError::DataUnavailable(DataUnavailable::Io {
            path: "data/X.csv".into(),
            message: "denied".into(),
        });
        assert_eq!(status_for(&io), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(
            status_for(&SimulationError::InsufficientData { points: 1 }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SimulationError::DegenerateSeries),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn simulate_handler_returns_forecast_json() {
        let payload = SimulatePayload {
            start: Some(date(2022, 1, 1)),
            end: Some(date(2022, 3, 31)),
            horizon_days: Some(2),
            seed: Some(3),
            simulations: Some(100),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(sample_state(), payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CACHE_CONTROL)
                .expect("cache header"),
            "no-store"
        );

        let body = body_json(response).await;
        assert_eq!(body["symbol"], "AAPL");
        assert_eq!(body["horizonDays"], 2);
        assert_eq!(body["bands"]["mean"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn simulate_handler_reports_unknown_symbol_as_not_found() {
        let payload = SimulatePayload {
            symbol: Some("FB".to_string()),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(sample_state(), payload).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|msg| msg.contains("FB"))
        );
    }

    #[tokio::test]
    async fn simulate_handler_rejects_invalid_payload() {
        let payload = SimulatePayload {
            simulations: Some(5),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(sample_state(), payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
