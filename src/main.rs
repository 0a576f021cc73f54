use clap::Parser;
use std::env;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use stocksim::api::{Cli, run_cli, run_http_server};
use stocksim::config::ServerConfig;

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_str()));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let raw_args: Vec<String> = env::args().collect();
    if raw_args.get(1).map(|s| s.as_str()) == Some("serve") {
        if let Some(port) = raw_args.get(2) {
            match port.parse::<u16>() {
                Ok(p) if p > 0 => config.port = p,
                _ => {
                    eprintln!("Invalid port: {port}");
                    std::process::exit(1);
                }
            }
        }
        if let Err(e) = run_http_server(config).await {
            eprintln!("Server error: {e}");
            std::process::exit(1);
        }
        return;
    }

    match run_cli(Cli::parse()) {
        Ok(json) => println!("{json}"),
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    }
}
