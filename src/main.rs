mod config;
mod data;
mod date_range;
mod error;
mod insights_client;
mod parquet_sink;
mod runner;
mod server;
mod warehouse;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use config::{Config, SinkKind, WarehouseConfig};
use data::RowContext;
use error::Error;
use insights_client::{GraphApiClient, InsightsSource};
use log::{error, info};
use parquet_sink::ParquetSink;
use runner::{SyncOptions, TableNames};
use std::net::SocketAddr;
use std::sync::Arc;
use warehouse::{BigQueryClient, RowSink};

const DEFAULT_LOOKBACK_DAYS: u32 = 2;

#[derive(Parser)]
#[command(about = "Loads ad insights into append-only warehouse tables")]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync for campaigns, ad sets and ads, then exit
    Sync {
        #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date, requires = "until")]
        since: Option<NaiveDate>,

        #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date, requires = "since")]
        until: Option<NaiveDate>,

        /// Window of N days ending yesterday
        #[arg(long, conflicts_with_all = ["since", "until", "all_history"])]
        last_days: Option<u32>,

        /// Request all available history
        #[arg(long, conflicts_with_all = ["since", "until"])]
        all_history: bool,
    },

    /// Serve the HTTP trigger
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000", env = "BIND_ADDR")]
        bind: SocketAddr,

        /// Default window when a request names no dates
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS, env = "LOOKBACK_DAYS")]
        lookback_days: u32,
    },
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    date_range::parse_date(s).map_err(|_| "Invalid date, expected YYYY-MM-DD".to_string())
}

fn build_sink(config: &WarehouseConfig) -> Arc<dyn RowSink> {
    match config.sink {
        SinkKind::Bigquery => Arc::new(BigQueryClient::new(config)),
        SinkKind::Parquet => Arc::new(ParquetSink::new(config)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    env_logger::init();

    let config = args.config;
    let source: Arc<dyn InsightsSource> = Arc::new(GraphApiClient::new(&config.graph));
    let sink = build_sink(&config.warehouse);
    let tables = TableNames::from(&config.tables);
    let ad_account_id = config.graph.ad_account_id.clone();

    match args.command {
        Command::Sync {
            since,
            until,
            last_days,
            all_history,
        } => {
            let today = Utc::now().date_naive();
            let date_range = date_range::resolve_date_range(
                since,
                until,
                last_days,
                all_history,
                today,
                DEFAULT_LOOKBACK_DAYS,
            )?;

            let options = SyncOptions {
                date_range,
                tables,
                row_context: RowContext::new(
                    ad_account_id.as_deref().unwrap_or_default(),
                    config.tables.add_reporting_date.then_some(today),
                ),
            };

            let run = runner::sync_insights(source.as_ref(), sink.as_ref(), &options).await;
            info!("{}", run.message());

            if !run.is_success() {
                for failure in &run.failures {
                    error!(
                        "{} failed for {} ({}): {}",
                        failure.source.label(),
                        failure.level,
                        failure.table,
                        failure.details
                    );
                }
                std::process::exit(1);
            }
        }
        Command::Serve {
            bind,
            lookback_days,
        } => {
            let state = server::AppState {
                source,
                sink,
                tables,
                ad_account_id,
                add_reporting_date: config.tables.add_reporting_date,
                lookback_days,
            };

            if let Err(err) = server::serve(bind, state).await {
                error!("server stopped: {}", err);
                std::process::exit(1);
            }
        }
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_accepts_explicit_range() {
        let args = Args::try_parse_from([
            "fb-insights-loader",
            "sync",
            "--since",
            "2025-10-01",
            "--until",
            "2025-10-19",
        ])
        .unwrap();

        match args.command {
            Command::Sync { since, until, .. } => {
                assert_eq!(since, NaiveDate::from_ymd_opt(2025, 10, 1));
                assert_eq!(until, NaiveDate::from_ymd_opt(2025, 10, 19));
            }
            Command::Serve { .. } => panic!("Expected sync command"),
        }
    }

    #[test]
    fn test_sync_rejects_bad_date() {
        let result = Args::try_parse_from([
            "fb-insights-loader",
            "sync",
            "--since",
            "2025-13-01",
            "--until",
            "2025-10-19",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sync_requires_both_dates() {
        let result = Args::try_parse_from(["fb-insights-loader", "sync", "--since", "2025-10-01"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_last_days_conflicts_with_all_history() {
        let result = Args::try_parse_from([
            "fb-insights-loader",
            "sync",
            "--last-days",
            "7",
            "--all-history",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_serve_defaults() {
        let args = Args::try_parse_from(["fb-insights-loader", "serve"]).unwrap();

        match args.command {
            Command::Serve {
                bind,
                lookback_days,
            } => {
                assert_eq!(bind.port(), 3000);
                assert_eq!(lookback_days, DEFAULT_LOOKBACK_DAYS);
            }
            Command::Sync { .. } => panic!("Expected serve command"),
        }
    }
}
