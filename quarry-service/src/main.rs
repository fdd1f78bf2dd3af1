//! `quarry` command line.
//!
//! Every command prints JSON on stdout. Failures print a JSON error object
//! carrying the stable error kind on stderr and exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use quarry_core::{ParamMap, QuarryConfig, QuarryError};
use quarry_service::{init_tracing, QueryService, TelemetryConfig};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Deterministic, cached access to named queries")]
struct Cli {
    /// Directory of query spec files (overrides QUARRY_SPEC_DIR).
    #[arg(long, value_name = "DIR", global = true)]
    spec_dir: Option<PathBuf>,

    /// Root directory for file-backed datasets (overrides QUARRY_DATA_DIR).
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered query ids.
    List,
    /// Print the registered spec of a query.
    Show { id: String },
    /// Run a query through the cache.
    Run {
        id: String,
        /// Cache TTL in seconds; 0 or less bypasses the cache.
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
        /// Override parameter, repeatable (e.g. --set year=2022).
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        overrides: Vec<(String, Value)>,
    },
    /// Drop the cached result of a query.
    Invalidate { id: String },
    /// Print cache statistics.
    Stats,
}

/// Parse `key=value`. The value is read as JSON when it parses, otherwise
/// taken as a plain string.
fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(&TelemetryConfig::default()) {
        eprintln!("{e}");
    }

    match run(cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to render output: {e}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            tracing::debug!(error = %err, "command failed");
            let body = json!({
                "error": {
                    "kind": err.kind(),
                    "message": err.public_message(),
                }
            });
            eprintln!("{body}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Value, QuarryError> {
    let mut config = QuarryConfig::from_env()?;
    if let Some(dir) = cli.spec_dir {
        config = config.with_spec_dir(dir);
    }
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    let service = QueryService::from_config(&config)?;

    match cli.command {
        Commands::List => to_value(service.list_query_ids()),
        Commands::Show { id } => to_value(service.get_query_spec(&id)?),
        Commands::Run { id, ttl, overrides } => {
            let overrides: ParamMap = overrides.into_iter().collect();
            let params = (!overrides.is_empty()).then_some(&overrides);
            to_value(service.run_query(&id, ttl, params).await?)
        }
        Commands::Invalidate { id } => to_value(service.invalidate_query(&id).await?),
        Commands::Stats => to_value(service.stats().await?),
    }
}

fn to_value(output: impl Serialize) -> Result<Value, QuarryError> {
    Ok(serde_json::to_value(output).unwrap_or(Value::Null))
}
