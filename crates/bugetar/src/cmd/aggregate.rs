//! bugetar-aggregate - Aggregate budget execution data.
//!
//! Reads an aggregate request (filter, grouping, sort and page) from a JSON
//! file and either shows what it compiles to or runs it against a dataset
//! snapshot.
//!
//! # Usage
//!
//! ```bash
//! bugetar-aggregate explain request.json
//! bugetar-aggregate explain request.json --count
//! bugetar-aggregate key request.json
//! bugetar-aggregate run request.json --dataset dataset.json --rates rates.json -f csv
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` (e.g. `RUST_LOG=bugetar_engine=debug`)
//! to see cache and plan details.

use anyhow::{Context, Result};
use bugetar_core::Dataset;
use bugetar_engine::{AggregationEngine, EngineConfig, MemoryStorage};
use bugetar_query::{aggregate_key, compile, AggregateRequest, ExchangeRates};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::output::{write_result, OutputFormat};

/// Explain, key or run aggregate requests.
#[derive(Parser, Debug)]
#[command(name = "bugetar-aggregate")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, value_name = "OUTPUT_FILE", global = true)]
    output: Option<PathBuf>,

    /// Log debug details to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SQL and parameters a request compiles to
    Explain {
        /// Request file, or - for stdin
        #[arg(value_name = "REQUEST")]
        request: PathBuf,

        /// Show the count query instead of the rows query
        #[arg(long)]
        count: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the cache key of a request
    Key {
        /// Request file, or - for stdin
        #[arg(value_name = "REQUEST")]
        request: PathBuf,
    },

    /// Run a request against a dataset file
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Request file, or - for stdin
    #[arg(value_name = "REQUEST")]
    request: PathBuf,

    /// Dataset snapshot (JSON)
    #[arg(short, long, value_name = "DATASET")]
    dataset: PathBuf,

    /// Exchange rates as a JSON object of year to RON per EUR
    /// (default: built-in annual averages)
    #[arg(short, long, value_name = "RATES")]
    rates: Option<PathBuf>,

    /// Engine configuration (JSON)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Storage timeout in milliseconds (overrides the config file)
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Fail on years without an exchange rate instead of using 1
    #[arg(long)]
    strict_rates: bool,

    /// Output format (text, csv, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

/// Main entry point for the aggregate command.
pub fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = match &args.output {
        Some(path) => File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                run(&args, &mut writer)?;
                writer.flush()?;
                Ok(())
            }),
        None => run(&args, &mut io::stdout().lock()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Run a parsed command, writing its output to `writer`.
pub fn run<W: Write>(args: &Args, writer: &mut W) -> Result<()> {
    match &args.command {
        Command::Explain {
            request,
            count,
            json,
        } => explain(request, *count, *json, writer),
        Command::Key { request } => {
            let request: AggregateRequest = read_json(request, "request")?;
            let key = aggregate_key(&request).context("failed to derive cache key")?;
            writeln!(writer, "{key}")?;
            Ok(())
        }
        Command::Run(run_args) => run_request(run_args, writer),
    }
}

fn explain<W: Write>(path: &Path, count: bool, json: bool, writer: &mut W) -> Result<()> {
    let request: AggregateRequest = read_json(path, "request")?;
    let filter = request.filter.validate().context("invalid filter")?;
    let plan = compile(&filter, request.grouping, &request.options())
        .with_context(|| format!("failed to compile {} grouping", request.grouping))?;

    let statement = if count {
        plan.count_statement()
    } else {
        plan.statement()
    };

    if json {
        let output = serde_json::json!({
            "sql": statement.sql,
            "params": statement.params,
            "yearly": plan.yearly,
        });
        writeln!(writer, "{}", serde_json::to_string_pretty(&output)?)?;
    } else {
        writeln!(writer, "{}", statement.sql)?;
        for (i, param) in statement.params.iter().enumerate() {
            writeln!(writer, "-- ${} = {param}", i + 1)?;
        }
    }
    Ok(())
}

fn run_request<W: Write>(args: &RunArgs, writer: &mut W) -> Result<()> {
    let request: AggregateRequest = read_json(&args.request, "request")?;
    let dataset: Dataset = read_json(&args.dataset, "dataset")?;
    debug!(
        line_items = dataset.line_items.len(),
        entities = dataset.entities.len(),
        uats = dataset.uats.len(),
        "loaded dataset"
    );

    let mut config = match &args.config {
        Some(path) => {
            let text = read_text(path, "config")?;
            EngineConfig::from_json(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config.storage_timeout_ms = timeout_ms;
    }
    config.strict_exchange_rates |= args.strict_rates;

    let rates = match &args.rates {
        Some(path) => {
            let table: BTreeMap<i32, Decimal> = read_json(path, "exchange rates")?;
            table.into_iter().collect::<ExchangeRates>()
        }
        None => ExchangeRates::bnr_annual_averages(),
    }
    .strict(config.strict_exchange_rates);
    if rates.is_empty() {
        warn!("exchange rate table is empty");
    }
    debug!(years = rates.len(), strict = rates.is_strict(), "loaded exchange rates");

    let storage = MemoryStorage::new(dataset);
    let names = storage.dataset();
    let engine = AggregationEngine::new(storage, config)
        .with_lookup(names)
        .with_rates(rates);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime
        .block_on(engine.get_aggregates(&request))
        .with_context(|| format!("failed to aggregate {}", args.request.display()))?;

    write_result(&result, args.format, writer)
}

fn read_text(path: &Path, what: &str) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .with_context(|| format!("failed to read {what} from stdin"))?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read {what} {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = read_text(path, what)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {what} {}", path.display()))
}
