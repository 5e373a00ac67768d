use clap::Parser;
use std::path::PathBuf;

use rust_cep_coords::config::{Config, DEFAULT_LOG_FILE};
use rust_cep_coords::input::read_input;
use rust_cep_coords::logging::init_logging;
use rust_cep_coords::pipeline::{Pipeline, PipelineOptions, RunOutcome};
use rust_cep_coords::result_store::ResultStore;
use rust_cep_coords::services::{NominatimGeocoder, ViaCepResolver};

const BANNER: &str = "
CEP to coordinates (latitude and longitude).

Receives a list of Brazilian postal codes and writes the latitude and
longitude of each one, based on ViaCEP addresses and OpenStreetMap
(Nominatim) searches.
";

/// Geocodes a spreadsheet of Brazilian postal codes.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Spreadsheet (.xlsx, .xls, .ods) or CSV export with ID and CEP columns
    input: Option<PathBuf>,
}

/// Main entry point for the batch.
///
/// Initializes logging, checks the argument, loads configuration, reads the
/// input rows and runs the pipeline against the output directory. An abort
/// caused by the resolver is not a process error: partial results are already
/// saved and the next invocation resumes from them.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env();
    let _log_guard = init_logging(&log_file_for(&config))?;

    println!("{}", BANNER);
    tracing::info!("Starting");

    let Some(input) = cli.input else {
        tracing::error!("A spreadsheet file wasn't passed as an argument");
        tracing::info!("You should pass a spreadsheet as an argument: rust-cep-coords <file.xlsx|file.csv>");
        return Ok(());
    };

    let config = config.map_err(|e| {
        tracing::error!("Invalid configuration: {:#}", e);
        e
    })?;
    config.log_settings();

    tracing::info!("Loading file {}", input.display());
    let rows = read_input(&input)?;
    tracing::info!("{} rows read", rows.len());

    let resolver = ViaCepResolver::new(&config)?;
    let geocoder = NominatimGeocoder::new(&config)?;
    let pipeline = Pipeline::with_options(
        resolver,
        geocoder,
        PipelineOptions {
            progress_every: config.progress_every,
        },
    );

    let store = ResultStore::new(&config.output_dir);
    let report = pipeline.run(&rows, &store).await?;

    match &report.outcome {
        RunOutcome::Completed => tracing::info!("Done!"),
        RunOutcome::Aborted(reason) => {
            tracing::warn!(
                "Stopped early ({}); {} rows saved, run again to resume after ID {}",
                reason,
                report.processed,
                report.state.last_processed_id
            );
        }
    }

    Ok(())
}

/// Log file to open even when the rest of the configuration is invalid, so
/// the error itself reaches the log.
fn log_file_for(config: &anyhow::Result<Config>) -> PathBuf {
    config
        .as_ref()
        .map(|c| c.log_file.clone())
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_FILE))
}
