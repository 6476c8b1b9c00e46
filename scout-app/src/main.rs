use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use export::ExportSink;
use scout_common::observability::{LogConfig, init_logging};
use scout_common::record::{Completion, ResultSet};
use scout_common::{DiscoveryExhausted, ExhaustionReason, ScoutError};
use scout_config::{ScoutConfig, ScoutConfigLoader};
use scout_drivers::scout_browser::driver::ScoutDriver;
use scout_pipeline::{Pipeline, RunReport, candidate_source};
use scout_runtime::ScoutRuntime;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cli;
mod export;

const APP_NAME: &str = "storefront-scout";
const DEFAULT_CONFIG_FILE: &str = "storefront-scout.yaml";

const EXIT_STARTUP: u8 = 1;
const EXIT_DISCOVERY: u8 = 2;
const EXIT_EXPORT: u8 = 3;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            error!(target: "scout.app", error = %format!("{err:#}"), code, "app.failed");
            eprintln!("{APP_NAME}: {err:#}");
            ExitCode::from(code)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ScoutError>() {
        Some(ScoutError::DiscoveryFailed(_)) => EXIT_DISCOVERY,
        Some(ScoutError::Export(_)) => EXIT_EXPORT,
        _ => EXIT_STARTUP,
    }
}

/// Defaults < YAML file < `SCOUT_` environment < command-line flags.
fn load_config(cli: &Cli) -> Result<ScoutConfig, ScoutError> {
    let loader = match &cli.config {
        Some(path) => ScoutConfigLoader::new().with_file(path),
        None => ScoutConfigLoader::new().with_optional_file(DEFAULT_CONFIG_FILE),
    };
    let mut cfg = loader.load().map_err(|e| ScoutError::Config(e.to_string()))?;
    cli.apply(&mut cfg);
    cfg.validate().map_err(ScoutError::Config)?;
    Ok(cfg)
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli)?;
    let seeds = cli.seeds()?;

    let log_path = init_logging(LogConfig {
        app_name: APP_NAME,
        log_dir: cfg.logging.dir.clone(),
        emit_stderr: cfg.logging.emit_stderr,
        format: cfg.logging.format,
        default_filter: cfg.logging.filter.clone(),
    })
    .context("initialising logging")?;
    info!(target: "scout.app", log = %log_path.display(), max_results = cfg.max_results, "app.starting");

    let runtime = ScoutRuntime::build(APP_NAME, None)?;
    let _ctrl_c = runtime.cancel_on_ctrl_c();
    let cancel = runtime.handle().run_token();

    let outcome = runtime.block_on(execute(&cfg, seeds, cancel));
    runtime.shutdown(Duration::from_secs(2));

    let sink = ExportSink::new(&cfg.export);
    match outcome {
        Ok(report) => {
            let written = sink.write(&report.results)?;
            print_summary(&report, &written);
            Ok(())
        }
        Err(ScoutError::DiscoveryFailed(reason)) => {
            // Still leave an (empty) results file behind.
            let empty = ResultSet::new(
                Vec::new(),
                cfg.max_results,
                Completion::Exhausted(DiscoveryExhausted {
                    reason: ExhaustionReason::RetriesExhausted(reason.clone()),
                    pages_fetched: 0,
                    candidates_yielded: 0,
                }),
            );
            sink.write(&empty)?;
            Err(ScoutError::DiscoveryFailed(reason).into())
        }
        Err(err) => Err(err.into()),
    }
}

async fn execute(
    cfg: &ScoutConfig,
    seeds: Option<Vec<String>>,
    cancel: CancellationToken,
) -> Result<RunReport, ScoutError> {
    let source = candidate_source(cfg, seeds)?;
    let driver = ScoutDriver::connect(&cfg.browser).await?;
    Pipeline::new(cfg, driver, source, cancel)?.run().await
}

fn print_summary(report: &RunReport, written: &[std::path::PathBuf]) {
    let counts = report.results.status_counts();
    let with_contacts = report.results.iter().filter(|r| r.has_contacts()).count();
    info!(
        target: "scout.app",
        run_id = %report.run_id,
        records = report.results.len(),
        with_contacts,
        attempts = report.rate.attempts,
        blocks = report.rate.blocks,
        duplicates = report.offers.duplicates,
        "app.finished"
    );
    println!(
        "{} stores ({} with contacts) | {}",
        report.results.len(),
        with_contacts,
        counts
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    for path in written {
        println!("wrote {}", path.display());
    }
}
