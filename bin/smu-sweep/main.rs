mod config;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{LevelFilter, error, info};
use rusty_smu::{
    CancellationFlag, Column, InstrumentConnection, MeasurementTable, Orchestrator, RunHistory,
    RunRecord, ScriptLoader, SweepJob, SweepOutcome, SweepReport, SweepWorker, TableStore,
    plot_transfer, read_error_queue,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{AppConfig, load_config_or_default};

/// Keithley 2636B sweep tool
#[derive(Parser, Debug)]
#[command(name = "smu-sweep")]
#[command(about = "Transfer and output characteristics on a 2636B SMU", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override the instrument address (e.g. sim://bench, /dev/ttyUSB0)
    #[arg(short, long, value_name = "ADDRESS")]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open and close the instrument connection
    Probe,
    /// Pop one entry from the instrument error queue
    Errors,
    /// Forward and reverse transfer scans with live progress
    Transfer {
        #[arg(short, long)]
        sample: String,
        /// Plot both curves when done
        #[arg(long)]
        plot: bool,
    },
    /// Output characteristic read from the instrument buffers
    Output {
        #[arg(short, long)]
        sample: String,
    },
    /// Print a saved table
    Show { file: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config_or_default(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.instrument.address = address;
    }

    let log_level = args
        .log_level
        .unwrap_or_else(|| config.console.verbosity.clone());
    initialize_logging(&log_level)?;
    info!("=== smu-sweep ===");
    info!("Instrument: {}", config.instrument.address);

    match args.command {
        Command::Probe => {
            rusty_smu::probe(&config.connection_settings())?;
            println!("Connection to {} OK", config.instrument.address);
            Ok(())
        }
        Command::Errors => {
            let mut connection = InstrumentConnection::open(&config.connection_settings())?;
            let entry = read_error_queue(&mut connection)?;
            println!("{entry}");
            connection.close()?;
            Ok(())
        }
        Command::Transfer { sample, plot } => {
            let job = SweepJob::transfer(&sample, &config.sweep_scripts());
            let report = run_and_report(&config, job)?;
            if let Some(report) = report.filter(|_| plot) {
                for scan in &report.scans {
                    let title = format!("{sample} {}", scan.step.suffix);
                    plot_transfer(&scan.table, Some(&title))?;
                }
            }
            Ok(())
        }
        Command::Output { sample } => {
            let job = SweepJob::output(&sample, &config.sweep_scripts());
            run_and_report(&config, job)?;
            Ok(())
        }
        Command::Show { file } => show_table(&config, &file),
    }
}

/// Run `job` on a worker thread, print progress and record the outcome
///
/// Returns the report for completed runs, `None` when cancelled and an error
/// when the run failed.
fn run_and_report(
    config: &AppConfig,
    job: SweepJob,
) -> Result<Option<SweepReport>, Box<dyn std::error::Error>> {
    let cancel = setup_shutdown_handler()?;
    let job = job.with_cancel(cancel);
    let (name, sample) = (job.name.clone(), job.sample.clone());

    let orchestrator = Orchestrator::new(
        ScriptLoader::new(&config.scripts.dir),
        TableStore::new(&config.storage.output_dir),
    )
    .with_scripts(config.sweep_scripts());
    let connection = InstrumentConnection::open(&config.connection_settings())?;

    info!("Starting {name} measurement of {sample}...");
    let started = Instant::now();
    let handle = SweepWorker::spawn(connection, orchestrator, job)?;

    while !handle.is_finished() {
        if let Ok(snapshot) = handle.snapshots().recv_timeout(Duration::from_millis(200)) {
            print_progress(&snapshot.scan, &snapshot.table);
        }
    }
    for snapshot in handle.snapshots().try_iter() {
        print_progress(&snapshot.scan, &snapshot.table);
    }
    let outcome = handle.join();
    record_history(config, &name, &sample, &outcome, started.elapsed());

    match outcome {
        SweepOutcome::Completed(report) => {
            for scan in &report.scans {
                println!(
                    "✓ {}: {} rows -> {}",
                    scan.step.suffix,
                    scan.table.len(),
                    scan.path.display()
                );
            }
            info!(
                "✓ {name} measurement completed in {:.2} min",
                report.elapsed.as_secs_f64() / 60.0
            );
            Ok(Some(report))
        }
        SweepOutcome::Cancelled => {
            info!("{name} measurement of {sample} cancelled by user");
            println!("Measurement cancelled");
            Ok(None)
        }
        SweepOutcome::Failed(e) => {
            error!("✗ {name} measurement failed: {e}");
            Err(e.into())
        }
    }
}

fn print_progress(scan: &str, table: &MeasurementTable) {
    let last = table.row(table.len().saturating_sub(1)).unwrap_or_default();
    let values = table
        .columns()
        .iter()
        .zip(&last)
        .map(|(column, value)| format!("{column} = {value:e}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("[{scan}] #{}: {values}", table.len());
}

fn record_history(
    config: &AppConfig,
    name: &str,
    sample: &str,
    outcome: &SweepOutcome<SweepReport>,
    elapsed: Duration,
) {
    if !config.history.enabled {
        return;
    }
    let record = RunRecord::from_outcome(name, sample, outcome, elapsed);
    if let Err(e) = RunHistory::new(&config.history.path).append(&record) {
        error!("Could not record run history: {e}");
    }
}

fn show_table(config: &AppConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let table = TableStore::new(&config.storage.output_dir).load(file)?;
    let headers = table
        .columns()
        .iter()
        .map(Column::header)
        .collect::<Vec<_>>();
    println!("{}", headers.join("\t"));
    for row in table.rows() {
        let row = row.iter().map(|v| format!("{v:e}")).collect::<Vec<_>>();
        println!("{}", row.join("\t"));
    }
    println!("{} rows", table.len());

    if table.column(Column::ChannelCurrent).is_some() && !table.is_empty() {
        plot_transfer(&table, file.file_name().and_then(|name| name.to_str()))?;
    }
    Ok(())
}

/// Ctrl+C only raises the cancellation flag; the worker does the aborting
fn setup_shutdown_handler() -> Result<CancellationFlag, ctrlc::Error> {
    let cancel = CancellationFlag::new();
    let handler_flag = cancel.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received - cancelling measurement...");
        handler_flag.request();
    })?;

    Ok(cancel)
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}
