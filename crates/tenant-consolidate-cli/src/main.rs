//! tenant-consolidate CLI - merge tenant partitions into one unified collection.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tenant_consolidate::{Config, ConflictMode, ConsolidateError, Consolidator, RunStatus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code for a run stopped by SIGINT/SIGTERM.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "tenant-consolidate")]
#[command(about = "Consolidate tenant-partitioned records into a unified collection")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Print the result as JSON on stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    /// Only process these partitions (repeatable, replaces the configured list)
    #[arg(long = "partition", value_name = "NAME", global = true)]
    partitions: Vec<String>,

    /// Override records per atomic write
    #[arg(long, global = true)]
    batch_limit: Option<usize>,

    /// Override duplicate-avoidance strategy: check-then-insert or insert-if-absent
    #[arg(long, global = true)]
    conflict_mode: Option<ConflictMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Consolidate all configured partitions (default)
    Run,

    /// Show per-partition counts in the unified collection without migrating
    Verify,

    /// Test store connectivity and partition readability
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, ConsolidateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);
    apply_overrides(&mut config, &cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let cancel_token = setup_signal_handler();
            let consolidator = Consolidator::new(config).await?;
            let report = consolidator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report);
            }

            if report.status == RunStatus::Cancelled {
                return Ok(ExitCode::from(EXIT_CANCELLED));
            }
        }

        Commands::Verify => {
            let consolidator = Consolidator::new(config).await?;
            let tally = consolidator.verify_only().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&tally)?);
            } else {
                print!("{}", tally);
            }
        }

        Commands::HealthCheck => {
            let consolidator = Consolidator::new(config).await?;
            let result = consolidator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Store ({}): {} ({}ms)",
                    result.store_type,
                    if result.store_connected { "OK" } else { "FAILED" },
                    result.store_latency_ms
                );
                if let Some(ref err) = result.store_error {
                    println!("    Error: {}", err);
                }
                for p in &result.partitions {
                    println!(
                        "  Partition {}: {}",
                        p.partition,
                        if p.readable { "OK" } else { "UNREADABLE" }
                    );
                    if let Some(ref err) = p.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(ConsolidateError::Unavailable(
                    "Health check failed".to_string(),
                ));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Apply command-line overrides and re-validate.
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<(), ConsolidateError> {
    if !cli.partitions.is_empty() {
        config.consolidation.partitions = cli.partitions.clone();
    }
    if let Some(limit) = cli.batch_limit {
        config.consolidation.batch_limit = Some(limit);
    }
    if let Some(mode) = cli.conflict_mode {
        config.consolidation.conflict_mode = mode;
    }
    config.validate()
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries the report only
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Finishing the current partition, then verifying...",
                        name
                    );
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to set up {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!("\nReceived Ctrl-C. Finishing the current partition, then verifying...");
                token.cancel();
            }
            Err(e) => warn!("Failed to set up Ctrl-C handler: {}", e),
        }
    });

    cancel_token
}
