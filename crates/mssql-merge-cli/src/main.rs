//! mssql-merge CLI - merge two SQL Server databases without identity collisions.

use clap::{Parser, Subcommand};
use mssql_merge::{
    Config, DatabaseConfig, MergeError, MergeReport, Merger, MssqlDatabase, SchemaCatalog,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-merge")]
#[command(about = "Merge two SQL Server databases sharing one schema")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the tenant, renumber the source and copy it into the destination
    Run,

    /// Show offsets and affected tables without changing anything
    Plan,

    /// Renumber source identity columns only
    Renumber,

    /// Copy an already renumbered source into the destination
    Copy,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MergeError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(MergeError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    if let Commands::HealthCheck = cli.command {
        return health_check(&config, cli.output_json).await;
    }

    let source = MssqlDatabase::connect(&config.source).await?;
    let destination = match MssqlDatabase::connect(&config.destination).await {
        Ok(db) => db,
        Err(e) => {
            close_quietly(source).await;
            return Err(e);
        }
    };

    let result = execute(&cli, &config, &source, &destination).await;

    close_quietly(source).await;
    close_quietly(destination).await;
    result
}

async fn execute(
    cli: &Cli,
    config: &Config,
    source: &MssqlDatabase,
    destination: &MssqlDatabase,
) -> Result<(), MergeError> {
    let merger = Merger::new(source, destination, config);

    let report = match cli.command {
        Commands::Plan => {
            let plan = merger.plan().await?;
            if cli.output_json {
                println!("{}", plan.to_json()?);
            } else {
                println!("\nMerge plan ({}):", plan.offset_strategy);
                println!("  Default offset: {}", plan.default_offset);
                for entry in &plan.column_offsets {
                    println!("  Offset {}: {}", entry.column, entry.offset);
                }
                println!("  Identity columns: {}", plan.identity_columns.len());
                for column in &plan.identity_columns {
                    println!("    {}", column);
                }
                println!("  Tables to copy: {}", plan.tables_to_copy.len());
                println!("  Excluded tables: {}", plan.excluded_tables.len());
            }
            return Ok(());
        }
        Commands::Run => merger.run().await?,
        Commands::Renumber => merger.renumber().await?,
        Commands::Copy => merger.copy().await?,
        Commands::HealthCheck => return Ok(()),
    };

    if cli.output_json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &MergeReport) {
    println!("\nMerge completed!");
    println!("  Run ID: {}", report.run_id);
    println!("  {} -> {}", report.source, report.destination);
    println!("  Duration: {:.2}s", report.duration_seconds);
    if !report.offset_strategy.is_empty() {
        println!(
            "  Offset: {} ({})",
            report.default_offset, report.offset_strategy
        );
    }
    for stamp in &report.tenant_stamps {
        println!("  Tenant column set in {}: {} rows", stamp.table, stamp.rows_updated);
    }
    println!("  Columns renumbered: {}", report.renumbered.len());
    println!("  Tables copied: {}", report.tables.len());
    println!("  Rows: {}", report.rows_copied);
    if report.conflicts > 0 {
        let tables: Vec<&str> = report
            .tables
            .iter()
            .filter(|t| t.status == mssql_merge::CopyStatus::Conflict)
            .map(|t| t.table.as_str())
            .collect();
        println!("  Conflicts: {} {:?}", report.conflicts, tables);
    }
}

async fn health_check(config: &Config, output_json: bool) -> Result<(), MergeError> {
    let source = reach(&config.source).await;
    let destination = reach(&config.destination).await;
    let healthy = source.connected && destination.connected;

    if output_json {
        let result = serde_json::json!({
            "source_connected": source.connected,
            "source_latency_ms": source.latency_ms,
            "source_error": source.error,
            "destination_connected": destination.connected,
            "destination_latency_ms": destination.latency_ms,
            "destination_error": destination.error,
            "healthy": healthy,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Health Check Results:");
        for (label, status) in [("Source", &source), ("Destination", &destination)] {
            println!(
                "  {}: {} ({}ms)",
                label,
                if status.connected { "OK" } else { "FAILED" },
                status.latency_ms
            );
            if let Some(ref err) = status.error {
                println!("    Error: {}", err);
            }
        }
        println!(
            "\n  Overall: {}",
            if healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    if !healthy {
        return Err(MergeError::connection("Health check failed", "health-check"));
    }
    Ok(())
}

struct Reachability {
    connected: bool,
    latency_ms: u64,
    error: Option<String>,
}

async fn ping(db: &DatabaseConfig) -> Result<Duration, MergeError> {
    let conn = MssqlDatabase::connect(db).await?;
    let latency = conn.ping().await;
    close_quietly(conn).await;
    latency
}

async fn reach(db: &DatabaseConfig) -> Reachability {
    match ping(db).await {
        Ok(latency) => Reachability {
            connected: true,
            latency_ms: latency.as_millis() as u64,
            error: None,
        },
        Err(e) => Reachability {
            connected: false,
            latency_ms: 0,
            error: Some(e.to_string()),
        },
    }
}

async fn close_quietly(db: MssqlDatabase) {
    let name = db.database_name().to_string();
    if let Err(e) = db.close().await {
        warn!("Failed to close session for {}: {}", name, e);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
