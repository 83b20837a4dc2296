//! mssql-table-sync CLI - job-gated MSSQL table replication.

use clap::{Parser, Subcommand};
use mssql_table_sync::{
    latest_report, open_control_store, ChangeTracking, Config, DispatchMode, Orchestrator,
    SyncError,
};
use mssql_table_sync::orchestrator::pools::MssqlPool;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-table-sync")]
#[command(about = "Replicate MSSQL tables through tempdb staging")]
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
    /// Copy every source table when the job is enabled
    Run {
        /// Override the job name
        #[arg(long)]
        job_name: Option<String>,

        /// Override tables per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override retries per table
        #[arg(long)]
        max_retries: Option<u32>,

        /// Run the tables of each batch one at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Create the jobs, job_tables and log_details tables
    InitSchema,

    /// Manage jobs in the control database
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Show the outcomes of the job's latest run
    Report {
        /// Override the job name
        #[arg(long)]
        job_name: Option<String>,
    },

    /// Test database connections
    HealthCheck,

    /// Enable change tracking on the source database and its tables
    EnableChangeTracking {
        /// Days of change tracking history to retain
        #[arg(long, default_value = "2")]
        retention_days: u32,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Register a job (enabled)
    Register { name: String },

    /// Enable a job
    Enable { name: String },

    /// Disable a job
    Disable { name: String },

    /// List registered jobs
    List,
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

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(SyncError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            job_name,
            batch_size,
            max_retries,
            sequential,
        } => {
            if let Some(name) = job_name {
                config.sync.job_name = name;
            }
            if let Some(size) = batch_size {
                config.sync.batch_size = size;
            }
            if let Some(retries) = max_retries {
                config.sync.max_retries = retries;
            }
            if sequential {
                config.sync.dispatch = DispatchMode::Sequential;
            }
            config.validate()?;

            let orchestrator = Orchestrator::new(config).await?;
            let result = match orchestrator.run().await {
                Ok(result) => result,
                Err(SyncError::GateDisabled(_)) => {
                    println!("The job is disabled or not found in the jobs list");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("\nTable copy process completed.");
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!(
                    "  Tables: {}/{} succeeded, {} failed, {} skipped",
                    result.tables_succeeded,
                    result.tables_total,
                    result.tables_failed,
                    result.tables_skipped
                );
                if !result.failed_tables.is_empty() {
                    println!("  Failed tables: {:?}", result.failed_tables);
                }
                if !result.unrecorded_tables.is_empty() {
                    println!("  Outcomes not recorded: {:?}", result.unrecorded_tables);
                }
            }
        }

        Commands::InitSchema => {
            open_control_store(&config).await?;
            println!("Control tables are ready");
        }

        Commands::Job { action } => {
            let store = open_control_store(&config).await?;
            match action {
                JobAction::Register { name } => {
                    let job = store.register_job(&name).await?;
                    println!("Job {} registered (id {})", job.job_name, job.job_id);
                }
                JobAction::Enable { name } => {
                    if !store.set_job_enabled(&name, true).await? {
                        return Err(SyncError::Config(format!("Job '{}' is not registered", name)));
                    }
                    println!("Job {} enabled", name);
                }
                JobAction::Disable { name } => {
                    if !store.set_job_enabled(&name, false).await? {
                        return Err(SyncError::Config(format!("Job '{}' is not registered", name)));
                    }
                    println!("Job {} disabled", name);
                }
                JobAction::List => {
                    let jobs = store.list_jobs().await?;
                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(&jobs)?);
                    } else {
                        for job in jobs {
                            println!(
                                "  {:>4}  {:<30}  {}",
                                job.job_id,
                                job.job_name,
                                if job.is_enabled { "enabled" } else { "disabled" }
                            );
                        }
                    }
                }
            }
        }

        Commands::Report { job_name } => {
            if let Some(name) = job_name {
                config.sync.job_name = name;
            }
            let store = open_control_store(&config).await?;
            let report = latest_report(store.as_ref(), store.as_ref(), &config.sync.job_name).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                match report.run_id {
                    Some(run_id) => println!("Job {} - run {}", report.job_name, run_id),
                    None => println!("Job {} has no recorded runs", report.job_name),
                }
                for outcome in &report.outcomes {
                    println!(
                        "  {:<40} {:<10} {}",
                        outcome.table_name,
                        outcome.status.to_string(),
                        outcome.message.as_deref().unwrap_or("")
                    );
                }
                println!(
                    "\n  {} succeeded, {} failed, {} skipped",
                    report.succeeded, report.failed, report.skipped
                );
            }
        }

        Commands::HealthCheck => {
            let result = Orchestrator::health_check(&config).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for role in &result.roles {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        role.role,
                        role.endpoint,
                        if role.connected { "OK" } else { "FAILED" },
                        role.latency_ms
                    );
                    if let Some(ref err) = role.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(SyncError::Config("Health check failed".to_string()));
            }
        }

        Commands::EnableChangeTracking { retention_days } => {
            let pool = MssqlPool::new(config.source.clone(), 1).await?;
            let report = ChangeTracking::new(&pool).enable(retention_days).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Change tracking enabled on {}", report.database);
                println!("  Tables enabled: {}", report.enabled.len());
                println!("  Already enabled: {}", report.already_enabled.len());
                for (table, error) in &report.failed {
                    println!("  Failed: {} - {}", table, error);
                }
            }
        }
    }

    Ok(())
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
