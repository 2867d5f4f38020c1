use crate::{
    io, ChromeSessionFactory, LookupResult, Metrics, RunConfig, Scheduler, SolverClient,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "registry-lookup")]
#[command(about = "Bulk registry status lookups through a browser-driven form")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Number of browser workers")]
    pub workers: Option<usize>,

    #[arg(long, help = "Maximum concurrent tasks")]
    pub max_concurrent: Option<usize>,

    #[arg(long, help = "Maximum attempts per identifier")]
    pub max_retries: Option<u32>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Challenge solver API key")]
    pub api_key: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Look up identifiers from a CSV file
    Run {
        #[arg(short, long, help = "Input CSV with identifiers in the first column")]
        input: PathBuf,

        #[arg(short, long, help = "Output CSV path")]
        output: PathBuf,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,

        #[arg(long, help = "Overall run deadline in seconds")]
        deadline: Option<u64>,
    },

    /// Look up a single identifier and print the result
    Single {
        #[arg(short, long, help = "Identifier to look up")]
        identifier: String,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

pub struct CliRunner {
    pub config: RunConfig,
    metrics: Arc<Metrics>,
}

impl CliRunner {
    pub fn new(config: RunConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        Ok(Self {
            config,
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub async fn run(
        &self,
        command: Commands,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Run {
                input,
                output,
                progress_interval,
                deadline,
            } => {
                self.run_batch(input, output, progress_interval, deadline, cancel)
                    .await
            }
            Commands::Single { identifier } => self.run_single(identifier, cancel).await,
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    async fn run_batch(
        &self,
        input: PathBuf,
        output: PathBuf,
        progress_interval: Option<u64>,
        deadline: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let identifiers = io::read_identifiers(&input)?;
        info!(
            count = identifiers.len(),
            input = %input.display(),
            "loaded identifiers"
        );
        if identifiers.is_empty() {
            warn!("input file contains no identifiers");
            io::write_results(&output, &[])?;
            return Ok(());
        }

        let mut config = self.config.clone();
        if let Some(seconds) = progress_interval {
            config.progress_interval = Some(Duration::from_secs(seconds));
        }
        if let Some(seconds) = deadline {
            config.run_deadline = Some(Duration::from_secs(seconds));
        }

        let start = Instant::now();
        let results = self.execute(config, identifiers, cancel).await?;
        io::write_results(&output, &results)?;
        info!(output = %output.display(), "results written");

        print_summary(&results, start.elapsed());
        Ok(())
    }

    async fn run_single(
        &self,
        identifier: String,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut config = self.config.clone();
        config.worker_count = 1;
        config.max_concurrent_tasks = config.max_concurrent_tasks.max(1);

        let results = self.execute(config, vec![identifier], cancel).await?;
        let result = results
            .into_iter()
            .next()
            .ok_or("no result produced")?;

        println!("Identifier: {}", result.identifier);
        println!("Status: {:?}", result.status);
        println!("Attempts: {}", result.attempts);
        println!("Duration: {}", io::format_duration(result.elapsed));
        match (&result.fields, &result.error) {
            (Some(fields), _) => {
                println!("  First surname: {}", fields.first_surname);
                println!("  Second surname: {}", fields.second_surname);
                println!("  First name: {}", fields.first_name);
                println!("  Other names: {}", fields.other_names);
                println!("  Registry status: {}", fields.status);
            }
            (None, Some(error)) => {
                println!("  Error: {error}");
                return Err(format!("lookup failed: {error}").into());
            }
            (None, None) => {}
        }
        Ok(())
    }

    async fn validate_config(&self, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        println!("Validating configuration: {}", path.display());

        let content = tokio::fs::read_to_string(&path).await?;
        let config: RunConfig = serde_json::from_str(&content)?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Base URL: {}", config.base_url);
        println!("  Workers: {}", config.worker_count);
        println!("  Max concurrent: {}", config.max_concurrent_tasks);
        println!("  Max retries: {}", config.max_retries);
        println!("  Per-task timeout: {:?}", config.per_task_timeout);
        println!("  Solver poll attempts: {}", config.solver.max_poll_attempts);
        Ok(())
    }

    async fn execute(
        &self,
        config: RunConfig,
        identifiers: Vec<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<LookupResult>, Box<dyn std::error::Error>> {
        let factory =
            ChromeSessionFactory::new(config.browser.clone(), config.resources.clone());
        let solver = SolverClient::new(config.solver.clone());
        let scheduler = Scheduler::new(config, factory, solver, self.metrics.clone())?;
        Ok(scheduler.run(identifiers, cancel).await)
    }
}

fn print_summary(results: &[LookupResult], elapsed: Duration) {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = total - succeeded;
    let avg = if total > 0 {
        elapsed / total as u32
    } else {
        Duration::ZERO
    };

    info!(
        total,
        succeeded,
        failed,
        elapsed = %io::format_duration(elapsed),
        avg_per_lookup = %io::format_duration(avg),
        "run completed"
    );
    println!(
        "Completed {total} lookups in {}: {succeeded} succeeded ({:.1}%), {failed} failed",
        io::format_duration(elapsed),
        if total > 0 {
            succeeded as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    );
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
