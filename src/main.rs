use clap::Parser;
use registry_lookup::{setup_logging, Cli, CliRunner, RunConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting registry-lookup v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    let runner = CliRunner::new(config)?;

    let cancel = CancellationToken::new();
    let _signal_handler = setup_shutdown_handler(cancel.clone());

    let result = runner.run(args.command, cancel.clone()).await;

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("registry-lookup stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let mut config = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path).await?;
        serde_json::from_str(&content)?
    } else {
        RunConfig::default()
    };

    if let Some(workers) = args.workers {
        config.worker_count = workers;
        if config.max_concurrent_tasks < workers {
            config.max_concurrent_tasks = workers;
        }
    }
    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent_tasks = max_concurrent;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.browser.chrome_path = Some(chrome_path.clone());
    }
    if let Some(api_key) = &args.api_key {
        config.solver.api_key = api_key.clone();
    }

    config.validate()?;

    info!("Configuration loaded");
    info!("Workers: {}", config.worker_count);
    info!("Max concurrent tasks: {}", config.max_concurrent_tasks);
    info!("Max retries: {}", config.max_retries);

    Ok(config)
}

fn setup_shutdown_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to create SIGINT handler");
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to create SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        cancel.cancel();
    })
}
