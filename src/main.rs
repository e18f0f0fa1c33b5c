//! FlowEdit - Prompt-Driven Video Editing Job Service
//!
//! Entry point: serves the job API or runs one-off probes and edits from the
//! command line.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowedit::cli::{Args, Commands};
use flowedit::config::Config;
use flowedit::dispatcher::JobDispatcher;
use flowedit::intake::{Submission, Upload};
use flowedit::job::{JobRegistry, JobState};
use flowedit::media::MediaProberFactory;
use flowedit::server::{build_router, serve, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file; the guard flushes the file on exit
    let _log_guard = setup_logging(args.verbose)?;

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Serve { bind } => {
            config.storage.ensure_dirs().await?;

            let registry = Arc::new(JobRegistry::new());
            let dispatcher = Arc::new(JobDispatcher::from_config(&config, registry));
            let router = build_router(AppState::new(dispatcher), config.server.max_upload_bytes);

            let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());
            match config.server.max_concurrent_jobs {
                Some(limit) => info!("Running at most {} jobs at once", limit),
                None => info!("Job concurrency is unbounded"),
            }
            serve(router, &bind_address)
                .await
                .with_context(|| format!("HTTP server on {} failed", bind_address))?;
        }
        Commands::Probe { input } => {
            let prober = MediaProberFactory::create_prober(config.probe.clone());
            let media = prober.probe(&input).await?;
            println!("{:<10} {}", "Width", media.width);
            println!("{:<10} {}", "Height", media.height);
            println!("{:<10} {}", "Frames", media.frame_count);
        }
        Commands::Edit { input, prompt, inversion_prompt } => {
            info!("Editing video file: {}", input.display());
            config.storage.ensure_dirs().await?;

            let data = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let filename = input
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            let registry = Arc::new(JobRegistry::new());
            let dispatcher = JobDispatcher::from_config(&config, registry.clone());
            let ticket = dispatcher
                .submit(Submission {
                    video: Some(Upload { filename, data }),
                    prompt: Some(prompt),
                    inversion_prompt,
                })
                .await?;

            let id = ticket.id.clone();
            info!("Started job {}", id);
            let state = ticket.wait().await;
            let job = registry.get(&id).await;

            match (state, job) {
                (JobState::Completed, Some(job)) => {
                    let result = job.result_path.unwrap_or_default();
                    println!("Edited video: {}", result.display());
                }
                (_, job) => {
                    let reason = job.and_then(|job| job.failure).unwrap_or_else(|| "unknown error".to_string());
                    anyhow::bail!("Job {} failed: {}", id, reason);
                }
            }
        }
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".flowedit").join("log");
    setup_logging_in(&log_dir, verbose)
}

/// Log to the console and to a daily file under `log_dir`
fn setup_logging_in(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    // Create log directory
    std::fs::create_dir_all(log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(log_dir, "flowedit.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    subscriber.try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("flowedit.log").display());

    Ok(guard)
}
