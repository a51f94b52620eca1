mod local;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{info, warn};
use pipeline::{Job, JobPool, LogNotifier, PipelineConfig, Reclaimer};

use crate::local::{DirectorySink, PassthroughResolver};

/// Transcode-and-upload job daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every job in a JSON job file, then exit
    Run {
        /// JSON array of jobs
        #[arg(short, long)]
        jobs: PathBuf,

        /// Override the configured worker count
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Sweep the scratch root once
    Sweep {
        /// Wipe the scratch root if free space is below `min_free_gb`
        #[arg(long)]
        emergency: bool,
    },
    /// Print scratch root usage as JSON
    Usage,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    let cfg = PipelineConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    let reclaimer = Arc::new(Reclaimer::from_config(&cfg));

    match args.command {
        Command::Run { jobs, workers } => run(cfg, reclaimer, &jobs, workers).await,
        Command::Sweep { emergency } => sweep(&cfg, &reclaimer, emergency),
        Command::Usage => {
            let snapshot = reclaimer.usage_snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

fn load_jobs(path: &Path) -> Result<Vec<Job>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    let jobs: Vec<Job> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", path.display()))?;
    Ok(jobs)
}

async fn run(cfg: PipelineConfig, reclaimer: Arc<Reclaimer>, jobs_path: &Path, workers: Option<usize>) -> Result<()> {
    let workers = workers.unwrap_or(cfg.worker_count);
    if workers == 0 {
        bail!("worker count must be at least 1");
    }

    info!("Pipeline starting at {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("Configuration loaded:");
    info!("  Scratch root: {}", cfg.scratch_root.display());
    info!("  Output dir: {}", cfg.output_dir.display());
    info!("  Transcoder: {}", cfg.transcode_bin.display());
    info!("  Workers: {}", workers);
    info!("  Sweep interval: {}s (max age {}s)", cfg.sweep_interval_secs, cfg.max_temp_age_secs);

    reclaimer.ensure_root()?;
    fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", cfg.output_dir.display()))?;

    match reclaimer.emergency_sweep(cfg.min_free_gb) {
        Ok(true) => warn!("Scratch root wiped on startup due to low disk space"),
        Ok(false) => {}
        Err(e) => warn!("Startup disk check failed: {:#}", e),
    }

    let jobs = load_jobs(jobs_path)?;
    info!("Loaded {} job(s) from {}", jobs.len(), jobs_path.display());

    let pool = JobPool::new(
        &cfg,
        Arc::new(PassthroughResolver),
        Arc::new(DirectorySink::new(&cfg.output_dir, Arc::clone(&reclaimer))),
        Arc::new(LogNotifier),
    );
    for job in jobs {
        let label = job.label();
        let position = pool.enqueue(job);
        info!("Queued {} at position {}", label, position);
    }
    pool.start_workers(workers);

    let sweeper = tokio::spawn(Arc::clone(&reclaimer).run_periodic());

    tokio::select! {
        _ = pool.wait_until_idle() => {
            info!("✅ All jobs finished");
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("🛑 Shutdown requested, waiting up to {}s for running jobs", cfg.drain_timeout_secs);
            if !pool.wait_idle(cfg.drain_timeout()).await {
                warn!("Queue did not drain in time, stopping running jobs");
            }
        }
    }

    pool.close().await;
    sweeper.abort();

    let flushed = reclaimer.flush_scheduled();
    if flushed.files_removed > 0 {
        info!("Removed {} scheduled file(s) on shutdown", flushed.files_removed);
    }

    let stats = pool.get_stats();
    info!("Final statistics: {}", serde_json::to_string(&stats)?);
    Ok(())
}

fn sweep(cfg: &PipelineConfig, reclaimer: &Reclaimer, emergency: bool) -> Result<()> {
    if emergency {
        let wiped = reclaimer
            .emergency_sweep(cfg.min_free_gb)
            .context("Emergency sweep failed")?;
        if wiped {
            info!("Scratch root wiped: {}", reclaimer.scratch_root().display());
        } else {
            info!("Enough free space, nothing wiped");
        }
        return Ok(());
    }

    let report = reclaimer.tick().context("Sweep failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
