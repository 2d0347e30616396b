use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidecast::config::Config;
use tidecast::error::{Error, LockError};
use tidecast::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "tidecast",
    version,
    about = "Automated social content pipeline with A/B experimentation",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file (falls back to environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull candidate content from the provider chain into the registry
    Collect {
        /// Queries to run, overriding the configured set (#tag or @user)
        #[arg(short, long)]
        query: Vec<String>,
    },

    /// Publish the next backlog item for each configured account
    Publish {
        /// Only publish for this account
        #[arg(short, long)]
        account: Option<String>,
    },

    /// Run one optimizer cycle (interval-gated)
    Optimize,

    /// Record an observed metric for a published post
    Outcome {
        /// Experiment identifier
        #[arg(long)]
        experiment: String,

        /// Post identifier (the content fingerprint)
        #[arg(long)]
        post: String,

        /// Metric name
        #[arg(long)]
        metric: String,

        /// Observed value
        #[arg(long)]
        value: f64,
    },

    /// Reap stale lock files left behind by crashed runs
    Locks {
        /// Delete locks older than this many seconds
        #[arg(long, default_value = "3600")]
        stale_secs: u64,
    },

    /// Show registry and attempt-log totals
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    if let Commands::Collect { query } = &cli.command {
        if !query.is_empty() {
            config.source.queries = query.clone();
        }
    }

    let pipeline = Pipeline::from_config(config)?;

    let outcome = match cli.command {
        Commands::Collect { .. } => collect(&pipeline).await,
        Commands::Publish { account } => publish(&pipeline, account.as_deref()).await,
        Commands::Optimize => optimize(&pipeline).await,
        Commands::Outcome {
            experiment,
            post,
            metric,
            value,
        } => record_outcome(&pipeline, &experiment, &post, &metric, value),
        Commands::Locks { stale_secs } => locks(&pipeline, stale_secs),
        Commands::Stats => stats(&pipeline),
    };

    match outcome {
        Ok(()) => Ok(()),
        // An active lock means another run owns this slot; not a failure
        Err(Error::Lock(LockError::Active {
            name,
            age_secs,
            timeout_secs,
        })) => {
            tracing::warn!(
                lock = %name,
                age_secs,
                timeout_secs,
                "another run holds the lock, exiting"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn collect(pipeline: &Pipeline) -> tidecast::error::Result<()> {
    let report = pipeline.run_collection().await?;

    println!("Collection finished");
    for query in &report.queries {
        println!(
            "  {}: {} raw / {} filtered / {} new{}",
            query.query,
            query.raw_count,
            query.filtered_count,
            query.inserted,
            query
                .error
                .as_ref()
                .map(|e| format!(" (last error: {e})"))
                .unwrap_or_default()
        );
    }
    println!("  Total new items: {}", report.total_inserted());
    Ok(())
}

async fn publish(pipeline: &Pipeline, account: Option<&str>) -> tidecast::error::Result<()> {
    let summary = pipeline.run_publish(account).await?;

    println!("Publish finished");
    for (account, media_id) in &summary.published {
        println!("  {account}: published {media_id}");
    }
    for account in &summary.skipped {
        println!("  {account}: no backlog");
    }
    for (account, error) in &summary.failed {
        println!("  {account}: FAILED - {error}");
    }
    Ok(())
}

async fn optimize(pipeline: &Pipeline) -> tidecast::error::Result<()> {
    let outcome = pipeline.run_optimize().await?;

    if outcome.skipped {
        println!("Optimizer skipped (ran recently)");
        return Ok(());
    }
    for (experiment, variant) in &outcome.promoted {
        println!("  {experiment}: promoted '{variant}'");
    }
    for experiment in &outcome.rollback_flagged {
        println!("  {experiment}: flagged for rollback");
    }
    if outcome.promoted.is_empty() && outcome.rollback_flagged.is_empty() {
        println!("  No experiments ready");
    }
    Ok(())
}

fn record_outcome(
    pipeline: &Pipeline,
    experiment: &str,
    post: &str,
    metric: &str,
    value: f64,
) -> tidecast::error::Result<()> {
    pipeline.record_outcome(experiment, post, metric, value)?;
    println!("Recorded {metric}={value} for post {post} in '{experiment}'");
    Ok(())
}

fn locks(pipeline: &Pipeline, stale_secs: u64) -> tidecast::error::Result<()> {
    let removed = pipeline.cleanup_locks(Duration::from_secs(stale_secs))?;
    println!("Removed {removed} stale lock(s)");
    Ok(())
}

fn stats(pipeline: &Pipeline) -> tidecast::error::Result<()> {
    let stats = pipeline.stats()?;

    println!("Registry");
    println!("  Items: {}", stats.content.total);
    println!("  Posted: {}", stats.content.posted);
    println!("  Backlog: {}", stats.content.backlog());
    println!("Attempts");
    println!("  Total: {}", stats.attempts_total);
    println!("  Success: {}", stats.attempts_success);
    println!("  Failed: {}", stats.attempts_failed);
    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("tidecast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("tidecast=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
