use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobsync_client::ReqwestFeedFetcher;
use jobsync_core::models::{ImportRun, ImportType, RunStatus, TriggeredBy};
use jobsync_core::traits::{FeedHealthStore, RunFilter, RunStore, TaskQueue, TracingSink};
use jobsync_core::{ImportConfig, ImportService, StatsService, TrackedFetcher, WorkerConfig, WorkerPool};
use jobsync_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "jobsync", version, about = "Job feed import pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all configured feeds, enqueue their records, and process them
    Import {
        /// Import a single feed URL instead of the configured set
        #[arg(short, long)]
        feed_url: Option<String>,

        /// What initiated this import: "manual", "scheduled", or "api"
        #[arg(long, default_value = "manual")]
        triggered_by: String,

        /// Incremental top-up instead of a full re-import
        #[arg(long, default_value_t = false)]
        incremental: bool,

        /// Enqueue only; leave processing to a running worker
        #[arg(long, default_value_t = false)]
        no_process: bool,
    },

    /// Run a standing worker pool until interrupted
    Worker {
        /// Number of concurrent task handlers
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Show past import runs
    History {
        /// Filter by status: "in_progress", "completed", or "failed"
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by feed URL substring
        #[arg(short, long)]
        feed: Option<String>,

        /// Only runs started on or after this time (RFC 3339)
        #[arg(long)]
        since: Option<chrono::DateTime<chrono::Utc>>,

        /// Only runs started on or before this time (RFC 3339)
        #[arg(long)]
        until: Option<chrono::DateTime<chrono::Utc>>,

        /// Page number (1-based)
        #[arg(short, long, default_value_t = 1)]
        page: u64,

        /// Runs per page
        #[arg(long, default_value_t = 20)]
        per_page: u64,
    },

    /// Show aggregate import statistics
    Stats,

    /// Show per-feed health
    Feeds,

    /// Re-queue dead-lettered tasks of a run
    Retry {
        /// Import run id
        run_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobsync=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import {
            feed_url,
            triggered_by,
            incremental,
            no_process,
        } => {
            let triggered_by = TriggeredBy::from_str(&triggered_by).map_err(anyhow::Error::msg)?;
            let import_type = if incremental {
                ImportType::Incremental
            } else {
                ImportType::Full
            };
            cmd_import(feed_url, triggered_by, import_type, no_process).await?;
        }
        Commands::Worker { concurrency } => {
            cmd_worker(concurrency).await?;
        }
        Commands::History {
            status,
            feed,
            since,
            until,
            page,
            per_page,
        } => {
            let status = status
                .map(|s| RunStatus::from_str(&s))
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let filter = RunFilter {
                status,
                feed_contains: feed,
                start_after: since,
                start_before: until,
                page,
                per_page,
            };
            cmd_history(filter).await?;
        }
        Commands::Stats => cmd_stats().await?,
        Commands::Feeds => cmd_feeds().await?,
        Commands::Retry { run_id } => cmd_retry(run_id).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL and run pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(anyhow::Error::msg)?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(anyhow::Error::msg)?;
    Ok(db)
}

async fn cmd_import(
    feed_url: Option<String>,
    triggered_by: TriggeredBy,
    import_type: ImportType,
    no_process: bool,
) -> Result<()> {
    let db = connect_db().await?;
    let mut config = ImportConfig::from_env().map_err(anyhow::Error::msg)?;
    if let Some(url) = feed_url {
        config.feed_urls = vec![url];
    }

    let fetcher = TrackedFetcher::new(
        ReqwestFeedFetcher::with_timeout(Duration::from_secs(config.fetch_timeout_secs))
            .map_err(anyhow::Error::msg)?,
        db.feed_repo(),
    );
    let service = ImportService::new(
        fetcher,
        db.task_repo(),
        db.run_repo(),
        TracingSink,
        config.clone(),
    );

    let runs = service.trigger_import(triggered_by, import_type).await;

    if no_process {
        for run in &runs {
            println!("{}  {}  {}", run.id, run.status, run.feed_url);
        }
        println!("\nEnqueued {} runs; start `jobsync worker` to process them", runs.len());
        return Ok(());
    }

    // Process inline until every triggered run settles.
    let worker_config = WorkerConfig::default()
        .with_concurrency(config.concurrency)
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
        .with_retry_config(config.retry_config());
    let pool = WorkerPool::new(
        db.task_repo(),
        db.job_repo(),
        db.run_repo(),
        TracingSink,
        worker_config,
    );

    let token = CancellationToken::new();
    let worker_token = token.clone();
    let handle = tokio::spawn(async move { pool.run(worker_token).await });

    let run_repo = db.run_repo();
    let run_ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
    loop {
        let mut all_terminal = true;
        for id in &run_ids {
            if let Some(run) = run_repo.get(*id).await.map_err(anyhow::Error::msg)? {
                if !run.status.is_terminal() {
                    all_terminal = false;
                    break;
                }
            }
        }
        if all_terminal {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    token.cancel();
    handle.await?.map_err(anyhow::Error::msg)?;

    for id in &run_ids {
        if let Some(run) = run_repo.get(*id).await.map_err(anyhow::Error::msg)? {
            print_run(&run);
        }
    }
    Ok(())
}

async fn cmd_worker(concurrency: Option<usize>) -> Result<()> {
    let db = connect_db().await?;
    let config = ImportConfig::from_env().map_err(anyhow::Error::msg)?;

    let worker_config = WorkerConfig::default()
        .with_concurrency(concurrency.unwrap_or(config.concurrency))
        .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
        .with_retry_config(config.retry_config());
    let pool = WorkerPool::new(
        db.task_repo(),
        db.job_repo(),
        db.run_repo(),
        TracingSink,
        worker_config,
    );

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    pool.run(token).await.map_err(anyhow::Error::msg)?;
    Ok(())
}

async fn cmd_history(filter: RunFilter) -> Result<()> {
    let db = connect_db().await?;
    let (runs, total) = db.run_repo().list(&filter).await.map_err(anyhow::Error::msg)?;

    if runs.is_empty() {
        println!("No import runs found");
        return Ok(());
    }

    for run in &runs {
        print_run(run);
    }
    println!("\nPage {} of {} runs total", filter.page.max(1), total);
    Ok(())
}

async fn cmd_stats() -> Result<()> {
    let db = connect_db().await?;
    let stats = StatsService::new(db.run_repo())
        .aggregate_stats()
        .await
        .map_err(anyhow::Error::msg)?;

    println!("Import runs:   {} total", stats.total_runs);
    println!("  completed:   {}", stats.completed_runs);
    println!("  failed:      {}", stats.failed_runs);
    println!("  in progress: {}", stats.in_progress_runs);
    println!("Records:       {} imported", stats.total_imported);
    println!("  new:         {}", stats.total_new);
    println!("  updated:     {}", stats.total_updated);
    println!("  failed:      {}", stats.total_failed);
    println!("Avg duration:  {:.0} ms", stats.average_duration_ms);
    Ok(())
}

async fn cmd_feeds() -> Result<()> {
    let db = connect_db().await?;
    let feeds = db.feed_repo().list().await.map_err(anyhow::Error::msg)?;

    if feeds.is_empty() {
        println!("No feeds tracked yet — run an import first");
        return Ok(());
    }

    for feed in &feeds {
        let last = feed
            .last_successful_fetch
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".into());
        println!(
            "{}\n  fetches: {} ({} failed), avg {} jobs/fetch, last success: {}",
            feed.name, feed.fetch_count, feed.failure_count, feed.average_jobs_per_fetch, last
        );
    }
    Ok(())
}

async fn cmd_retry(run_id: Uuid) -> Result<()> {
    let db = connect_db().await?;

    let run = db
        .run_repo()
        .get(run_id)
        .await
        .map_err(anyhow::Error::msg)?
        .context("No such import run")?;

    let requeued = db
        .task_repo()
        .retry_failed(run_id)
        .await
        .map_err(anyhow::Error::msg)?;

    println!("Re-queued {requeued} dead-lettered tasks for run {run_id}");
    if requeued > 0 && run.status.is_terminal() {
        // Terminal run totals stay frozen; retried records still land in
        // the jobs table once a worker picks them up.
        println!("Note: run totals are final; successful retries update the jobs table only");
    }
    Ok(())
}

fn print_run(run: &ImportRun) {
    println!(
        "{}  {:<11}  {}  fetched={} new={} updated={} failed={}  {}",
        run.id,
        run.status.to_string(),
        run.start_time.format("%Y-%m-%d %H:%M:%S"),
        run.total_fetched,
        run.new_count,
        run.updated_count,
        run.failed_count,
        run.feed_url,
    );
    for error in run.errors.iter().take(5) {
        println!("    error: {}", error.reason);
    }
    if run.errors.len() > 5 {
        println!("    ... and {} more errors", run.errors.len() - 5);
    }
}
