//! deferq CLI: operator interface to the upload queue.

use deferq::config::Config;
use deferq::db::Db;
use deferq::delivery::HttpDeliveryClient;
use deferq::engine::{TaskExecutor, UPLOAD_TASK_NAME, UploadQueue};
use deferq::scheduler::{BackgroundScheduler, BackgroundTask, LocalScheduler, RegistrationOptions};
use deferq::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "deferq", about = "Durable background upload queue")]
struct Cli {
    /// TOML config file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon until interrupted.
    ///
    /// Exits non-zero if the upload task cannot be registered, since the
    /// daemon has nothing else to do. Queued items are left untouched and
    /// `deferq run` still delivers them.
    Serve {
        /// Skip the immediate run of restored registrations
        #[arg(long)]
        no_boot_run: bool,
    },
    /// Queue a local image for background delivery
    Enqueue {
        /// Image path or file:// URI
        uri: String,
    },
    /// Run the upload task once, right now
    Run,
    /// List pending items, head first
    List,
    /// Show items that exhausted their retry budget
    DeadLetters,
    /// Check the database and the delivery endpoint
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Serve { no_boot_run } => cmd_serve(&config, no_boot_run).await,
        Command::Enqueue { uri } => {
            let _guard = telemetry(&config)?;
            let (_, queue) = open_queue(&config).await?;
            cmd_enqueue(&queue, &uri).await
        }
        Command::Run => {
            let _guard = telemetry(&config)?;
            let (_, queue) = open_queue(&config).await?;
            cmd_run(&config, queue).await
        }
        Command::List => {
            let (_, queue) = open_queue(&config).await?;
            cmd_list(&queue).await
        }
        Command::DeadLetters => {
            let (_, queue) = open_queue(&config).await?;
            cmd_dead_letters(&queue).await
        }
        Command::Health => {
            let (db, _) = open_queue(&config).await?;
            cmd_health(&config, &db).await
        }
    }
}

fn telemetry(config: &Config) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "deferq".to_string(),
        log_level: config.log_level.clone(),
    })?)
}

async fn open_queue(config: &Config) -> anyhow::Result<(Arc<Db>, UploadQueue)> {
    let db = Arc::new(Db::connect(&config.database_path).await?);
    db.migrate().await?;
    let queue = UploadQueue::new(db.clone());
    Ok((db, queue))
}

async fn cmd_serve(config: &Config, no_boot_run: bool) -> anyhow::Result<()> {
    let _guard = telemetry(config)?;
    let (db, queue) = open_queue(config).await?;

    let executor = TaskExecutor::new(queue, Arc::new(HttpDeliveryClient::from_config(config)?))
        .with_retry_policy(config.retry_policy());
    let task: Arc<dyn BackgroundTask> = Arc::new(executor);

    let scheduler = LocalScheduler::with_store(db);
    if !no_boot_run {
        scheduler.restore(&[(UPLOAD_TASK_NAME, task.clone())]).await?;
    }

    let options = RegistrationOptions::every(config.min_interval.as_secs());
    if let Err(e) = scheduler.register(UPLOAD_TASK_NAME, task, options).await {
        error!("background registration failed, queued items kept: {e}");
        return Err(e.into());
    }
    info!(
        interval_secs = options.minimum_interval_secs,
        database = %config.database_path.display(),
        "deferq serving"
    );

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await;
    Ok(())
}

async fn cmd_enqueue(queue: &UploadQueue, uri: &str) -> anyhow::Result<()> {
    let item = queue.enqueue(uri).await?;
    println!("Queued: {} ({})", item.id, item.uri);
    Ok(())
}

async fn cmd_run(config: &Config, queue: UploadQueue) -> anyhow::Result<()> {
    let executor = TaskExecutor::new(queue, Arc::new(HttpDeliveryClient::from_config(config)?))
        .with_retry_policy(config.retry_policy());
    let outcome = executor.run_once().await;
    println!("Outcome: {outcome}");
    Ok(())
}

async fn cmd_list(queue: &UploadQueue) -> anyhow::Result<()> {
    let pending = queue.snapshot().await?;
    if pending.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    let attempts = queue.attempts().await?;

    println!("{:<8}  {:<8}  {:<16}  URI", "ID", "FAILURES", "ENQUEUED");
    println!("{}", "-".repeat(80));

    for item in &pending {
        let enqueued = item
            .enqueued_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<8}  {:<16}  {}",
            item.id.short(),
            attempts.get(&item.id),
            enqueued,
            item.uri
        );
    }

    println!("\n{} item(s)", pending.len());
    Ok(())
}

async fn cmd_dead_letters(queue: &UploadQueue) -> anyhow::Result<()> {
    let dead = queue.dead_letters().await?;
    if dead.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }

    for letter in &dead {
        println!("ID:        {}", letter.item.id);
        println!("URI:       {}", letter.item.uri);
        println!("Attempts:  {}", letter.attempts);
        println!("Dead At:   {}", letter.dead_at);
        println!("Reason:    {}", letter.reason);
        println!("---");
    }

    println!("{} dead letter(s)", dead.len());
    Ok(())
}

async fn cmd_health(config: &Config, db: &Db) -> anyhow::Result<()> {
    db.health_check().await?;
    println!("Database:  ok ({})", config.database_path.display());

    let client = HttpDeliveryClient::from_config(config)?;
    match client.health_check().await {
        Ok(()) => println!("Endpoint:  ok ({})", config.health_url()?),
        Err(e) => anyhow::bail!("endpoint unhealthy: {e}"),
    }
    Ok(())
}
