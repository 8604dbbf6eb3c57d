use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use payloadqueue_core::{BatchQueue, BatchSettings, RateQueue, RateSettings};

/// Demo producer for the payload queues.
#[derive(Debug, Parser)]
#[command(name = "payloadqueue", version)]
struct Cli {
    /// Verbose logging (engine internals included).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Batch payloads by size or age.
    Batch(BatchArgs),
    /// Pace payloads at a fixed rate.
    Rate(RateArgs),
}

#[derive(Debug, Args)]
struct ProducerArgs {
    /// Settings file (JSON). Flags override values from the file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    tag: Option<String>,

    /// Jobs to produce (JSON array of `{"name", "duration_ms"}`).
    /// Without it, `--count` jobs are generated.
    #[arg(long)]
    jobs: Option<PathBuf>,

    /// Number of jobs to generate.
    #[arg(long, default_value_t = 50)]
    count: u32,

    /// Delay between produced jobs, in milliseconds.
    #[arg(long, default_value_t = 0)]
    every_ms: u64,

    /// How long to keep the queue open before closing it, in seconds.
    #[arg(long, default_value_t = 5)]
    run_secs: u64,
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[command(flatten)]
    producer: ProducerArgs,

    #[arg(long)]
    max_size: Option<usize>,

    #[arg(long)]
    max_age_secs: Option<u64>,
}

#[derive(Debug, Args)]
struct RateArgs {
    #[command(flatten)]
    producer: ProducerArgs,

    #[arg(long)]
    max_size: Option<usize>,

    #[arg(long)]
    rate: Option<u32>,

    /// Drop what is left instead of draining it on close.
    #[arg(long)]
    discard_on_close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Job {
    name: String,
    duration_ms: u64,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("payloadqueue_core=trace,payloadqueue=debug,payloadqueue_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .compact()
        .init();
}

/// `--jobs` のファイルか、`count` 件の生成ジョブ
fn jobs(args: &ProducerArgs, name_prefix: &str) -> Result<Vec<Job>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.jobs {
        let text = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&text)?);
    }
    Ok((0..args.count)
        .map(|i| Job {
            name: format!("{name_prefix}{}", i * 2),
            duration_ms: u64::from(i + 1) * 2,
        })
        .collect())
}

async fn produce<F>(jobs: Vec<Job>, every_ms: u64, mut append: F)
where
    F: FnMut(Job),
{
    let every = Duration::from_millis(every_ms);
    for job in jobs {
        append(job);
        if !every.is_zero() {
            sleep(every).await;
        }
    }
}

async fn run_batch(args: BatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = match &args.producer.config {
        Some(path) => BatchSettings::from_file(path)?,
        None => BatchSettings::default(),
    };
    if let Some(tag) = args.producer.tag.clone() {
        settings.tag = tag;
    }
    if let Some(max_size) = args.max_size {
        settings.max_size = max_size;
    }
    if let Some(max_age_secs) = args.max_age_secs {
        settings.max_age_secs = max_age_secs;
    }

    let processed = Arc::new(AtomicUsize::new(0));
    let queue = BatchQueue::builder()
        .settings(settings)
        .work({
            let processed = Arc::clone(&processed);
            move |jobs: Vec<Job>| {
                let processed = Arc::clone(&processed);
                async move {
                    for job in &jobs {
                        info!(name = %job.name, "got job");
                    }
                    processed.fetch_add(jobs.len(), Ordering::Relaxed);
                    0
                }
            }
        })
        .build();
    queue.start()?;

    let jobs = jobs(&args.producer, "DataA")?;
    let producer = {
        let queue = queue.clone();
        tokio::spawn(produce(jobs, args.producer.every_ms, move |job| {
            queue.append(queue.new_payload(job))
        }))
    };

    sleep(Duration::from_secs(args.producer.run_secs)).await;
    producer.abort();
    queue.close().await;
    info!(
        processed = processed.load(Ordering::Relaxed),
        stats = %serde_json::to_string(&queue.stats())?,
        "batch demo finished"
    );
    Ok(())
}

async fn run_rate(args: RateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = match &args.producer.config {
        Some(path) => RateSettings::from_file(path)?,
        None => RateSettings::default(),
    };
    if let Some(tag) = args.producer.tag.clone() {
        settings.tag = tag;
    }
    if let Some(max_size) = args.max_size {
        settings.max_size = max_size;
    }
    if let Some(rate) = args.rate {
        settings.requests_per_second = rate;
    }
    settings.discard_on_close |= args.discard_on_close;

    let queue = RateQueue::builder()
        .settings(settings)
        .work(|job: Job| async move {
            info!(name = %job.name, duration_ms = job.duration_ms, "got job");
            0
        })
        .build();
    queue.start()?;

    let jobs = jobs(&args.producer, "DataA0")?;
    let producer = {
        let queue = queue.clone();
        tokio::spawn(produce(jobs, args.producer.every_ms, move |job| {
            if let Err(e) = queue.append(queue.new_payload(job)) {
                tracing::warn!(error = %e, "job not queued");
            }
        }))
    };

    sleep(Duration::from_secs(args.producer.run_secs)).await;
    producer.abort();
    queue.close().await;
    info!(stats = %serde_json::to_string(&queue.stats())?, "rate demo finished");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Command::Batch(args) => run_batch(args).await,
        Command::Rate(args) => run_rate(args).await,
    }
}
