use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use cadence::config::{NodeConfig, RetryConfig};
use cadence::events::SchedulerEvent;
use cadence::shutdown::install_shutdown_handler;
use cadence::task::TaskOptions;
use cadence::worker::{HandlerRegistry, SimulatedHandler};
use cadence::Node;

#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(version)]
#[command(about = "A priority job scheduler with recurring tasks and a worker pool")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a scheduler node until SIGINT/SIGTERM
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of worker loops
    #[arg(long, default_value = "3")]
    workers: usize,

    /// Scheduler tick interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Maximum jobs waiting for a worker
    #[arg(long, default_value = "1024")]
    dispatch_capacity: usize,

    /// Delay before retrying a FIXED_DELAY task, in milliseconds
    #[arg(long, default_value = "0")]
    retry_delay_ms: u64,

    /// First EXPONENTIAL_BACKOFF retry delay, in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_base_ms: u64,

    /// Upper bound for EXPONENTIAL_BACKOFF retry delays, in milliseconds
    #[arg(long, default_value = "60000")]
    backoff_max_ms: u64,

    /// Submit the sample email/report/notification/export tasks on start
    #[arg(long)]
    demo: bool,

    /// Stop automatically after this many seconds
    #[arg(long)]
    run_for: Option<u64>,

    /// Event output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// Simulated execution time per job type.
const DEMO_JOB_TYPES: &[(&str, Duration)] = &[
    ("EMAIL", Duration::from_secs(1)),
    ("NOTIFICATION", Duration::from_millis(500)),
    ("REPORT", Duration::from_secs(3)),
    ("DATA_EXPORT", Duration::from_secs(5)),
];

const DEFAULT_SIMULATED_DURATION: Duration = Duration::from_secs(2);

fn demo_handlers() -> HandlerRegistry {
    DEMO_JOB_TYPES.iter().fold(
        HandlerRegistry::new().with_fallback(SimulatedHandler::new(DEFAULT_SIMULATED_DURATION)),
        |registry, (job_type, duration)| {
            registry.with_handler(*job_type, SimulatedHandler::new(*duration))
        },
    )
}

async fn submit_demo_tasks(node: &Node) -> cadence::Result<()> {
    let now = Utc::now();
    let samples = [
        ("Send Welcome Email", "EMAIL", 3),
        ("Generate Monthly Report", "REPORT", 6),
        ("Send Push Notification", "NOTIFICATION", 9),
        ("Export User Data", "DATA_EXPORT", 12),
    ];
    for (name, job_type, delay_secs) in samples {
        let id = node
            .submit_task(
                name,
                job_type,
                now + chrono::Duration::seconds(delay_secs),
                TaskOptions::default(),
            )
            .await?;
        println!("Task '{}' added with ID: {}", name, id);
    }
    Ok(())
}

fn format_event(event: &SchedulerEvent) -> String {
    let job = event
        .job_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let detail = match event {
        SchedulerEvent::JobCreated {
            task_name, attempt, ..
        } => format!("{} (attempt {})", task_name, attempt),
        SchedulerEvent::JobStarted { worker_id, .. } => format!("worker {}", worker_id),
        SchedulerEvent::JobCompleted { worker_id, .. } => format!("worker {}", worker_id),
        SchedulerEvent::JobFailed { reason, .. } => reason.clone(),
        SchedulerEvent::JobRetryScheduled { run_time, .. } => format!("at {}", run_time),
        SchedulerEvent::JobExhausted {
            attempts, reason, ..
        } => format!("{} attempts: {}", attempts, reason),
        SchedulerEvent::SchedulerError { error, .. } => error.clone(),
        SchedulerEvent::JobsDiscarded { count, .. } => format!("{} jobs", count),
        SchedulerEvent::JobPromoted { .. } => String::new(),
    };
    format!("{:<20} {:<38} {}", event.kind(), job, detail)
}

fn print_events(node: &Node, output: OutputFormat) {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match output {
                    OutputFormat::Json => match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                    },
                    OutputFormat::Table => println!("{}", format_event(&event)),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::new(args.workers)
        .with_tick_interval_ms(args.tick_ms)
        .with_dispatch_capacity(args.dispatch_capacity)
        .with_retry(RetryConfig {
            fixed_delay_ms: args.retry_delay_ms,
            backoff_base_ms: args.backoff_base_ms,
            backoff_max_ms: args.backoff_max_ms,
        });

    let node = Node::new(config, demo_handlers())?;
    let shutdown = install_shutdown_handler();
    print_events(&node, args.output);
    node.start().await;

    if args.demo {
        submit_demo_tasks(&node).await?;
    }

    match args.run_for {
        Some(secs) => {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => shutdown.cancelled().await,
    }

    let discarded = node.stop().await;
    if discarded > 0 {
        eprintln!("Discarded {} undelivered jobs", discarded);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run(run_args).await?,
    }

    Ok(())
}
