use anyhow::Result;
use clap::Parser;
use fanout::{
    demo::{sample_urls, SimulatedFetch},
    Capacity,
    Config,
    Dispatcher,
    Task,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;


/// Fetch a batch of (simulated) URLs through a bounded worker pool.
#[derive(Parser, Debug)]
#[command(name = "fanout", version)]
struct Args {
    /// Number of concurrent workers
    #[arg(short, long, default_value_t = 3)]
    workers: usize,

    /// Number of URLs to fetch
    #[arg(short, long, default_value_t = 15)]
    tasks: usize,

    /// Minimum milliseconds between task admissions
    #[arg(long)]
    rate_ms: Option<u64>,

    /// Task queue capacity, unbounded when omitted
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Probability that a single fetch fails
    #[arg(long, default_value_t = 0.25)]
    failure_rate: f64,

    #[arg(long, default_value_t = 100)]
    min_delay_ms: u64,

    #[arg(long, default_value_t = 500)]
    max_delay_ms: u64,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = Config::io_bound()
            .with_workers(self.workers)
            .with_queue_capacity(
                self.queue_capacity
                    .map(Capacity::Bounded)
                    .unwrap_or(Capacity::Unbounded),
            );
        if let Some(ms) = self.rate_ms {
            config = config.with_rate(Duration::from_millis(ms));
        }
        config
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let fetcher = Arc::new(
        SimulatedFetch::default()
            .with_delay(
                Duration::from_millis(args.min_delay_ms),
                Duration::from_millis(args.max_delay_ms),
            )
            .with_failure_rate(args.failure_rate),
    );

    let now = Instant::now();
    let (dispatcher, mut results) = Dispatcher::spawn(args.config(), move |_id, url: String| {
        let fetcher = fetcher.clone();
        async move { fetcher.fetch(url).await }
    })?;
    tracing::info!(workers = args.workers, tasks = args.tasks, "starting fetch");

    let producer = dispatcher.submitter();
    let urls = sample_urls(args.tasks);
    let submitting = tokio::spawn(async move {
        let tasks = urls.into_iter().enumerate().map(|(i, url)| Task::new(i as u64 + 1, url));
        let submitted = producer.submit_all(tasks).await?;
        producer.close_input()?;
        Ok::<_, fanout::LifecycleError>(submitted)
    });

    // submission may block on a bounded queue, so drain concurrently
    let mut ok = 0usize;
    let mut failed = 0usize;
    while let Some(outcome) = results.next_outcome().await {
        let worker = outcome.worker_id.map(|w| w.to_string()).unwrap_or_else(|| "-".into());
        match &outcome.result {
            Ok(data) => {
                ok += 1;
                println!("task {:>3} | worker {worker} | {data}", outcome.task_id);
            }
            Err(e) => {
                failed += 1;
                println!("task {:>3} | worker {worker} | error: {e}", outcome.task_id);
            }
        }
    }

    let submitted = submitting.await??;
    dispatcher.shutdown().await;

    println!("submitted: {submitted}, ok: {ok}, failed: {failed}");
    println!("elapsed: {:?}", now.elapsed());
    Ok(())
}
