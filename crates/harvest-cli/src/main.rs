use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{ExtractionRules, PageExtractor, ReqwestFetcher, SelectorExtractor};
use harvest_core::traits::Fetcher;
use harvest_core::{
    AppError, BatchConfig, BatchOrchestrator, BatchReport, CollectorConfig, ConcurrencyMode,
    Coordinator, CsvSink, JobSource, ResultsCollector, SysinfoProbe, TracingBatchReporter,
    TracingWorkerReporter, WorkerConfig, WorkerService, shard,
};
use harvest_redis::{BrokerConfig, RedisBroker};

#[derive(Parser)]
#[command(name = "harvest", version, about = "Distributed work-queue scraper")]
struct Cli {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Entry mode; runs a worker when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load jobs from a file and enqueue them on the broker
    Coordinator {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Consume jobs from the broker until interrupted
    Worker(WorkerArgs),

    /// Drain results and errors from the broker into CSV files
    Collect {
        #[command(flatten)]
        output: OutputArgs,

        /// Seconds between collection passes
        #[arg(long, default_value_t = 30)]
        interval: u64,

        /// Run a single pass and exit
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Process a job file locally in batches, without a broker
    Batch {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        extractor: ExtractorArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Jobs per batch
        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// Concurrency policy: conservative, balanced, aggressive or auto
        #[arg(long, default_value = "auto")]
        mode: ConcurrencyMode,

        /// Explicit pool size, overrides --mode
        #[arg(long)]
        workers: Option<usize>,

        /// Per-item time limit in seconds
        #[arg(long, default_value_t = 30)]
        item_timeout: u64,

        /// Pause between batches in seconds
        #[arg(long, default_value_t = 5)]
        pause: u64,
    },

    /// Process one static shard of a job file locally
    Shard {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        extractor: ExtractorArgs,

        /// Output directory for results_worker_<k>.csv and errors_worker_<k>.csv
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// 1-based index of this shard
        #[arg(long, env = "WORKER_ID")]
        worker_index: usize,

        /// Total number of shards
        #[arg(long, env = "SCRAPER_WORKERS")]
        worker_count: usize,

        /// Jobs processed in parallel inside the shard
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Per-item time limit in seconds
        #[arg(long, default_value_t = 30)]
        item_timeout: u64,
    },

    /// Print the number of pending jobs
    Status,
}

/// Flags override `REDIS_HOST`, `REDIS_PORT` and `REDIS_DB`.
#[derive(Args)]
struct BrokerArgs {
    /// Broker host [default: $REDIS_HOST or redis]
    #[arg(long, global = true)]
    redis_host: Option<String>,

    /// Broker port [default: $REDIS_PORT or 6379]
    #[arg(long, global = true)]
    redis_port: Option<u16>,

    /// Broker database index [default: $REDIS_DB or 0]
    #[arg(long, global = true)]
    redis_db: Option<i64>,
}

impl BrokerArgs {
    fn config(&self) -> Result<BrokerConfig> {
        let mut config = BrokerConfig::from_env()?;
        if let Some(host) = &self.redis_host {
            config = config.with_host(host);
        }
        if let Some(port) = self.redis_port {
            config = config.with_port(port);
        }
        if let Some(db) = self.redis_db {
            config = config.with_db(db);
        }
        Ok(config)
    }
}

#[derive(Args)]
struct InputArgs {
    /// Job file: one identifier per line, or CSV with --column
    #[arg(short, long, env = "HARVEST_INPUT")]
    input: PathBuf,

    /// Read identifiers from this CSV column
    #[arg(long)]
    column: Option<String>,

    /// First job to take (inclusive)
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Last job to take (exclusive); defaults to the end of the input
    #[arg(long)]
    end: Option<usize>,
}

impl InputArgs {
    fn source(&self) -> JobSource {
        match &self.column {
            Some(column) => JobSource::csv_column(&self.input, column),
            None => JobSource::lines(&self.input),
        }
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end.unwrap_or(usize::MAX)
    }
}

#[derive(Args)]
struct ExtractorArgs {
    /// JSON file with the field extraction rules
    #[arg(long, env = "HARVEST_RULES", default_value = "rules.json")]
    rules: PathBuf,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 10)]
    fetch_timeout: u64,

    /// Render pages with headless Chromium (needs the `browser` feature)
    #[arg(long, default_value_t = false)]
    browser: bool,
}

#[derive(Args)]
struct OutputArgs {
    /// Success records CSV
    #[arg(long, default_value = "results.csv")]
    results: PathBuf,

    /// Failures CSV
    #[arg(long, default_value = "errors.csv")]
    errors: PathBuf,
}

#[derive(Args)]
struct WorkerArgs {
    /// Worker identifier; falls back to CONTAINER_ID, then a random id
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Number of workers in the deployment, for logs only
    #[arg(long, env = "SCRAPER_WORKERS", default_value_t = 1)]
    total_workers: usize,

    /// Seconds to wait when the queue is empty
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,

    /// Milliseconds to pause after each job
    #[arg(long, default_value_t = 1000)]
    job_delay_ms: u64,

    /// Per-job time limit in seconds
    #[arg(long, default_value_t = 30)]
    job_timeout: u64,

    /// Take a resource sample every N jobs
    #[arg(long, default_value_t = 10)]
    sample_every: u64,

    #[command(flatten)]
    extractor: ExtractorArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let broker_config = cli.broker.config()?;

    match cli.command {
        Some(Commands::Coordinator { input }) => cmd_coordinator(&broker_config, &input).await,
        Some(Commands::Worker(args)) => cmd_worker(&broker_config, args).await,
        None => cmd_worker(&broker_config, WorkerArgs::from_env()).await,
        Some(Commands::Collect {
            output,
            interval,
            once,
        }) => cmd_collect(&broker_config, &output, interval, once).await,
        Some(Commands::Batch {
            input,
            extractor,
            output,
            batch_size,
            mode,
            workers,
            item_timeout,
            pause,
        }) => {
            let config = BatchConfig::default()
                .with_batch_size(batch_size)
                .with_mode(mode)
                .with_max_workers(workers)
                .with_item_timeout(Duration::from_secs(item_timeout))
                .with_batch_pause(Duration::from_secs(pause));
            let jobs = input.source().load_range(input.range())?;
            let sink = CsvSink::new(&output.results, &output.errors);
            cmd_local(&jobs, &extractor, config, &sink).await
        }
        Some(Commands::Shard {
            input,
            extractor,
            output_dir,
            worker_index,
            worker_count,
            concurrency,
            item_timeout,
        }) => {
            let jobs = input.source().load_range(input.range())?;
            let part = shard(&jobs, worker_index, worker_count)?;
            tracing::info!(
                shard = worker_index,
                of = worker_count,
                jobs = part.len(),
                "Processing shard"
            );

            let config = BatchConfig::default()
                .with_batch_size(part.len().max(1))
                .with_max_workers(Some(concurrency))
                .with_item_timeout(Duration::from_secs(item_timeout))
                .with_label(format!("worker-{worker_index}"));
            let sink = CsvSink::new(
                output_dir.join(format!("results_worker_{worker_index}.csv")),
                output_dir.join(format!("errors_worker_{worker_index}.csv")),
            );
            cmd_local(part, &extractor, config, &sink).await
        }
        Some(Commands::Status) => cmd_status(&broker_config).await,
    }
}

impl WorkerArgs {
    /// Worker settings when no subcommand is given: defaults plus env vars.
    fn from_env() -> Self {
        #[derive(Parser)]
        struct Standalone {
            #[command(flatten)]
            worker: WorkerArgs,
        }
        Standalone::parse_from(["harvest"]).worker
    }

    fn config(&self) -> Result<WorkerConfig> {
        let mut config = WorkerConfig::default()
            .with_total_workers(self.total_workers)
            .with_poll_interval(Duration::from_secs(self.poll_interval))
            .with_job_delay(Duration::from_millis(self.job_delay_ms))
            .with_job_timeout(Duration::from_secs(self.job_timeout))
            .with_sample_every(self.sample_every);

        let id = self
            .worker_id
            .clone()
            .or_else(|| std::env::var("CONTAINER_ID").ok())
            .filter(|id| !id.is_empty());
        if let Some(id) = id {
            config = config.with_worker_id(id);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Either fetcher behind one type, so the pipeline stays monomorphic.
#[derive(Clone)]
enum AnyFetcher {
    Http(ReqwestFetcher),
    #[cfg(feature = "browser")]
    Browser(harvest_client::BrowserFetcher),
}

impl Fetcher for AnyFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        match self {
            AnyFetcher::Http(fetcher) => fetcher.fetch(url).await,
            #[cfg(feature = "browser")]
            AnyFetcher::Browser(fetcher) => fetcher.fetch(url).await,
        }
    }
}

async fn build_extractor(args: &ExtractorArgs) -> Result<PageExtractor<AnyFetcher>> {
    let rules = ExtractionRules::from_file(&args.rules)
        .with_context(|| format!("Failed to load rules from {}", args.rules.display()))?;
    let selectors = SelectorExtractor::new(rules)?;
    let timeout = Duration::from_secs(args.fetch_timeout);

    let fetcher = if args.browser {
        browser_fetcher(timeout).await?
    } else {
        AnyFetcher::Http(ReqwestFetcher::with_timeout(timeout)?)
    };
    Ok(PageExtractor::new(fetcher, selectors))
}

#[cfg(feature = "browser")]
async fn browser_fetcher(timeout: Duration) -> Result<AnyFetcher> {
    let fetcher = harvest_client::BrowserFetcher::with_timeout(timeout)
        .await
        .context("Failed to start headless browser")?;
    Ok(AnyFetcher::Browser(fetcher))
}

#[cfg(not(feature = "browser"))]
async fn browser_fetcher(_timeout: Duration) -> Result<AnyFetcher> {
    bail!("--browser requires harvest to be built with the `browser` feature")
}

/// Cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
        }
        trigger.cancel();
    });
    token
}

async fn cmd_coordinator(broker_config: &BrokerConfig, input: &InputArgs) -> Result<()> {
    let source = input.source();
    let jobs = source
        .load_range(input.range())
        .with_context(|| format!("Failed to load jobs from {}", input.input.display()))?;

    let broker = RedisBroker::connect(broker_config).await;
    let count = Coordinator::new(broker).enqueue_jobs(&jobs).await?;

    println!("Enqueued {count} jobs");
    Ok(())
}

async fn cmd_worker(broker_config: &BrokerConfig, args: WorkerArgs) -> Result<()> {
    let config = args.config()?;
    let extractor = build_extractor(&args.extractor).await?;

    let broker = RedisBroker::connect(broker_config).await;
    if !broker.is_enabled() {
        tracing::warn!("Running without a broker; no jobs will be received");
    }

    let worker = WorkerService::new(broker, extractor, config)?;
    let summary = worker
        .run(SysinfoProbe::new(), shutdown_token(), &TracingWorkerReporter)
        .await;

    println!(
        "Worker {} processed {} jobs ({} ok, {} failed)\n{}",
        worker.config().worker_id,
        summary.processed,
        summary.succeeded,
        summary.failed,
        summary.resources
    );
    Ok(())
}

async fn cmd_collect(
    broker_config: &BrokerConfig,
    output: &OutputArgs,
    interval: u64,
    once: bool,
) -> Result<()> {
    let broker = RedisBroker::connect(broker_config).await;
    if !broker.is_enabled() {
        bail!(
            "Broker at {}:{} is unreachable",
            broker_config.host,
            broker_config.port
        );
    }

    let sink = CsvSink::new(&output.results, &output.errors);
    let config = CollectorConfig::default().with_interval(Duration::from_secs(interval));
    let mut collector = ResultsCollector::new(broker, sink, config);

    let summary = if once {
        collector.collect_once().await?.summary
    } else {
        collector.run(shutdown_token()).await?
    };

    print!("{summary}");
    Ok(())
}

async fn cmd_local(
    jobs: &[String],
    extractor_args: &ExtractorArgs,
    config: BatchConfig,
    sink: &CsvSink,
) -> Result<()> {
    let extractor = build_extractor(extractor_args).await?;
    let orchestrator = BatchOrchestrator::new(extractor, config)?;

    let mut probe = SysinfoProbe::new();
    let report = orchestrator
        .run(jobs, &mut probe, &TracingBatchReporter)
        .await;

    write_report(&report, sink)?;
    print_report(&report);
    Ok(())
}

fn write_report(report: &BatchReport, sink: &CsvSink) -> Result<()> {
    if !report.records.is_empty() {
        sink.write_records(&report.records)?;
        print_saved(sink.results_path(), report.records.len());
    }
    if !report.failures.is_empty() {
        sink.write_failures(&report.failures)?;
        print_saved(sink.errors_path(), report.failures.len());
    }
    Ok(())
}

fn print_saved(path: &Path, count: usize) {
    println!("Saved {count} rows to {}", path.display());
}

fn print_report(report: &BatchReport) {
    println!("Processed:      {}", report.records.len());
    println!("Failures:       {}", report.failures.len());
    println!("Elapsed:        {:.2}s", report.elapsed.as_secs_f64());
    println!("Throughput:     {:.2} items/s", report.items_per_second);
    println!("Memory delta:   {:.1} MiB", report.memory_delta_mib);
    println!("Workers:        {}", report.workers);
}

async fn cmd_status(broker_config: &BrokerConfig) -> Result<()> {
    let broker = RedisBroker::connect(broker_config).await;
    if !broker.is_enabled() {
        bail!(
            "Broker at {}:{} is unreachable",
            broker_config.host,
            broker_config.port
        );
    }

    let coordinator = Coordinator::new(broker);
    println!("Pending jobs: {}", coordinator.queue_length().await?);
    Ok(())
}
