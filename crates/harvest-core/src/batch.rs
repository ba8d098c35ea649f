//! Single-host batch mode: fan a job list out over a bounded pool, one batch
//! at a time, without a broker.

use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;

use crate::concurrency::{ConcurrencyMode, resolve_workers};
use crate::error::AppError;
use crate::job::{Job, Outcome};
use crate::monitor::ResourceProbe;
use crate::sink::{CollectedFailure, CollectedRecord};
use crate::summary::RunSummary;
use crate::traits::Extractor;

/// Failure reason recorded for an item that exceeded its time limit.
pub const TIMEOUT_REASON: &str = "timeout";

/// How many failures the final report lists individually.
const REPORTED_FAILURES: usize = 5;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub mode: ConcurrencyMode,
    /// Explicit pool size; wins over `mode` when set.
    pub max_workers: Option<usize>,
    pub item_timeout: Duration,
    pub batch_pause: Duration,
    /// Worker id attached to collected outcomes.
    pub label: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            mode: ConcurrencyMode::Auto,
            max_workers: None,
            item_timeout: Duration::from_secs(30),
            batch_pause: Duration::from_secs(5),
            label: "local".to_string(),
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_workers(mut self, workers: Option<usize>) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::ConfigError("batch size must be at least 1".into()));
        }
        if self.item_timeout.is_zero() {
            return Err(AppError::ConfigError("item timeout must be positive".into()));
        }
        Ok(())
    }

    /// Number of batches for `jobs` items.
    pub fn batch_count(&self, jobs: usize) -> usize {
        jobs.div_ceil(self.batch_size.max(1))
    }
}

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    RunStarted {
        total_jobs: usize,
        batches: usize,
    },
    BatchStarted {
        index: usize,
        batches: usize,
        size: usize,
        workers: usize,
    },
    ItemFailed {
        job: &'a str,
        error: &'a str,
    },
    BatchFinished {
        index: usize,
        succeeded: usize,
        failed: usize,
    },
    Pausing {
        after_batch: usize,
        pause: Duration,
    },
    RunFinished {
        report: &'a BatchReport,
    },
}

pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::RunStarted {
                total_jobs,
                batches,
            } => {
                tracing::info!(%total_jobs, %batches, "Batch run started");
            }
            BatchEvent::BatchStarted {
                index,
                batches,
                size,
                workers,
            } => {
                tracing::info!(batch = %index, of = %batches, %size, %workers, "Processing batch");
            }
            BatchEvent::ItemFailed { job, error } => {
                tracing::debug!(%job, %error, "Item failed");
            }
            BatchEvent::BatchFinished {
                index,
                succeeded,
                failed,
            } => {
                tracing::info!(batch = %index, %succeeded, %failed, "Batch finished");
            }
            BatchEvent::Pausing { after_batch, pause } => {
                tracing::info!(batch = %after_batch, pause_secs = pause.as_secs_f64(), "Pausing");
            }
            BatchEvent::RunFinished { report } => {
                tracing::info!(
                    processed = report.records.len(),
                    failures = report.failures.len(),
                    elapsed_secs = report.elapsed.as_secs_f64(),
                    items_per_second = report.items_per_second,
                    memory_delta_mib = report.memory_delta_mib,
                    workers = report.workers,
                    "Batch run finished"
                );
                for failure in report.failures.iter().take(REPORTED_FAILURES) {
                    tracing::warn!(job = %failure.job_id, error = %failure.error, "Failed job");
                }
            }
        }
    }
}

/// Throughput report of a finished batch run.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub records: Vec<CollectedRecord>,
    pub failures: Vec<CollectedFailure>,
    pub summary: RunSummary,
    pub batches: usize,
    pub elapsed: Duration,
    pub items_per_second: f64,
    pub memory_delta_mib: f64,
    /// Largest pool size used by any batch.
    pub workers: usize,
}

/// Processes a job list in consecutive batches on a bounded pool.
///
/// Within a batch every item runs as its own task, at most `workers` at a
/// time; an item that exceeds `item_timeout` is recorded as a failure with
/// reason [`TIMEOUT_REASON`] and its task is left to finish in the background.
/// The pool size is re-evaluated before every batch.
pub struct BatchOrchestrator<E: Extractor> {
    extractor: E,
    config: BatchConfig,
}

impl<E> BatchOrchestrator<E>
where
    E: Extractor + 'static,
{
    pub fn new(extractor: E, config: BatchConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self { extractor, config })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn run<P, R>(&self, jobs: &[Job], probe: &mut P, reporter: &R) -> BatchReport
    where
        P: ResourceProbe,
        R: BatchReporter,
    {
        let started = Instant::now();
        let memory_before = probe.used_memory_mib();
        let batches = self.config.batch_count(jobs.len());

        reporter.report(BatchEvent::RunStarted {
            total_jobs: jobs.len(),
            batches,
        });

        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut max_workers = 0;

        for (i, batch) in jobs.chunks(self.config.batch_size).enumerate() {
            let index = i + 1;
            let workers =
                resolve_workers(self.config.mode, self.config.max_workers, &probe.host());
            max_workers = max_workers.max(workers);

            reporter.report(BatchEvent::BatchStarted {
                index,
                batches,
                size: batch.len(),
                workers,
            });

            let (succeeded, failed) = (records.len(), failures.len());
            for outcome in self.run_batch(batch, workers).await {
                match outcome {
                    Outcome::Success(record) => records.push(CollectedRecord {
                        worker_id: self.config.label.clone(),
                        record,
                    }),
                    Outcome::Failure { job_id, reason } => {
                        reporter.report(BatchEvent::ItemFailed {
                            job: &job_id,
                            error: &reason,
                        });
                        failures.push(CollectedFailure {
                            worker_id: self.config.label.clone(),
                            job_id,
                            error: reason,
                        });
                    }
                }
            }

            reporter.report(BatchEvent::BatchFinished {
                index,
                succeeded: records.len() - succeeded,
                failed: failures.len() - failed,
            });

            if index < batches {
                reporter.report(BatchEvent::Pausing {
                    after_batch: index,
                    pause: self.config.batch_pause,
                });
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        let elapsed = started.elapsed();
        let items_per_second = if elapsed.as_secs_f64() > 0.0 {
            jobs.len() as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let report = BatchReport {
            summary: RunSummary::from_collected(&records, &failures),
            records,
            failures,
            batches,
            elapsed,
            items_per_second,
            memory_delta_mib: probe.used_memory_mib() - memory_before,
            workers: max_workers,
        };
        reporter.report(BatchEvent::RunFinished { report: &report });
        report
    }

    /// Run one batch to completion. Outcomes come back in completion order.
    async fn run_batch(&self, batch: &[Job], workers: usize) -> Vec<Outcome> {
        let timeout = self.config.item_timeout;

        stream::iter(batch.iter().cloned())
            .map(|job| {
                let extractor = self.extractor.clone();
                async move {
                    let task_job = job.clone();
                    let handle =
                        tokio::spawn(async move { extractor.extract(&task_job).await });

                    match tokio::time::timeout(timeout, handle).await {
                        Ok(Ok(Ok(record))) => Outcome::Success(record),
                        Ok(Ok(Err(e))) => Outcome::failure(job, e.to_string()),
                        Ok(Err(e)) => Outcome::failure(job, format!("extractor panicked: {e}")),
                        Err(_) => Outcome::failure(job, TIMEOUT_REASON),
                    }
                }
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn jobs(n: usize) -> Vec<Job> {
        (0..n).map(|i| format!("job-{i}")).collect()
    }

    fn fast_config() -> BatchConfig {
        BatchConfig::default()
            .with_batch_pause(Duration::ZERO)
            .with_item_timeout(Duration::from_millis(200))
            .with_max_workers(Some(4))
    }

    #[tokio::test]
    async fn splits_into_ceil_batches_and_pauses_between() {
        let orchestrator = BatchOrchestrator::new(MockExtractor::new(), fast_config()).unwrap();
        let reporter = MockBatchReporter::new();
        let mut probe = FixedProbe::new(4, 8.0);

        let report = orchestrator.run(&jobs(250), &mut probe, &reporter).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.records.len(), 250);
        let events = reporter.events();
        let started: Vec<&String> = events
            .iter()
            .filter(|e| e.starts_with("BatchStarted"))
            .collect();
        assert_eq!(
            started,
            vec!["BatchStarted:1:100", "BatchStarted:2:100", "BatchStarted:3:50"]
        );
        let pauses: Vec<&String> = events.iter().filter(|e| e.starts_with("Pausing")).collect();
        assert_eq!(pauses, vec!["Pausing:1", "Pausing:2"]);
        assert_eq!(events.last().map(String::as_str), Some("RunFinished"));
    }

    #[tokio::test]
    async fn every_job_is_accounted_for_once() {
        let extractor = MockExtractor::new()
            .fail_on("job-3", "no header")
            .fail_on("job-7", "no header");
        let orchestrator = BatchOrchestrator::new(extractor, fast_config().with_batch_size(4))
            .unwrap();

        let report = orchestrator
            .run(&jobs(10), &mut FixedProbe::new(2, 4.0), &MockBatchReporter::new())
            .await;

        assert_eq!(report.records.len() + report.failures.len(), 10);
        let mut failed: Vec<&str> = report.failures.iter().map(|f| f.job_id.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["job-3", "job-7"]);
        assert_eq!(report.summary.successes, 8);
        assert_eq!(report.summary.by_worker.get("local"), Some(&8));
        assert_eq!(report.failures[0].error, "Extraction failed: no header");
    }

    #[tokio::test]
    async fn slow_item_fails_with_timeout_reason() {
        let extractor = MockExtractor::new().delay_on("job-1", Duration::from_secs(5));
        let orchestrator = BatchOrchestrator::new(extractor, fast_config()).unwrap();

        let report = orchestrator
            .run(&jobs(3), &mut FixedProbe::new(2, 4.0), &MockBatchReporter::new())
            .await;

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].job_id, "job-1");
        assert_eq!(report.failures[0].error, TIMEOUT_REASON);
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency() {
        let extractor = MockExtractor::new();
        let config = fast_config().with_max_workers(Some(3)).with_batch_size(50);
        let orchestrator = BatchOrchestrator::new(extractor.clone(), config).unwrap();

        let report = orchestrator
            .run(&jobs(50), &mut FixedProbe::new(16, 64.0), &MockBatchReporter::new())
            .await;

        assert_eq!(report.workers, 3);
        assert!(extractor.max_in_flight() <= 3);
        assert!(extractor.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn auto_mode_sizes_pool_from_host() {
        let config = fast_config().with_max_workers(None);
        let orchestrator = BatchOrchestrator::new(MockExtractor::new(), config).unwrap();

        let report = orchestrator
            .run(&jobs(5), &mut FixedProbe::new(8, 4.0), &MockBatchReporter::new())
            .await;

        assert_eq!(report.workers, 2);
    }

    #[tokio::test]
    async fn reports_memory_delta() {
        let orchestrator = BatchOrchestrator::new(MockExtractor::new(), fast_config()).unwrap();
        let mut probe = FixedProbe::new(2, 4.0).with_used_memory(vec![100.0, 164.0]);

        let report = orchestrator
            .run(&jobs(2), &mut probe, &MockBatchReporter::new())
            .await;

        assert_eq!(report.memory_delta_mib, 64.0);
    }

    #[tokio::test]
    async fn empty_job_list_is_a_no_op() {
        let orchestrator = BatchOrchestrator::new(MockExtractor::new(), fast_config()).unwrap();
        let reporter = MockBatchReporter::new();

        let report = orchestrator
            .run(&[], &mut FixedProbe::new(2, 4.0), &reporter)
            .await;

        assert_eq!(report.batches, 0);
        assert!(report.records.is_empty());
        assert_eq!(report.workers, 0);
        assert_eq!(reporter.events(), vec!["RunStarted", "RunFinished"]);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = BatchConfig::default().with_batch_size(0);
        assert!(BatchOrchestrator::new(MockExtractor::new(), config).is_err());
    }
}
