use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::codec::Report;
use crate::error::AppError;
use crate::job::{Outcome, WorkerConfig};
use crate::monitor::{ResourceMonitor, ResourceProbe, ResourceSummary};
use crate::traits::Extractor;

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
        total_workers: usize,
    },
    Polling,
    QueueEmpty {
        worker_id: &'a str,
    },
    JobClaimed {
        job: &'a str,
    },
    JobCompleted {
        job: &'a str,
        fields: usize,
    },
    JobFailed {
        job: &'a str,
        error: &'a str,
    },
    ReportFailed {
        job: &'a str,
        error: &'a str,
    },
    BrokerFailed {
        error: &'a str,
    },
    Stopped {
        worker_id: &'a str,
        summary: &'a WorkerSummary,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started {
                worker_id,
                total_workers,
            } => {
                tracing::info!(%worker_id, %total_workers, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::QueueEmpty { worker_id } => {
                tracing::info!(%worker_id, "No jobs in queue");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::info!(%job, "Job claimed");
            }
            WorkerEvent::JobCompleted { job, fields } => {
                tracing::info!(%job, %fields, "Job completed");
            }
            WorkerEvent::JobFailed { job, error } => {
                tracing::warn!(%job, %error, "Job failed");
            }
            WorkerEvent::ReportFailed { job, error } => {
                tracing::error!(%job, %error, "Failed to publish outcome, job lost");
            }
            WorkerEvent::BrokerFailed { error } => {
                tracing::error!(%error, "Failed to claim job");
            }
            WorkerEvent::Stopped { worker_id, summary } => {
                tracing::info!(
                    %worker_id,
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    resources = %summary.resources,
                    "Worker stopped"
                );
            }
        }
    }
}

/// Counters of a finished worker run.
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub resources: ResourceSummary,
}

/// Mutable state owned by one run of the loop.
struct LoopState<P: ResourceProbe> {
    monitor: ResourceMonitor<P>,
    processed: u64,
    succeeded: u64,
    failed: u64,
}

/// Long-running consumer of the broker's job queue.
///
/// Each iteration goes idle → claimed → processing → reporting → idle: claim one
/// job, run the extractor under a timeout, publish the encoded outcome, then
/// pause. An outcome is published only after the extractor has returned, so a
/// job interrupted mid-extraction leaves nothing behind. Claimed jobs are never
/// re-queued.
pub struct WorkerService<B, E>
where
    B: Broker,
    E: Extractor,
{
    broker: B,
    extractor: E,
    config: WorkerConfig,
}

impl<B, E> WorkerService<B, E>
where
    B: Broker,
    E: Extractor,
{
    pub fn new(broker: B, extractor: E, config: WorkerConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            broker,
            extractor,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the worker loop until cancellation.
    ///
    /// Cancellation is observed between jobs and while waiting, never during
    /// an extraction.
    pub async fn run<P, WR>(
        &self,
        probe: P,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> WorkerSummary
    where
        P: ResourceProbe,
        WR: WorkerReporter,
    {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
            total_workers: self.config.total_workers,
        });

        let mut state = LoopState {
            monitor: ResourceMonitor::start(probe),
            processed: 0,
            succeeded: 0,
            failed: 0,
        };

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self.broker.dequeue().await {
                Ok(Some(job)) => {
                    reporter.report(WorkerEvent::JobClaimed { job: &job });

                    if state.processed % self.config.sample_every == 0 {
                        state.monitor.sample();
                    }

                    let outcome = self.process_job(&job, reporter).await;
                    self.publish(outcome, &mut state, reporter).await;
                    state.processed += 1;

                    if !pause(self.config.job_delay, &cancel_token).await {
                        break;
                    }
                }
                Ok(None) => {
                    reporter.report(WorkerEvent::QueueEmpty {
                        worker_id: &self.config.worker_id,
                    });
                    if !pause(self.config.poll_interval, &cancel_token).await {
                        break;
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(WorkerEvent::BrokerFailed { error: &error });
                    if !pause(self.config.poll_interval * 2, &cancel_token).await {
                        break;
                    }
                }
            }
        }

        let summary = WorkerSummary {
            processed: state.processed,
            succeeded: state.succeeded,
            failed: state.failed,
            resources: state.monitor.finish(),
        };
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
            summary: &summary,
        });
        summary
    }

    /// Run the extractor for one job. Errors, explicit failures, panics and
    /// timeouts all become a failure outcome.
    async fn process_job<WR: WorkerReporter>(&self, job: &str, reporter: &WR) -> Outcome {
        let timeout = self.config.job_timeout;
        let extraction = AssertUnwindSafe(self.extractor.extract(job)).catch_unwind();
        let outcome = match tokio::time::timeout(timeout, extraction).await {
            Ok(Ok(Ok(record))) => Outcome::Success(record),
            Ok(Ok(Err(e))) => Outcome::failure(job, e.to_string()),
            Ok(Err(payload)) => Outcome::failure(
                job,
                format!("extractor panicked: {}", panic_message(payload.as_ref())),
            ),
            Err(_) => Outcome::failure(job, AppError::Timeout(timeout.as_secs()).to_string()),
        };

        match &outcome {
            Outcome::Success(record) => reporter.report(WorkerEvent::JobCompleted {
                job,
                fields: record.len(),
            }),
            Outcome::Failure { reason, .. } => reporter.report(WorkerEvent::JobFailed {
                job,
                error: reason,
            }),
        }
        outcome
    }

    async fn publish<P: ResourceProbe, WR: WorkerReporter>(
        &self,
        outcome: Outcome,
        state: &mut LoopState<P>,
        reporter: &WR,
    ) {
        let job = outcome.job_id().to_string();
        let report = Report::new(&self.config.worker_id, outcome);

        let sent = match report.encode() {
            Ok(encoded) if report.outcome.is_success() => {
                state.succeeded += 1;
                self.broker.publish_result(&encoded).await
            }
            Ok(encoded) => {
                state.failed += 1;
                self.broker.publish_error(&encoded).await
            }
            Err(e) => {
                state.failed += 1;
                let fallback =
                    Report::new(&self.config.worker_id, Outcome::failure(&job, e.to_string()));
                match fallback.encode() {
                    Ok(encoded) => self.broker.publish_error(&encoded).await,
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = sent {
            let error = e.to_string();
            reporter.report(WorkerEvent::ReportFailed {
                job: &job,
                error: &error,
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn pause(duration: Duration, cancel_token: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel_token.is_cancelled();
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => true,
        () = cancel_token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerList;
    use crate::job::Record;
    use crate::testutil::*;

    fn fast_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_worker_id("w1")
            .with_poll_interval(Duration::from_millis(5))
            .with_job_delay(Duration::ZERO)
            .with_job_timeout(Duration::from_millis(200))
    }

    async fn run_until_idle<E: Extractor>(
        broker: &MemoryBroker,
        extractor: E,
        config: WorkerConfig,
    ) -> (WorkerSummary, Vec<String>) {
        let worker = WorkerService::new(broker.clone(), extractor, config).unwrap();
        let token = CancellationToken::new();
        let reporter = MockWorkerReporter::cancel_when_idle(token.clone());
        let summary = worker.run(FixedProbe::new(4, 8.0), token, &reporter).await;
        let events = reporter.events.lock().unwrap().clone();
        (summary, events)
    }

    #[tokio::test]
    async fn successes_and_failures_go_to_their_lists() {
        let broker = MemoryBroker::with_jobs(&["a", "b", "c"]);
        let extractor = MockExtractor::new().fail_on("b", "no header");

        let (summary, _) = run_until_idle(&broker, extractor, fast_config()).await;

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(broker.items(BrokerList::Jobs).len(), 0);
        assert_eq!(broker.items(BrokerList::Results).len(), 2);
        assert_eq!(
            broker.items(BrokerList::Errors),
            vec!["w1|b|Extraction failed: no header".to_string()]
        );
    }

    #[tokio::test]
    async fn jobs_are_processed_in_fifo_order() {
        let broker = MemoryBroker::with_jobs(&["1", "2", "3"]);
        let extractor = MockExtractor::new();

        run_until_idle(&broker, extractor.clone(), fast_config()).await;

        assert_eq!(extractor.calls(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn slow_extraction_times_out_as_failure() {
        let broker = MemoryBroker::with_jobs(&["slow"]);
        let extractor = MockExtractor::new().delay_on("slow", Duration::from_secs(5));

        let (summary, _) = run_until_idle(&broker, extractor, fast_config()).await;

        assert_eq!(summary.failed, 1);
        let errors = broker.items(BrokerList::Errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("w1|slow|Timed out"));
    }

    #[tokio::test]
    async fn panicking_extraction_becomes_failure_and_loop_continues() {
        let broker = MemoryBroker::with_jobs(&["a", "b", "c"]);
        let extractor = MockExtractor::new().panic_on("b", "selector bug");

        let (summary, _) = run_until_idle(&broker, extractor, fast_config()).await;

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(broker.items(BrokerList::Jobs).is_empty());
        assert_eq!(broker.items(BrokerList::Results).len(), 2);
        assert_eq!(
            broker.items(BrokerList::Errors),
            vec!["w1|b|extractor panicked: selector bug".to_string()]
        );
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("index out of bounds"));
        assert_eq!(panic_message(owned.as_ref()), "index out of bounds");
        let literal: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(literal.as_ref()), "boom");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn samples_every_nth_job() {
        let jobs: Vec<String> = (0..21).map(|i| format!("job-{i}")).collect();
        let refs: Vec<&str> = jobs.iter().map(String::as_str).collect();
        let broker = MemoryBroker::with_jobs(&refs);

        let (summary, _) = run_until_idle(&broker, MockExtractor::new(), fast_config()).await;

        // jobs 0, 10 and 20
        assert_eq!(summary.processed, 21);
        assert_eq!(summary.resources.samples, 3);
    }

    #[tokio::test]
    async fn event_sequence_for_single_job() {
        let broker = MemoryBroker::with_jobs(&["a"]);
        let (_, events) = run_until_idle(&broker, MockExtractor::new(), fast_config()).await;

        assert_eq!(
            events,
            vec![
                "Started",
                "Polling",
                "JobClaimed",
                "JobCompleted",
                "Polling",
                "QueueEmpty",
                "Stopped"
            ]
        );
    }

    #[tokio::test]
    async fn claim_error_backs_off_and_continues() {
        let broker = MemoryBroker::with_jobs(&["a"]);
        broker.fail_next_pop(AppError::BrokerError("connection reset".into()));

        let (summary, events) = run_until_idle(&broker, MockExtractor::new(), fast_config()).await;

        assert!(events.contains(&"BrokerFailed".to_string()));
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn publish_error_is_reported_not_fatal() {
        let broker = MemoryBroker::with_jobs(&["a", "b"]);
        broker.fail_next_push(AppError::BrokerError("READONLY".into()));

        let (summary, events) = run_until_idle(&broker, MockExtractor::new(), fast_config()).await;

        assert_eq!(summary.processed, 2);
        assert!(events.contains(&"ReportFailed".to_string()));
        assert_eq!(broker.items(BrokerList::Results).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_claims_nothing() {
        let broker = MemoryBroker::with_jobs(&["a"]);
        let worker = WorkerService::new(broker.clone(), MockExtractor::new(), fast_config()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let summary = worker
            .run(FixedProbe::new(1, 1.0), token, &MockWorkerReporter::new())
            .await;

        assert_eq!(summary.processed, 0);
        assert_eq!(broker.items(BrokerList::Jobs), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn published_record_decodes_back() {
        let broker = MemoryBroker::with_jobs(&["p/1"]);
        let record = Record::new("p/1").with_field("name", Some("Ana".into()));
        let extractor = MockExtractor::new().respond_with("p/1", record);

        run_until_idle(&broker, extractor, fast_config()).await;

        let results = broker.items(BrokerList::Results);
        let report = Report::decode_success(&results[0]).unwrap();
        assert_eq!(report.worker_id, "w1");
        match report.outcome {
            Outcome::Success(record) => assert_eq!(record.get("name"), Some("Ana")),
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[test]
    fn invalid_worker_id_is_rejected() {
        let config = fast_config().with_worker_id("bad|id");
        assert!(WorkerService::new(MemoryBroker::new(), MockExtractor::new(), config).is_err());
    }
}
