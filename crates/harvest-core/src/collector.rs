use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerList};
use crate::codec::Report;
use crate::error::AppError;
use crate::job::Outcome;
use crate::sink::{CollectedFailure, CollectedRecord, OutcomeSink};
use crate::summary::RunSummary;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Time between two collection passes.
    pub interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

impl CollectorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// What one collection pass took off the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionPass {
    pub new_results: usize,
    pub new_errors: usize,
    /// Entries that could not be decoded and were dropped.
    pub dropped: usize,
    /// Summary over everything collected so far.
    pub summary: RunSummary,
}

impl CollectionPass {
    pub fn is_empty(&self) -> bool {
        self.new_results == 0 && self.new_errors == 0 && self.dropped == 0
    }
}

/// Drains the outcome lists, keeps every decoded outcome, and rewrites the
/// full snapshot through an [`OutcomeSink`].
///
/// Safe to run next to active workers: popping is atomic on the broker, so
/// each reported entry is taken by exactly one pass. Malformed entries are
/// logged and dropped.
pub struct ResultsCollector<B, S>
where
    B: Broker,
    S: OutcomeSink,
{
    broker: B,
    sink: S,
    config: CollectorConfig,
    records: Vec<CollectedRecord>,
    failures: Vec<CollectedFailure>,
    /// Collected outcomes not yet persisted by a successful write.
    dirty: bool,
}

impl<B, S> ResultsCollector<B, S>
where
    B: Broker,
    S: OutcomeSink,
{
    pub fn new(broker: B, sink: S, config: CollectorConfig) -> Self {
        Self {
            broker,
            sink,
            config,
            records: Vec::new(),
            failures: Vec::new(),
            dirty: false,
        }
    }

    pub fn records(&self) -> &[CollectedRecord] {
        &self.records
    }

    pub fn failures(&self) -> &[CollectedFailure] {
        &self.failures
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_collected(&self.records, &self.failures)
    }

    /// Drain both outcome lists until empty and persist the accumulated set.
    ///
    /// The sink is written whenever the accumulated set holds outcomes that
    /// no write has persisted yet, including ones left over from a pass whose
    /// write failed.
    pub async fn collect_once(&mut self) -> Result<CollectionPass, AppError> {
        let mut pass = CollectionPass::default();

        while let Some(line) = self.broker.pop(BrokerList::Results).await? {
            match Report::decode_success(&line) {
                Ok(Report {
                    worker_id,
                    outcome: Outcome::Success(record),
                }) => {
                    self.records.push(CollectedRecord { worker_id, record });
                    pass.new_results += 1;
                }
                Ok(_) => pass.dropped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, entry = %line, "Dropping malformed result");
                    pass.dropped += 1;
                }
            }
        }

        while let Some(line) = self.broker.pop(BrokerList::Errors).await? {
            match Report::decode_failure(&line) {
                Ok(Report {
                    worker_id,
                    outcome: Outcome::Failure { job_id, reason },
                }) => {
                    self.failures.push(CollectedFailure {
                        worker_id,
                        job_id,
                        error: reason,
                    });
                    pass.new_errors += 1;
                }
                Ok(_) => pass.dropped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, entry = %line, "Dropping malformed error");
                    pass.dropped += 1;
                }
            }
        }

        if pass.new_results > 0 || pass.new_errors > 0 {
            self.dirty = true;
        }
        if self.dirty {
            self.sink.write_snapshot(&self.records, &self.failures)?;
            self.dirty = false;
        }

        pass.summary = self.summary();
        tracing::info!(
            new_results = pass.new_results,
            new_errors = pass.new_errors,
            dropped = pass.dropped,
            successes = pass.summary.successes,
            failures = pass.summary.failures,
            "Collection pass finished"
        );
        Ok(pass)
    }

    /// Collect on a fixed interval until cancelled, then run one final pass.
    ///
    /// A failed pass is logged and retried on the next tick; only the final
    /// pass propagates its error.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<RunSummary, AppError> {
        tracing::info!(
            interval_secs = self.config.interval.as_secs_f64(),
            "Collector started"
        );

        loop {
            if let Err(e) = self.collect_once().await {
                tracing::error!(error = %e, "Collection pass failed");
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        tracing::info!("Collector stopping, running final pass");
        let pass = self.collect_once().await?;
        Ok(pass.summary)
    }
}
