use std::collections::BTreeMap;
use std::fmt;

use crate::sink::{CollectedFailure, CollectedRecord};

/// Success/failure counts of a run, with successes grouped by worker.
///
/// Always recomputed from the full set of collected outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub successes: usize,
    pub failures: usize,
    pub by_worker: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_collected(records: &[CollectedRecord], failures: &[CollectedFailure]) -> Self {
        let mut by_worker = BTreeMap::new();
        for collected in records {
            *by_worker.entry(collected.worker_id.clone()).or_insert(0) += 1;
        }
        Self {
            successes: records.len(),
            failures: failures.len(),
            by_worker,
        }
    }

    pub fn total(&self) -> usize {
        self.successes + self.failures
    }

    /// Share of successful jobs in percent, 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.successes as f64 * 100.0 / self.total() as f64
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Successful results: {}", self.successes)?;
        writeln!(f, "Errors: {}", self.failures)?;
        if !self.by_worker.is_empty() {
            writeln!(f, "Results per worker:")?;
            for (worker, count) in &self.by_worker {
                writeln!(f, "  {worker}: {count}")?;
            }
        }
        Ok(())
    }
}
