use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// A unit of work: an opaque identifier or URL.
pub type Job = String;

/// Structured data extracted for a single job.
///
/// Maps field name to value; a field that could not be found is kept as `None`
/// so that every record of a run exposes the same columns. The originating job
/// identifier is always present under [`Record::JOB_FIELD`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Option<String>>,
}

impl Record {
    pub const JOB_FIELD: &'static str = "job";

    pub fn new(job: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(Self::JOB_FIELD.to_string(), Some(job.into()));
        Self { fields }
    }

    /// Build a record from a raw field map. The map must carry the job field.
    pub fn from_fields(fields: BTreeMap<String, Option<String>>) -> Result<Self, AppError> {
        match fields.get(Self::JOB_FIELD) {
            Some(Some(_)) => Ok(Self { fields }),
            _ => Err(AppError::DecodeError(format!(
                "record has no '{}' field",
                Self::JOB_FIELD
            ))),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field. The job field cannot be overwritten.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        if name == Self::JOB_FIELD {
            return;
        }
        self.fields.insert(name, value);
    }

    pub fn job(&self) -> &str {
        self.fields
            .get(Self::JOB_FIELD)
            .and_then(|v| v.as_deref())
            .unwrap_or_default()
    }

    /// Value of a field, `None` when the field is missing or null.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Option<String>> {
        &self.fields
    }
}

/// Result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Record),
    Failure { job_id: String, reason: String },
}

impl Outcome {
    pub fn failure(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Outcome::Failure {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Outcome::Success(record) => record.job(),
            Outcome::Failure { job_id, .. } => job_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success(record) => write!(f, "success({})", record.job()),
            Outcome::Failure { job_id, reason } => write!(f, "failure({job_id}: {reason})"),
        }
    }
}

/// Check that a worker identifier can be carried in the pipe-delimited encoding.
pub fn validate_worker_id(worker_id: &str) -> Result<(), AppError> {
    if worker_id.trim().is_empty() {
        return Err(AppError::ConfigError("worker id must not be empty".into()));
    }
    if worker_id.contains('|') {
        return Err(AppError::ConfigError(format!(
            "worker id '{worker_id}' must not contain '|'"
        )));
    }
    Ok(())
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Number of workers taking part in the run (informational for the pull model).
    pub total_workers: usize,
    /// Backoff when the job queue is empty.
    pub poll_interval: Duration,
    /// Pause after each reported job.
    pub job_delay: Duration,
    /// Upper bound on a single extraction.
    pub job_timeout: Duration,
    /// Take a resource sample every N claimed jobs.
    pub sample_every: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            total_workers: 1,
            poll_interval: Duration::from_secs(5),
            job_delay: Duration::from_secs(1),
            job_timeout: Duration::from_secs(30),
            sample_every: 10,
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_total_workers(mut self, total: usize) -> Self {
        self.total_workers = total;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_delay(mut self, delay: Duration) -> Self {
        self.job_delay = delay;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_sample_every(mut self, every: u64) -> Self {
        self.sample_every = every;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        validate_worker_id(&self.worker_id)?;
        if self.total_workers == 0 {
            return Err(AppError::ConfigError(
                "total worker count must be at least 1".into(),
            ));
        }
        if self.sample_every == 0 {
            return Err(AppError::ConfigError(
                "sample cadence must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_always_has_job() {
        let record = Record::new("https://example.com/p/1").with_field("name", None);
        assert_eq!(record.job(), "https://example.com/p/1");
        assert!(record.contains("name"));
        assert_eq!(record.get("name"), None);
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_record_job_field_is_immutable() {
        let mut record = Record::new("a");
        record.set(Record::JOB_FIELD, Some("b".into()));
        assert_eq!(record.job(), "a");
    }

    #[test]
    fn test_from_fields_requires_job() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Some("Ana".to_string()));
        assert!(matches!(
            Record::from_fields(fields.clone()),
            Err(AppError::DecodeError(_))
        ));

        fields.insert(Record::JOB_FIELD.to_string(), Some("42".to_string()));
        let record = Record::from_fields(fields).unwrap();
        assert_eq!(record.job(), "42");
        assert_eq!(record.get("name"), Some("Ana"));
    }

    #[test]
    fn test_outcome_job_id() {
        assert_eq!(Outcome::Success(Record::new("a")).job_id(), "a");
        assert_eq!(Outcome::failure("b", "boom").job_id(), "b");
        assert!(!Outcome::failure("b", "boom").is_success());
    }

    #[test]
    fn test_worker_id_validation() {
        assert!(validate_worker_id("worker-1").is_ok());
        assert!(validate_worker_id("").is_err());
        assert!(validate_worker_id("   ").is_err());
        assert!(validate_worker_id("a|b").is_err());
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_worker_id("w-7")
            .with_total_workers(3)
            .with_poll_interval(Duration::from_millis(10))
            .with_sample_every(5);

        assert_eq!(config.worker_id, "w-7");
        assert_eq!(config.total_workers, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.job_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());
        assert!(config.clone().with_total_workers(0).validate().is_err());
    }

    #[test]
    fn test_default_worker_id_is_random() {
        let a = WorkerConfig::default();
        let b = WorkerConfig::default();
        assert!(a.worker_id.starts_with("worker-"));
        assert_ne!(a.worker_id, b.worker_id);
    }
}
