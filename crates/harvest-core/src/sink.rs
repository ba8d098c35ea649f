//! Durable output for collected outcomes.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::AppError;
use crate::job::Record;

/// Leading column of the results file. Record fields may not use this name.
pub const WORKER_ID_COLUMN: &str = "worker_id";

/// A successful record together with the worker that reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedRecord {
    pub worker_id: String,
    pub record: Record,
}

/// A failed job as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedFailure {
    pub worker_id: String,
    pub job_id: String,
    pub error: String,
}

/// Persists the accumulated outcomes of a run.
pub trait OutcomeSink: Send + Sync {
    /// Replace the persisted snapshot with the full set collected so far.
    fn write_snapshot(
        &self,
        records: &[CollectedRecord],
        failures: &[CollectedFailure],
    ) -> Result<(), AppError>;
}

/// Writes records and failures to two CSV files, overwriting them on each call.
///
/// Record columns are `worker_id` followed by the sorted union of all record
/// fields; a null field is an empty cell. Each file is written to a temporary
/// sibling first and renamed into place, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct CsvSink {
    results_path: PathBuf,
    errors_path: PathBuf,
}

impl CsvSink {
    pub fn new(results_path: impl Into<PathBuf>, errors_path: impl Into<PathBuf>) -> Self {
        Self {
            results_path: results_path.into(),
            errors_path: errors_path.into(),
        }
    }

    /// `results.csv` and `errors.csv` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join("results.csv"), dir.join("errors.csv"))
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn errors_path(&self) -> &Path {
        &self.errors_path
    }

    pub fn write_records(&self, records: &[CollectedRecord]) -> Result<(), AppError> {
        let columns: BTreeSet<&str> = records
            .iter()
            .flat_map(|c| c.record.field_names())
            .collect();

        replace_file(&self.results_path, |path| {
            let mut writer = csv::Writer::from_path(path)?;
            let mut header = vec![WORKER_ID_COLUMN];
            header.extend(columns.iter().copied());
            writer.write_record(&header)?;

            for collected in records {
                let mut row = vec![collected.worker_id.as_str()];
                row.extend(
                    columns
                        .iter()
                        .map(|col| collected.record.get(col).unwrap_or_default()),
                );
                writer.write_record(&row)?;
            }
            writer.flush().map_err(|e| AppError::OutputError(e.to_string()))
        })
    }

    pub fn write_failures(&self, failures: &[CollectedFailure]) -> Result<(), AppError> {
        replace_file(&self.errors_path, |path| {
            let mut writer = csv::Writer::from_path(path)?;
            for failure in failures {
                writer.serialize(failure)?;
            }
            writer.flush().map_err(|e| AppError::OutputError(e.to_string()))
        })
    }
}

impl OutcomeSink for CsvSink {
    fn write_snapshot(
        &self,
        records: &[CollectedRecord],
        failures: &[CollectedFailure],
    ) -> Result<(), AppError> {
        if !records.is_empty() {
            self.write_records(records)?;
            tracing::info!(
                count = records.len(),
                path = %self.results_path.display(),
                "Results saved"
            );
        }
        if !failures.is_empty() {
            self.write_failures(failures)?;
            tracing::info!(
                count = failures.len(),
                path = %self.errors_path.display(),
                "Errors saved"
            );
        }
        Ok(())
    }
}

fn replace_file<F>(path: &Path, write: F) -> Result<(), AppError>
where
    F: FnOnce(&Path) -> Result<(), AppError>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::OutputError(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    write(&tmp)?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::OutputError(format!("Failed to replace {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collected(worker: &str, record: Record) -> CollectedRecord {
        CollectedRecord {
            worker_id: worker.into(),
            record,
        }
    }

    #[test]
    fn writes_union_of_columns_with_worker_id() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::in_dir(dir.path());
        let records = vec![
            collected("w1", Record::new("a").with_field("name", Some("Ana".into()))),
            collected("w2", Record::new("b").with_field("age", None)),
        ];

        sink.write_snapshot(&records, &[]).unwrap();

        let text = fs::read_to_string(sink.results_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "worker_id,age,job,name");
        assert_eq!(lines[1], "w1,,a,Ana");
        assert_eq!(lines[2], "w2,,b,");
        assert!(!sink.errors_path().exists());
    }

    #[test]
    fn writes_failures_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::in_dir(dir.path().join("out"));
        let failures = vec![CollectedFailure {
            worker_id: "w1".into(),
            job_id: "https://x.io/1".into(),
            error: "HTTP 404, gone".into(),
        }];

        sink.write_snapshot(&[], &failures).unwrap();

        let text = fs::read_to_string(sink.errors_path()).unwrap();
        assert_eq!(
            text,
            "worker_id,job_id,error\nw1,https://x.io/1,\"HTTP 404, gone\"\n"
        );
    }

    #[test]
    fn snapshot_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::in_dir(dir.path());

        sink.write_records(&[collected("w1", Record::new("a"))]).unwrap();
        sink.write_records(&[
            collected("w1", Record::new("a")),
            collected("w1", Record::new("b")),
        ])
        .unwrap();

        let text = fs::read_to_string(sink.results_path()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!dir.path().join("results.csv.tmp").exists());
    }
}
