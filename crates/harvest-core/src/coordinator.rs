//! Loading jobs from an input source and seeding the broker with them.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::broker::Broker;
use crate::error::AppError;
use crate::job::Job;

/// How job identifiers are laid out in the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFormat {
    /// One identifier per line.
    Lines,
    /// A named column of a CSV file with a header row.
    CsvColumn(String),
}

/// An ordered, finite source of job identifiers.
#[derive(Debug, Clone)]
pub struct JobSource {
    path: PathBuf,
    format: InputFormat,
}

impl JobSource {
    pub fn lines(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: InputFormat::Lines,
        }
    }

    pub fn csv_column(path: impl Into<PathBuf>, column: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: InputFormat::CsvColumn(column.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every identifier, in file order. Entries are trimmed and blank
    /// entries skipped.
    pub fn load(&self) -> Result<Vec<Job>, AppError> {
        let jobs = match &self.format {
            InputFormat::Lines => self.load_lines()?,
            InputFormat::CsvColumn(column) => self.load_column(column)?,
        };
        tracing::debug!(path = %self.path.display(), count = jobs.len(), "Jobs loaded");
        Ok(jobs)
    }

    /// [`load`](Self::load) followed by [`select_range`].
    pub fn load_range(&self, range: Range<usize>) -> Result<Vec<Job>, AppError> {
        Ok(select_range(self.load()?, range))
    }

    fn load_lines(&self) -> Result<Vec<Job>, AppError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            AppError::InputSourceError(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        Ok(clean(text.lines()))
    }

    fn load_column(&self, column: &str) -> Result<Vec<Job>, AppError> {
        let input_error = |e: csv::Error| {
            AppError::InputSourceError(format!("Failed to read {}: {e}", self.path.display()))
        };

        let mut reader = csv::Reader::from_path(&self.path).map_err(input_error)?;
        let index = reader
            .headers()
            .map_err(input_error)?
            .iter()
            .position(|h| h.trim() == column)
            .ok_or_else(|| {
                AppError::InputSourceError(format!(
                    "Column '{column}' not found in {}",
                    self.path.display()
                ))
            })?;

        let mut values = Vec::new();
        for row in reader.records() {
            let row = row.map_err(input_error)?;
            values.push(row.get(index).unwrap_or_default().to_string());
        }
        Ok(clean(values.iter().map(String::as_str)))
    }
}

fn clean<'a>(entries: impl Iterator<Item = &'a str>) -> Vec<Job> {
    entries
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// The `[start, end)` slice of `jobs`, with both bounds clamped to its length.
/// An inverted range selects nothing.
pub fn select_range(mut jobs: Vec<Job>, range: Range<usize>) -> Vec<Job> {
    let end = range.end.min(jobs.len());
    let start = range.start.min(end);
    jobs.truncate(end);
    jobs.drain(..start);
    jobs
}

/// Seeds the broker's job queue.
pub struct Coordinator<B: Broker> {
    broker: B,
}

impl<B: Broker> Coordinator<B> {
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    /// Enqueue `jobs` in order. Returns how many were enqueued.
    ///
    /// A disabled broker enqueues nothing and is reported as
    /// [`AppError::BrokerUnavailable`], so callers can exit non-zero.
    pub async fn enqueue_jobs(&self, jobs: &[Job]) -> Result<usize, AppError> {
        if !self.broker.enqueue(jobs).await? {
            return Err(AppError::BrokerUnavailable(
                "broker not connected, no jobs enqueued".into(),
            ));
        }
        tracing::info!(count = jobs.len(), "Jobs enqueued");
        Ok(jobs.len())
    }

    /// Load the `range` slice of `source` and enqueue it.
    pub async fn seed(&self, source: &JobSource, range: Range<usize>) -> Result<usize, AppError> {
        let jobs = source.load_range(range)?;
        if jobs.is_empty() {
            tracing::warn!(path = %source.path().display(), "No jobs selected from input");
        }
        self.enqueue_jobs(&jobs).await
    }

    pub async fn queue_length(&self) -> Result<usize, AppError> {
        self.broker.queue_length().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerList;
    use crate::testutil::MemoryBroker;
    use std::io::Write;

    fn write_input(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn owned(items: &[&str]) -> Vec<Job> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lines_are_trimmed_and_blanks_skipped() {
        let file = write_input("  https://a.io/1 \n\nhttps://a.io/2\r\n   \nhttps://a.io/3");
        let jobs = JobSource::lines(file.path()).load().unwrap();
        assert_eq!(jobs, owned(&["https://a.io/1", "https://a.io/2", "https://a.io/3"]));
    }

    #[test]
    fn csv_column_is_selected_by_header() {
        let file = write_input("id,url\n1,https://a.io/1\n2, https://a.io/2 \n3,\n");
        let jobs = JobSource::csv_column(file.path(), "url").load().unwrap();
        assert_eq!(jobs, owned(&["https://a.io/1", "https://a.io/2"]));
    }

    #[test]
    fn missing_column_is_an_input_error() {
        let file = write_input("id,link\n1,x\n");
        let err = JobSource::csv_column(file.path(), "url").load().unwrap_err();
        assert!(matches!(err, AppError::InputSourceError(_)));
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = JobSource::lines("/nonexistent/jobs.txt").load().unwrap_err();
        assert!(matches!(err, AppError::InputSourceError(_)));
    }

    #[test]
    fn range_is_clamped() {
        let jobs = owned(&["a", "b", "c", "d"]);
        assert_eq!(select_range(jobs.clone(), 1..3), owned(&["b", "c"]));
        assert_eq!(select_range(jobs.clone(), 2..100), owned(&["c", "d"]));
        assert_eq!(select_range(jobs.clone(), 10..20), Vec::<Job>::new());
        assert_eq!(select_range(jobs.clone(), 3..1), Vec::<Job>::new());
        assert_eq!(select_range(jobs, 0..usize::MAX), owned(&["a", "b", "c", "d"]));
    }

    #[tokio::test]
    async fn seed_enqueues_selected_slice_in_order() {
        let file = write_input("a\nb\nc\nd\ne\n");
        let broker = MemoryBroker::new();
        let coordinator = Coordinator::new(broker.clone());

        let count = coordinator
            .seed(&JobSource::lines(file.path()), 1..4)
            .await
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(broker.items(BrokerList::Jobs), owned(&["b", "c", "d"]));
        assert_eq!(coordinator.queue_length().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn disabled_broker_is_reported() {
        let coordinator = Coordinator::new(MemoryBroker::disabled());
        let err = coordinator.enqueue_jobs(&owned(&["a"])).await.unwrap_err();
        assert!(matches!(err, AppError::BrokerUnavailable(_)));
    }

    #[tokio::test]
    async fn empty_selection_enqueues_nothing() {
        let broker = MemoryBroker::new();
        let coordinator = Coordinator::new(broker.clone());
        assert_eq!(coordinator.enqueue_jobs(&[]).await.unwrap(), 0);
        assert!(broker.items(BrokerList::Jobs).is_empty());
    }
}
