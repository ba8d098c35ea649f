use std::future::Future;
use std::sync::Arc;

use crate::error::AppError;
use crate::job::Record;

/// Fetches raw page content for a job.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Turns a job into a structured record.
///
/// The coordination layer never looks inside an extractor: a returned error
/// and an explicit failure are treated the same way, as a failure outcome for
/// the job. Callers apply their own timeout.
pub trait Extractor: Send + Sync + Clone {
    fn extract(&self, job: &str) -> impl Future<Output = Result<Record, AppError>> + Send;
}

/// Adapter for synchronous, possibly blocking extraction functions.
///
/// Each call runs on tokio's blocking pool so a slow extraction never stalls
/// the async workers. A panic inside the function becomes a failure.
pub struct BlockingExtractor<F> {
    func: Arc<F>,
}

impl<F> Clone for BlockingExtractor<F> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<F> BlockingExtractor<F>
where
    F: Fn(&str) -> Result<Record, AppError> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

impl<F> Extractor for BlockingExtractor<F>
where
    F: Fn(&str) -> Result<Record, AppError> + Send + Sync + 'static,
{
    async fn extract(&self, job: &str) -> Result<Record, AppError> {
        let func = Arc::clone(&self.func);
        let job = job.to_string();
        tokio::task::spawn_blocking(move || func(&job))
            .await
            .map_err(|e| AppError::ExtractionFailed(format!("extractor panicked: {e}")))?
    }
}
