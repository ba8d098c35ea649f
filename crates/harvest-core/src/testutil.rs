//! Test utilities: in-memory implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, so clones share
//! state and tests can assert on what was recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::batch::{BatchEvent, BatchReporter};
use crate::broker::{Broker, BrokerList};
use crate::concurrency::HostResources;
use crate::error::AppError;
use crate::job::Record;
use crate::monitor::ResourceProbe;
use crate::sink::{CollectedFailure, CollectedRecord, OutcomeSink};
use crate::traits::{Extractor, Fetcher};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BrokerState {
    lists: HashMap<BrokerList, VecDeque<String>>,
    pop_error: Option<AppError>,
    push_error: Option<AppError>,
}

/// In-memory broker with the same head-push/tail-pop semantics as Redis lists.
#[derive(Clone)]
pub struct MemoryBroker {
    enabled: bool,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            enabled: true,
            state: Arc::new(Mutex::new(BrokerState::default())),
        }
    }

    /// A client that never reached its broker.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// A broker whose job queue already holds `jobs`, first one popped first.
    pub fn with_jobs(jobs: &[&str]) -> Self {
        let broker = Self::new();
        {
            let mut state = broker.state.lock().unwrap();
            let queue = state.lists.entry(BrokerList::Jobs).or_default();
            for job in jobs {
                queue.push_front(job.to_string());
            }
        }
        broker
    }

    /// Current contents of a list, in pop order.
    pub fn items(&self, list: BrokerList) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .lists
            .get(&list)
            .map(|items| items.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `pop` fail with `error`.
    pub fn fail_next_pop(&self, error: AppError) {
        self.state.lock().unwrap().pop_error = Some(error);
    }

    /// Make the next `push` fail with `error`.
    pub fn fail_next_push(&self, error: AppError) {
        self.state.lock().unwrap().push_error = Some(error);
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    async fn enqueue(&self, jobs: &[String]) -> Result<bool, AppError> {
        if !self.enabled {
            return Ok(false);
        }
        let mut state = self.state.lock().unwrap();
        let queue = state.lists.entry(BrokerList::Jobs).or_default();
        for job in jobs {
            queue.push_front(job.clone());
        }
        Ok(true)
    }

    async fn pop(&self, list: BrokerList) -> Result<Option<String>, AppError> {
        if !self.enabled {
            return Ok(None);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.pop_error.take() {
            return Err(error);
        }
        Ok(state.lists.get_mut(&list).and_then(VecDeque::pop_back))
    }

    async fn push(&self, list: BrokerList, value: &str) -> Result<(), AppError> {
        if !self.enabled {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.push_error.take() {
            return Err(error);
        }
        state
            .lists
            .entry(list)
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn len(&self, list: BrokerList) -> Result<usize, AppError> {
        if !self.enabled {
            return Ok(0);
        }
        let state = self.state.lock().unwrap();
        Ok(state.lists.get(&list).map_or(0, VecDeque::len))
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Behaviour {
    Fail(String),
    Delay(Duration),
    Respond(Record),
    Panic(String),
}

/// Extractor returning `Record::new(job)` unless told otherwise for a job.
#[derive(Clone, Default)]
pub struct MockExtractor {
    behaviours: Arc<Mutex<HashMap<String, Behaviour>>>,
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `job` with `AppError::ExtractionFailed(message)`.
    pub fn fail_on(self, job: &str, message: &str) -> Self {
        self.set(job, Behaviour::Fail(message.to_string()))
    }

    /// Sleep for `delay` before succeeding on `job`.
    pub fn delay_on(self, job: &str, delay: Duration) -> Self {
        self.set(job, Behaviour::Delay(delay))
    }

    /// Panic with `message` when extracting `job`.
    pub fn panic_on(self, job: &str, message: &str) -> Self {
        self.set(job, Behaviour::Panic(message.to_string()))
    }

    pub fn respond_with(self, job: &str, record: Record) -> Self {
        self.set(job, Behaviour::Respond(record))
    }

    /// Jobs seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of extractions that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn set(self, job: &str, behaviour: Behaviour) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(job.to_string(), behaviour);
        self
    }
}

impl Extractor for MockExtractor {
    async fn extract(&self, job: &str) -> Result<Record, AppError> {
        self.calls.lock().unwrap().push(job.to_string());
        let behaviour = self.behaviours.lock().unwrap().get(job).cloned();

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        // Yield so concurrent extractions overlap.
        tokio::task::yield_now().await;
        let result = match behaviour {
            Some(Behaviour::Fail(message)) => Err(AppError::ExtractionFailed(message)),
            Some(Behaviour::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Record::new(job))
            }
            Some(Behaviour::Respond(record)) => Ok(record),
            Some(Behaviour::Panic(message)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("{message}")
            }
            None => Ok(Record::new(job)),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Fetcher serving canned pages by URL; unknown URLs fail with HTTP 404.
///
/// A scripted error is returned once, after which the URL is unknown.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, Result<String, AppError>>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(html.to_string()));
        self
    }

    pub fn with_error(self, url: &str, error: AppError) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error));
        self
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let mut pages = self.pages.lock().unwrap();
        match pages.get(url) {
            Some(Ok(html)) => Ok(html.clone()),
            Some(Err(_)) => match pages.remove(url) {
                Some(Err(e)) => Err(e),
                _ => Err(AppError::HttpError(format!("HTTP 404 for {url}"))),
            },
            None => Err(AppError::HttpError(format!("HTTP 404 for {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// FixedProbe
// ---------------------------------------------------------------------------

/// Probe with a fixed host and scripted readings.
///
/// Readings are `(cpu%, memory%)` pairs, returned in order and then repeated
/// from the last one. Used-memory figures are served the same way.
pub struct FixedProbe {
    host: HostResources,
    readings: VecDeque<(f32, f32)>,
    pending_memory: Option<f32>,
    used_mib: VecDeque<f64>,
}

impl FixedProbe {
    pub fn new(cpu_count: usize, total_memory_gib: f64) -> Self {
        Self {
            host: HostResources {
                cpu_count,
                total_memory_gib,
            },
            readings: VecDeque::new(),
            pending_memory: None,
            used_mib: VecDeque::new(),
        }
    }

    pub fn with_readings(mut self, readings: Vec<(f32, f32)>) -> Self {
        self.readings = readings.into();
        self
    }

    pub fn with_used_memory(mut self, used_mib: Vec<f64>) -> Self {
        self.used_mib = used_mib.into();
        self
    }

    fn next_reading(&mut self) -> (f32, f32) {
        match self.readings.len() {
            0 => (0.0, 0.0),
            1 => self.readings[0],
            _ => self.readings.pop_front().unwrap_or_default(),
        }
    }
}

impl ResourceProbe for FixedProbe {
    fn cpu_percent(&mut self) -> f32 {
        let (cpu, memory) = self.next_reading();
        self.pending_memory = Some(memory);
        cpu
    }

    fn memory_percent(&mut self) -> f32 {
        match self.pending_memory.take() {
            Some(memory) => memory,
            None => self.next_reading().1,
        }
    }

    fn used_memory_mib(&mut self) -> f64 {
        match self.used_mib.len() {
            0 => 0.0,
            1 => self.used_mib[0],
            _ => self.used_mib.pop_front().unwrap_or_default(),
        }
    }

    fn host(&mut self) -> HostResources {
        self.host
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Sink keeping the last snapshot in memory. `writes` counts successful
/// writes only.
#[derive(Clone, Default)]
pub struct MemorySink {
    pub records: Arc<Mutex<Vec<CollectedRecord>>>,
    pub failures: Arc<Mutex<Vec<CollectedFailure>>>,
    pub writes: Arc<AtomicUsize>,
    write_error: Arc<Mutex<Option<AppError>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make the next `write_snapshot` fail with `error`.
    pub fn fail_next_write(&self, error: AppError) {
        *self.write_error.lock().unwrap() = Some(error);
    }
}

impl OutcomeSink for MemorySink {
    fn write_snapshot(
        &self,
        records: &[CollectedRecord],
        failures: &[CollectedFailure],
    ) -> Result<(), AppError> {
        if let Some(error) = self.write_error.lock().unwrap().take() {
            return Err(error);
        }
        *self.records.lock().unwrap() = records.to_vec();
        *self.failures.lock().unwrap() = failures.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporters
// ---------------------------------------------------------------------------

/// Worker reporter recording event names.
#[derive(Clone, Default)]
pub struct MockWorkerReporter {
    pub events: Arc<Mutex<Vec<String>>>,
    cancel_on_idle: Option<CancellationToken>,
}

impl MockWorkerReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` the first time the worker finds the queue empty.
    pub fn cancel_when_idle(token: CancellationToken) -> Self {
        Self {
            events: Arc::default(),
            cancel_on_idle: Some(token),
        }
    }
}

impl WorkerReporter for MockWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::Polling => "Polling",
            WorkerEvent::QueueEmpty { .. } => {
                if let Some(token) = &self.cancel_on_idle {
                    token.cancel();
                }
                "QueueEmpty"
            }
            WorkerEvent::JobClaimed { .. } => "JobClaimed",
            WorkerEvent::JobCompleted { .. } => "JobCompleted",
            WorkerEvent::JobFailed { .. } => "JobFailed",
            WorkerEvent::ReportFailed { .. } => "ReportFailed",
            WorkerEvent::BrokerFailed { .. } => "BrokerFailed",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

/// Batch reporter recording compact event labels such as `BatchStarted:2:100`.
#[derive(Clone, Default)]
pub struct MockBatchReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockBatchReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BatchReporter for MockBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        let label = match event {
            BatchEvent::RunStarted { .. } => "RunStarted".to_string(),
            BatchEvent::BatchStarted { index, size, .. } => format!("BatchStarted:{index}:{size}"),
            BatchEvent::ItemFailed { job, .. } => format!("ItemFailed:{job}"),
            BatchEvent::BatchFinished { index, .. } => format!("BatchFinished:{index}"),
            BatchEvent::Pausing { after_batch, .. } => format!("Pausing:{after_batch}"),
            BatchEvent::RunFinished { .. } => "RunFinished".to_string(),
        };
        self.events.lock().unwrap().push(label);
    }
}
