pub mod batch;
pub mod broker;
pub mod codec;
pub mod collector;
pub mod concurrency;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod monitor;
pub mod sink;
pub mod summary;
pub mod testutil;
pub mod traits;
pub mod worker;

pub use batch::{BatchConfig, BatchOrchestrator, BatchReport, BatchReporter, TracingBatchReporter};
pub use broker::{Broker, BrokerList};
pub use codec::Report;
pub use collector::{CollectorConfig, ResultsCollector};
pub use concurrency::{ConcurrencyMode, HostResources, resolve_workers, shard};
pub use coordinator::{Coordinator, JobSource, select_range};
pub use error::AppError;
pub use job::{Job, Outcome, Record, WorkerConfig};
pub use monitor::{ResourceMonitor, ResourceProbe, ResourceSummary, SysinfoProbe};
pub use sink::{CollectedFailure, CollectedRecord, CsvSink, OutcomeSink};
pub use summary::RunSummary;
pub use traits::{BlockingExtractor, Extractor, Fetcher};
pub use worker::{TracingWorkerReporter, WorkerReporter, WorkerService, WorkerSummary};
