use std::time::Duration;

use harvest_core::broker::{Broker, BrokerList};
use harvest_core::testutil::{FixedProbe, MemoryBroker, MockExtractor, MockWorkerReporter};
use harvest_core::{
    CollectorConfig, Coordinator, CsvSink, JobSource, ResultsCollector, WorkerConfig,
    WorkerService,
};
use tokio_util::sync::CancellationToken;

fn worker_config(id: &str) -> WorkerConfig {
    WorkerConfig::default()
        .with_worker_id(id)
        .with_total_workers(2)
        .with_poll_interval(Duration::from_millis(5))
        .with_job_delay(Duration::ZERO)
        .with_job_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn coordinator_workers_and_collector_agree() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("jobs.txt");
    std::fs::write(&input, "a\nb\nc\n").unwrap();

    let broker = MemoryBroker::new();
    let enqueued = Coordinator::new(broker.clone())
        .seed(&JobSource::lines(&input), 0..usize::MAX)
        .await
        .unwrap();
    assert_eq!(enqueued, 3);

    let extractor = MockExtractor::new().fail_on("b", "no header");
    let token = CancellationToken::new();
    let reporter = MockWorkerReporter::cancel_when_idle(token.clone());

    let w1 = WorkerService::new(broker.clone(), extractor.clone(), worker_config("w1")).unwrap();
    let w2 = WorkerService::new(broker.clone(), extractor.clone(), worker_config("w2")).unwrap();
    let (s1, s2) = tokio::join!(
        w1.run(FixedProbe::new(2, 4.0), token.clone(), &reporter),
        w2.run(FixedProbe::new(2, 4.0), token.clone(), &reporter),
    );
    assert_eq!(s1.processed + s2.processed, 3);
    assert_eq!(broker.queue_length().await.unwrap(), 0);

    let sink = CsvSink::in_dir(dir.path().join("out"));
    let mut collector =
        ResultsCollector::new(broker.clone(), sink.clone(), CollectorConfig::default());
    let pass = collector.collect_once().await.unwrap();

    assert_eq!(pass.summary.successes, 2);
    assert_eq!(pass.summary.failures, 1);
    assert_eq!(pass.summary.by_worker.values().sum::<usize>(), 2);
    assert_eq!(broker.len(BrokerList::Results).await.unwrap(), 0);
    assert_eq!(broker.len(BrokerList::Errors).await.unwrap(), 0);

    let results = std::fs::read_to_string(sink.results_path()).unwrap();
    assert_eq!(results.lines().next(), Some("worker_id,job"));
    assert_eq!(results.lines().count(), 3);
    let errors = std::fs::read_to_string(sink.errors_path()).unwrap();
    assert!(errors.contains(",b,Extraction failed: no header"));
}

#[tokio::test]
async fn disabled_broker_stops_the_pipeline_at_the_coordinator() {
    let coordinator = Coordinator::new(MemoryBroker::disabled());
    let err = coordinator
        .enqueue_jobs(&["a".to_string()])
        .await
        .unwrap_err();
    assert!(err.is_broker_failure());
}
