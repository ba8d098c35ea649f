use harvest_core::broker::{Broker, BrokerList};
use harvest_core::codec::Report;
use harvest_core::job::{Outcome, Record};

use crate::integration::common::setup_test_broker;

fn jobs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn enqueue_then_dequeue_is_fifo() {
    let (broker, _container) = setup_test_broker().await;

    assert!(broker.enqueue(&jobs(&["a", "b"])).await.unwrap());
    assert!(broker.enqueue(&jobs(&["c"])).await.unwrap());
    assert_eq!(broker.queue_length().await.unwrap(), 3);

    let mut seen = Vec::new();
    while let Some(job) = broker.dequeue().await.unwrap() {
        seen.push(job);
    }
    assert_eq!(seen, jobs(&["a", "b", "c"]));
    assert_eq!(broker.queue_length().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn empty_enqueue_is_accepted() {
    let (broker, _container) = setup_test_broker().await;

    assert!(broker.enqueue(&[]).await.unwrap());
    assert_eq!(broker.queue_length().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn concurrent_consumers_claim_each_job_once() {
    let (broker, _container) = setup_test_broker().await;
    let all: Vec<String> = (0..200).map(|i| format!("job-{i}")).collect();
    broker.enqueue(&all).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = broker.dequeue().await.unwrap() {
                claimed.push(job);
            }
            claimed
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }
    claimed.sort();
    let mut expected = all.clone();
    expected.sort();
    assert_eq!(claimed, expected);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn outcome_lists_are_independent() {
    let (broker, _container) = setup_test_broker().await;

    let success = Report::new("w1", Outcome::Success(Record::new("a")))
        .encode()
        .unwrap();
    let failure = Report::new("w1", Outcome::failure("b", "HTTP 500"))
        .encode()
        .unwrap();
    broker.publish_result(&success).await.unwrap();
    broker.publish_error(&failure).await.unwrap();

    assert_eq!(broker.len(BrokerList::Results).await.unwrap(), 1);
    assert_eq!(broker.len(BrokerList::Errors).await.unwrap(), 1);
    assert_eq!(broker.queue_length().await.unwrap(), 0);

    let line = broker.pop(BrokerList::Errors).await.unwrap().unwrap();
    let report = Report::decode_failure(&line).unwrap();
    assert_eq!(report.outcome, Outcome::failure("b", "HTTP 500"));
    assert_eq!(broker.pop(BrokerList::Errors).await.unwrap(), None);
}
