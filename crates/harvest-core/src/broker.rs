use std::fmt;
use std::future::Future;

use crate::error::AppError;

/// The three lists kept in the shared broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerList {
    Jobs,
    Results,
    Errors,
}

impl BrokerList {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerList::Jobs => "jobs",
            BrokerList::Results => "results",
            BrokerList::Errors => "errors",
        }
    }
}

impl fmt::Display for BrokerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared list store used as the job queue and the outcome mailbox.
///
/// Every call is a single round trip and each push/pop is atomic, so several
/// workers and collectors can share the same broker without client-side locks.
/// Jobs are pushed at the head and popped from the tail, giving FIFO order.
///
/// A client that could not reach the broker at construction time is *disabled*:
/// `enqueue` returns `false`, pops return `None`, lengths are `0`, and publishing
/// is a no-op. Failures after construction surface as [`AppError::BrokerError`].
pub trait Broker: Send + Sync + Clone {
    /// Push jobs onto the queue. Returns `false` when the client is disabled.
    fn enqueue(&self, jobs: &[String]) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Remove one string from the tail of a list, `None` when it is empty.
    fn pop(&self, list: BrokerList)
    -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    /// Push one string onto the head of a list.
    fn push(&self, list: BrokerList, value: &str)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn len(&self, list: BrokerList) -> impl Future<Output = Result<usize, AppError>> + Send;

    /// Claim the next job. `None` means the queue is currently empty; callers poll.
    fn dequeue(&self) -> impl Future<Output = Result<Option<String>, AppError>> + Send {
        self.pop(BrokerList::Jobs)
    }

    fn publish_result(&self, encoded: &str) -> impl Future<Output = Result<(), AppError>> + Send {
        self.push(BrokerList::Results, encoded)
    }

    fn publish_error(&self, encoded: &str) -> impl Future<Output = Result<(), AppError>> + Send {
        self.push(BrokerList::Errors, encoded)
    }

    fn queue_length(&self) -> impl Future<Output = Result<usize, AppError>> + Send {
        self.len(BrokerList::Jobs)
    }
}
