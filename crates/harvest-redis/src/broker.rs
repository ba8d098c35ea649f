use harvest_core::AppError;
use harvest_core::broker::{Broker, BrokerList};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::config::{BrokerConfig, ListKeys};

/// Redis-backed [`Broker`] over three lists.
///
/// Jobs are `LPUSH`ed and `RPOP`ped, so the queue is FIFO and each pop is
/// atomic across every client. When the server cannot be reached (or does not
/// answer `PING`) at construction time the client starts *disabled* and every
/// operation degrades to its no-op value.
#[derive(Clone)]
pub struct RedisBroker {
    conn: Option<MultiplexedConnection>,
    keys: ListKeys,
}

impl RedisBroker {
    /// Connect and verify the connection with `PING`.
    ///
    /// Never fails: an unreachable broker is logged once and yields a
    /// disabled client.
    pub async fn connect(config: &BrokerConfig) -> Self {
        let conn = match open(config).await {
            Ok(conn) => {
                tracing::info!(host = %config.host, port = config.port, "Connected to broker");
                Some(conn)
            }
            Err(e) => {
                tracing::error!(
                    host = %config.host,
                    port = config.port,
                    error = %e,
                    "Broker unreachable, client disabled"
                );
                None
            }
        };

        Self {
            conn,
            keys: config.keys.clone(),
        }
    }

    /// A client that never talks to a server.
    pub fn disabled(keys: ListKeys) -> Self {
        Self { conn: None, keys }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub fn keys(&self) -> &ListKeys {
        &self.keys
    }
}

async fn open(config: &BrokerConfig) -> Result<MultiplexedConnection, AppError> {
    let client = redis::Client::open(config.url()).map_err(broker_unavailable)?;

    let mut conn = tokio::time::timeout(
        config.connect_timeout,
        client.get_multiplexed_async_connection(),
    )
    .await
    .map_err(|_| AppError::BrokerUnavailable(format!("connect to {} timed out", config.url())))?
    .map_err(broker_unavailable)?;

    let pong: String = tokio::time::timeout(
        config.connect_timeout,
        redis::cmd("PING").query_async(&mut conn),
    )
    .await
    .map_err(|_| AppError::BrokerUnavailable("PING timed out".into()))?
    .map_err(broker_unavailable)?;

    if pong != "PONG" {
        return Err(AppError::BrokerUnavailable(format!(
            "unexpected PING reply: {pong}"
        )));
    }
    Ok(conn)
}

fn broker_unavailable(e: redis::RedisError) -> AppError {
    AppError::BrokerUnavailable(e.to_string())
}

fn broker_error(e: redis::RedisError) -> AppError {
    AppError::BrokerError(e.to_string())
}

impl Broker for RedisBroker {
    async fn enqueue(&self, jobs: &[String]) -> Result<bool, AppError> {
        let Some(conn) = &self.conn else {
            return Ok(false);
        };
        if jobs.is_empty() {
            return Ok(true);
        }

        let mut conn = conn.clone();
        let _: usize = conn
            .lpush(&self.keys.jobs, jobs)
            .await
            .map_err(broker_error)?;
        Ok(true)
    }

    async fn pop(&self, list: BrokerList) -> Result<Option<String>, AppError> {
        let Some(conn) = &self.conn else {
            return Ok(None);
        };

        let mut conn = conn.clone();
        conn.rpop(self.keys.key(list), None)
            .await
            .map_err(broker_error)
    }

    async fn push(&self, list: BrokerList, value: &str) -> Result<(), AppError> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };

        let mut conn = conn.clone();
        let _: usize = conn
            .lpush(self.keys.key(list), value)
            .await
            .map_err(broker_error)?;
        Ok(())
    }

    async fn len(&self, list: BrokerList) -> Result<usize, AppError> {
        let Some(conn) = &self.conn else {
            return Ok(0);
        };

        let mut conn = conn.clone();
        conn.llen(self.keys.key(list)).await.map_err(broker_error)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn unreachable_server_yields_disabled_client() {
        // Port 1 is reserved and closed on any sane host.
        let config = BrokerConfig::default()
            .with_host("127.0.0.1")
            .with_port(1)
            .with_connect_timeout(Duration::from_millis(500));

        let broker = RedisBroker::connect(&config).await;

        assert!(!broker.is_enabled());
        assert!(!broker.enqueue(&["a".to_string()]).await.unwrap());
        assert_eq!(broker.dequeue().await.unwrap(), None);
        assert_eq!(broker.queue_length().await.unwrap(), 0);
        broker.publish_result("w1|{}").await.unwrap();
    }

    #[tokio::test]
    async fn disabled_client_is_inert() {
        let broker = RedisBroker::disabled(ListKeys::default());
        assert!(!broker.is_enabled());
        assert_eq!(broker.pop(BrokerList::Errors).await.unwrap(), None);
        assert_eq!(broker.len(BrokerList::Results).await.unwrap(), 0);
    }
}
