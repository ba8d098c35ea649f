use std::time::Duration;

use harvest_redis::{BrokerConfig, RedisBroker};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

/// Spins up a Redis container and returns a connected broker.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_broker() -> (RedisBroker, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(ContainerPort::Tcp(6379))
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");

    let config = BrokerConfig::default()
        .with_host(host.to_string())
        .with_port(port)
        .with_connect_timeout(Duration::from_secs(2));

    // Retry until the server answers PING
    const MAX_RETRIES: u32 = 30;
    for _ in 0..MAX_RETRIES {
        let broker = RedisBroker::connect(&config).await;
        if broker.is_enabled() {
            return (broker, container);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to Redis after {MAX_RETRIES} retries");
}
