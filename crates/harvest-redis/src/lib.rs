pub mod broker;
pub mod config;

pub use broker::RedisBroker;
pub use config::{BrokerConfig, ListKeys};
