use std::time::Duration;

use harvest_core::AppError;
use harvest_core::broker::BrokerList;

/// Redis list names for the three broker lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListKeys {
    pub jobs: String,
    pub results: String,
    pub errors: String,
}

impl Default for ListKeys {
    fn default() -> Self {
        Self {
            jobs: "harvest:jobs".into(),
            results: "harvest:results".into(),
            errors: "harvest:errors".into(),
        }
    }
}

impl ListKeys {
    pub fn key(&self, list: BrokerList) -> &str {
        match list {
            BrokerList::Jobs => &self.jobs,
            BrokerList::Results => &self.results,
            BrokerList::Errors => &self.errors,
        }
    }
}

/// Configuration for the broker connection.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub keys: ListKeys,
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "redis".into(),
            port: 6379,
            db: 0,
            keys: ListKeys::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `REDIS_HOST` (optional, defaults to `redis`)
    /// - `REDIS_PORT` (optional, defaults to 6379)
    /// - `REDIS_DB` (optional, defaults to 0)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with variables read through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("REDIS_HOST").filter(|h| !h.is_empty()) {
            config.host = host;
        }
        if let Some(raw) = lookup("REDIS_PORT") {
            config.port = raw.parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid REDIS_PORT '{raw}': must be a port number"))
            })?;
        }
        if let Some(raw) = lookup("REDIS_DB") {
            config.db = raw.parse().ok().filter(|db| *db >= 0).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid REDIS_DB '{raw}': must be a non-negative integer"
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_keys(mut self, keys: ListKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_points_at_compose_service() {
        let config = BrokerConfig::default();
        assert_eq!(config.url(), "redis://redis:6379/0");
    }

    #[test]
    fn builders_override_fields() {
        let config = BrokerConfig::default()
            .with_host("127.0.0.1")
            .with_port(6380)
            .with_db(2);
        assert_eq!(config.url(), "redis://127.0.0.1:6380/2");
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn lookup_without_variables_uses_defaults() {
        let config = BrokerConfig::from_lookup(vars(&[])).unwrap();
        assert_eq!(config.url(), "redis://redis:6379/0");
    }

    #[test]
    fn lookup_reads_host_port_and_db() {
        let config = BrokerConfig::from_lookup(vars(&[
            ("REDIS_HOST", "10.0.0.5"),
            ("REDIS_PORT", "6390"),
            ("REDIS_DB", "3"),
        ]))
        .unwrap();
        assert_eq!(config.url(), "redis://10.0.0.5:6390/3");
    }

    #[test]
    fn lookup_rejects_bad_numbers() {
        for (name, value) in [
            ("REDIS_PORT", "not-a-port"),
            ("REDIS_PORT", "70000"),
            ("REDIS_DB", "-1"),
        ] {
            let err = BrokerConfig::from_lookup(vars(&[(name, value)])).unwrap_err();
            assert!(matches!(err, AppError::ConfigError(_)), "{name}={value}");
        }
    }

    #[test]
    fn keys_are_distinct_per_list() {
        let keys = ListKeys::default();
        assert_ne!(keys.key(BrokerList::Jobs), keys.key(BrokerList::Results));
        assert_ne!(keys.key(BrokerList::Results), keys.key(BrokerList::Errors));
    }
}
