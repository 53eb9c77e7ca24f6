use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of the environment variables [`LifecycleConfig`] reads.
pub const ENV_PREFIX: &str = "CADENCE_";

/// Configuration service
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    /// Create a config service seeded from the process environment.
    pub fn new() -> Self {
        let service = Self::empty();
        for (key, value) in env::vars() {
            service.set(&key, &value);
        }
        service
    }

    /// Create a config service with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    /// Parse the value under `key`. Missing and unparsable values are `None`;
    /// the latter is logged.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable config value");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }
}

/// Settings for a [`LifecycleManager`](crate::lifecycle::LifecycleManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Background queues used for parallel warm-up.
    pub warm_up_workers: usize,
    /// How long `start` waits for parallel warm-up. `None` waits until done.
    pub warm_up_timeout_ms: Option<u64>,
    /// Keep instances alive until teardown. When `false`, teardown records
    /// hold weak references and dropped instances are skipped.
    pub retain_instances: bool,
    /// Leave everything running when `close` follows a failed start.
    pub skip_shutdown_on_start_failure: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            warm_up_workers: num_cpus::get().max(1),
            warm_up_timeout_ms: None,
            retain_instances: true,
            skip_shutdown_on_start_failure: false,
        }
    }
}

impl LifecycleConfig {
    /// Read `CADENCE_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_service(&ConfigService::new())
    }

    /// Read `CADENCE_*` keys from `config`, keeping defaults for missing ones.
    ///
    /// Recognized keys: `CADENCE_WARM_UP_WORKERS`, `CADENCE_WARM_UP_TIMEOUT_MS`,
    /// `CADENCE_RETAIN_INSTANCES`, `CADENCE_SKIP_SHUTDOWN_ON_START_FAILURE`.
    pub fn from_service(config: &ConfigService) -> Self {
        let key = |name: &str| format!("{ENV_PREFIX}{name}");
        let mut settings = Self::default();

        if let Some(workers) = config.get_parsed::<usize>(&key("WARM_UP_WORKERS")) {
            settings.warm_up_workers = workers.max(1);
        }
        if let Some(timeout) = config.get_parsed::<u64>(&key("WARM_UP_TIMEOUT_MS")) {
            settings.warm_up_timeout_ms = Some(timeout);
        }
        if let Some(retain) = config.get_parsed::<bool>(&key("RETAIN_INSTANCES")) {
            settings.retain_instances = retain;
        }
        if let Some(skip) = config.get_parsed::<bool>(&key("SKIP_SHUTDOWN_ON_START_FAILURE")) {
            settings.skip_shutdown_on_start_failure = skip;
        }
        settings
    }

    pub fn warm_up_workers(mut self, workers: usize) -> Self {
        self.warm_up_workers = workers.max(1);
        self
    }

    pub fn warm_up_timeout(mut self, timeout: Duration) -> Self {
        self.warm_up_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn retain_instances(mut self, retain: bool) -> Self {
        self.retain_instances = retain;
        self
    }

    pub fn skip_shutdown_on_start_failure(mut self, skip: bool) -> Self {
        self.skip_shutdown_on_start_failure = skip;
        self
    }

    /// The warm-up wait as a [`Duration`].
    pub fn warm_up_wait(&self) -> Option<Duration> {
        self.warm_up_timeout_ms.map(Duration::from_millis)
    }
}
