//! # Runtime Configuration
//!
//! [`SystemConfig`] is layered from (in increasing precedence):
//!
//! 1. built-in defaults (`#[serde(default)]` on every struct),
//! 2. an optional TOML file,
//! 3. `TROUPE__*` environment variables, with `__` separating nested keys.
//!
//! ```text
//! TROUPE__MIDDLEMAN__HEARTBEAT_INTERVAL_MS=250
//! TROUPE__SCHEDULER__MAX_THREADS=4
//! TROUPE__MIDDLEMAN__APP_IDENTIFIERS=chat,metrics
//! ```

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub scheduler: SchedulerConfig,
    pub middleman: MiddlemanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads of the actor runtime. 0 uses one per core.
    pub max_threads: usize,
    /// Grace period given to actors on shutdown before they are killed.
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            shutdown_grace_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlemanConfig {
    pub network_backend: String,
    pub host: String,
    /// Peers must share at least one identifier to connect.
    pub app_identifiers: Vec<String>,
    /// Upper bound of backend requests served per multiplexer wakeup.
    pub max_consecutive_reads: usize,
    /// 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Serve backend requests only through `Middleman::poll_backend`.
    pub manual_multiplexing: bool,
    /// Worker threads of the multiplexer runtime. 0 runs it current-thread.
    pub workers: usize,
    pub connect_timeout_ms: u64,
    pub remote_lookup_timeout_ms: u64,
}

impl Default for MiddlemanConfig {
    fn default() -> Self {
        Self {
            network_backend: "loopback".to_string(),
            host: "localhost".to_string(),
            app_identifiers: vec!["generic-troupe-application".to_string()],
            max_consecutive_reads: 50,
            heartbeat_interval_ms: 0,
            manual_multiplexing: false,
            workers: 0,
            connect_timeout_ms: 10_000,
            remote_lookup_timeout_ms: 5 * 60 * 1_000,
        }
    }
}

impl MiddlemanConfig {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn remote_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_lookup_timeout_ms)
    }
}

/// `TROUPE__SECTION__KEY` variables. List settings take comma-separated values.
fn environment() -> Environment {
    Environment::with_prefix("TROUPE")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("middleman.app_identifiers")
}

impl SystemConfig {
    /// Loads defaults, then `path` (if given), then `TROUPE__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading config file");
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(env);
        let config: SystemConfig = builder.build()?.try_deserialize()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Parses a TOML document on top of the defaults. Environment is ignored.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SystemConfig::default();
        assert_eq!(config.middleman.network_backend, "loopback");
        assert_eq!(config.middleman.max_consecutive_reads, 50);
        assert_eq!(config.middleman.heartbeat_interval(), None);
        assert_eq!(
            config.middleman.remote_lookup_timeout(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = SystemConfig::from_toml_str(
            r#"
            [scheduler]
            max_threads = 2

            [middleman]
            heartbeat_interval_ms = 100
            app_identifiers = ["chat"]
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_threads, 2);
        assert_eq!(config.scheduler.shutdown_grace_ms, 1_000);
        assert_eq!(
            config.middleman.heartbeat_interval(),
            Some(Duration::from_millis(100))
        );
        assert_eq!(config.middleman.app_identifiers, vec!["chat".to_string()]);
        assert_eq!(config.middleman.host, "localhost");
    }

    #[test]
    fn environment_sets_lists_and_scalars() {
        let vars: config::Map<String, String> = [
            ("TROUPE__MIDDLEMAN__APP_IDENTIFIERS", "chat,metrics"),
            ("TROUPE__MIDDLEMAN__HEARTBEAT_INTERVAL_MS", "20"),
            ("TROUPE__SCHEDULER__MAX_THREADS", "3"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = SystemConfig::load_with(None, environment().source(Some(vars))).unwrap();
        assert_eq!(
            config.middleman.app_identifiers,
            vec!["chat".to_string(), "metrics".to_string()]
        );
        assert_eq!(
            config.middleman.heartbeat_interval(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(config.scheduler.max_threads, 3);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(SystemConfig::from_toml_str("[middleman\nhost = 1").is_err());
    }
}
