//! Benchmark configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `HYBRIDTABLE__*` environment variables (`__` separates nested
//! keys, e.g. `HYBRIDTABLE__FILL__CONCURRENCY=64`).

use crate::cells::{FillOptions, WritePolicy};
use crate::error::{Error, Result};
use crate::reconstruct::ReconstructOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HYBRIDTABLE";

/// Top-level benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Cell store keyspace; one set per table inside it
    pub keyspace: String,
    pub columns: usize,
    pub rows: usize,
    /// Characters per generated cell
    pub payload_len: usize,
    /// Seed for view shuffles and payloads; random when unset
    pub seed: Option<u64>,
    pub fill: FillConfig,
    pub reconstruct: ReconstructConfig,
    pub store: StoreConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            keyspace: "treelab".to_string(),
            columns: 100,
            rows: 10_000,
            payload_len: 20,
            seed: None,
            fill: FillConfig::default(),
            reconstruct: ReconstructConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Cell filler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    pub concurrency: usize,
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
    pub fail_fast: bool,
    pub policy: WritePolicy,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            concurrency: 300,
            max_attempts: 3,
            retry_backoff_ms: 50,
            fail_fast: false,
            policy: WritePolicy::CreateOrReplace,
        }
    }
}

/// Table reconstructor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructConfig {
    /// Run the reconstruct and validate phases
    pub enabled: bool,
    pub batch_size: usize,
    pub read_concurrency: usize,
    pub max_attempts: usize,
    pub retry_backoff_ms: u64,
    pub include_view: bool,
}

impl Default for ReconstructConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 1_000,
            read_concurrency: 1,
            max_attempts: 3,
            retry_backoff_ms: 50,
            include_view: true,
        }
    }
}

/// In-memory store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum keys per bulk read
    pub batch_limit: usize,
    /// Simulated latency per cell store call
    pub latency_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_limit: 5_000,
            latency_ms: 0,
        }
    }
}

impl BenchConfig {
    /// Load defaults, then `path` (if given and present), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: BenchConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: BenchConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.keyspace.is_empty() {
            return Err(Error::Config("keyspace must not be empty".to_string()));
        }
        if self.fill.concurrency == 0 {
            return Err(Error::Config("fill.concurrency must be > 0".to_string()));
        }
        if self.fill.max_attempts == 0 || self.reconstruct.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be > 0".to_string()));
        }
        if self.reconstruct.batch_size == 0 {
            return Err(Error::Config("reconstruct.batch_size must be > 0".to_string()));
        }
        if self.reconstruct.batch_size > self.store.batch_limit {
            return Err(Error::Config(format!(
                "reconstruct.batch_size {} exceeds store.batch_limit {}",
                self.reconstruct.batch_size, self.store.batch_limit
            )));
        }
        Ok(())
    }

    pub fn fill_options(&self) -> FillOptions {
        FillOptions {
            concurrency: self.fill.concurrency,
            max_attempts: self.fill.max_attempts,
            retry_backoff: Duration::from_millis(self.fill.retry_backoff_ms),
            fail_fast: self.fill.fail_fast,
            policy: self.fill.policy,
        }
    }

    pub fn reconstruct_options(&self) -> ReconstructOptions {
        ReconstructOptions {
            batch_size: self.reconstruct.batch_size,
            read_concurrency: self.reconstruct.read_concurrency,
            max_attempts: self.reconstruct.max_attempts,
            retry_backoff: Duration::from_millis(self.reconstruct.retry_backoff_ms),
            include_view: self.reconstruct.include_view,
        }
    }

    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store.latency_ms)
    }
}
