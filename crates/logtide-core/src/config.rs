//! Configuration types for logtide.
//!
//! [`Config::load`] layers the built-in defaults, an optional TOML file
//! (`$XDG_CONFIG_HOME/logtide/config.toml` unless a path is given) and
//! `LOGTIDE_`-prefixed environment variables. The core only ever reads
//! settings; it never writes a config file. [`Config::defaults`] returns the
//! built-ins without touching the filesystem (useful in tests).

use crate::backpressure::AdaptiveDelay;
use crate::store::StoreConfig;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[tcp]
enabled           = true
bind              = "0.0.0.0"
port              = 4560
max_connections   = 1000
max_buffer_bytes  = 1048576
max_line_bytes    = 102400
idle_timeout_secs = 300

[http]
request_timeout_secs = 30
max_response_bytes   = 104857600
failure_threshold    = 5
open_cooldown_secs   = 30
max_cooldown_secs    = 300

[dedup]
max_seen_entries = 10000

[buffer]
capacity     = 5000
batch_size   = 200
min_delay_ms = 4
max_delay_ms = 100

[store]
trim_threshold       = 200000
trim_ratio           = 0.8
message_budget_bytes = 10000

[filter]
offload_threshold = 10000
"#;

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level configuration for one ingestion session.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tcp: TcpConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pollers: Vec<PollerConfig>,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub filter: FilterConfig,
}

/// `[tcp]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_true() -> bool { true }
fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 4560 }
fn default_max_connections() -> usize { 1000 }
fn default_max_buffer_bytes() -> usize { 1024 * 1024 }
fn default_max_line_bytes() -> usize { 100 * 1024 }
fn default_idle_timeout_secs() -> u64 { 300 }

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind: default_bind(),
            port: default_port(),
            max_connections: default_max_connections(),
            max_buffer_bytes: default_max_buffer_bytes(),
            max_line_bytes: default_max_line_bytes(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl TcpConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// `[http]` section: settings shared by every poller.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_cooldown_secs")]
    pub open_cooldown_secs: u64,
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

fn default_request_timeout_secs() -> u64 { 30 }
fn default_max_response_bytes() -> usize { 100 * 1024 * 1024 }
fn default_failure_threshold() -> u32 { 5 }
fn default_open_cooldown_secs() -> u64 { 30 }
fn default_max_cooldown_secs() -> u64 { 300 }

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_response_bytes: default_max_response_bytes(),
            failure_threshold: default_failure_threshold(),
            open_cooldown_secs: default_open_cooldown_secs(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

/// One `[[pollers]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PollerConfig {
    pub url: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 { 5 }

/// `[dedup]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_max_seen_entries")]
    pub max_seen_entries: usize,
}

fn default_max_seen_entries() -> usize { crate::dedup::MAX_SEEN_ENTRIES }

impl Default for DedupConfig {
    fn default() -> Self {
        Self { max_seen_entries: default_max_seen_entries() }
    }
}

/// `[buffer]` section: backpressure queue and batcher cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_capacity() -> usize { crate::backpressure::BUFFER_CAPACITY }
fn default_batch_size() -> usize { crate::batcher::BATCH_SIZE }
fn default_min_delay_ms() -> u64 { 4 }
fn default_max_delay_ms() -> u64 { 100 }

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            batch_size: default_batch_size(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BufferConfig {
    pub fn adaptive_delay(&self) -> AdaptiveDelay {
        AdaptiveDelay::new(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_trim_threshold")]
    pub trim_threshold: usize,
    #[serde(default = "default_trim_ratio")]
    pub trim_ratio: f64,
    #[serde(default = "default_message_budget_bytes")]
    pub message_budget_bytes: usize,
}

fn default_trim_threshold() -> usize { crate::store::TRIM_THRESHOLD }
fn default_trim_ratio() -> f64 { crate::store::TRIM_RATIO }
fn default_message_budget_bytes() -> usize { crate::normalizer::DEFAULT_MESSAGE_BUDGET }

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            trim_threshold: default_trim_threshold(),
            trim_ratio: default_trim_ratio(),
            message_budget_bytes: default_message_budget_bytes(),
        }
    }
}

impl StoreSection {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            trim_threshold: self.trim_threshold,
            trim_ratio: self.trim_ratio,
        }
    }
}

/// `[filter]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_offload_threshold")]
    pub offload_threshold: usize,
}

fn default_offload_threshold() -> usize { crate::filter_worker::OFFLOAD_THRESHOLD }

impl Default for FilterConfig {
    fn default() -> Self {
        Self { offload_threshold: default_offload_threshold() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load from the default location, layered on top of the built-ins.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from `path` (which need not exist), layered on top of the
    /// built-ins and overridden by `LOGTIDE_*` environment variables
    /// (`LOGTIDE_TCP__PORT=5000`).
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOGTIDE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("reading config from {}", path.display()))?
            .try_deserialize()
            .context("deserializing config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut urls = HashSet::new();
        for poller in &self.pollers {
            // The URL keys the poller's dedup set.
            if !urls.insert(poller.url.as_str()) {
                bail!("poller {}: listed more than once", poller.url);
            }
            if poller.interval_secs < 1 {
                bail!("poller {}: interval_secs must be at least 1", poller.url);
            }
            if !poller.url.starts_with("http://") {
                bail!("poller {}: only plain http:// URLs are supported", poller.url);
            }
        }
        if self.buffer.batch_size == 0 {
            bail!("buffer.batch_size must be positive");
        }
        if self.tcp.max_connections == 0 {
            bail!("tcp.max_connections must be positive");
        }
        if self.tcp.max_line_bytes > self.tcp.max_buffer_bytes {
            bail!("tcp.max_line_bytes cannot exceed tcp.max_buffer_bytes");
        }
        if !(0.0..=1.0).contains(&self.store.trim_ratio) {
            bail!("store.trim_ratio must be within 0.0..=1.0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
                .join(".config")
        })
        .join("logtide")
        .join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
