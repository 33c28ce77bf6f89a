use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError as ConfigCrateError, Environment, File};
use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Static node inventory. Loaded from the config file; the process knows
    /// nothing about nodes that are not listed here.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity and capability of one compute node, declared at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: u32,
    pub name: String,
    pub monitor_base_url: String,
    pub llm_url: String,
    #[serde(default)]
    pub vram_gb: Option<f64>,
    #[serde(default)]
    pub tflops: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_telemetry_timeout_ms")]
    pub timeout_ms: u64,
    /// Consecutive failed polls before a node is marked offline.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds without a successful poll before a node is marked offline.
    #[serde(default = "default_offline_after_secs")]
    pub offline_after_secs: u64,
}

impl TelemetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn offline_after(&self) -> Duration {
        Duration::from_secs(self.offline_after_secs)
    }

    /// Metrics older than this are too stale to schedule against.
    pub fn freshness_window(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms * 2)
    }
}

/// Weights of the composite scheduling score. They sum to 1.0.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_w_capability")]
    pub w_capability: f64,
    #[serde(default = "default_w_gpu_util")]
    pub w_gpu_util: f64,
    #[serde(default = "default_w_gpu_mem")]
    pub w_gpu_mem: f64,
    #[serde(default = "default_w_cpu")]
    pub w_cpu: f64,
    #[serde(default = "default_w_mem")]
    pub w_mem: f64,
    #[serde(default = "default_w_temp")]
    pub w_temp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// A stream that produces nothing for this long is considered stalled.
    #[serde(default = "default_idle_read_timeout_secs")]
    pub idle_read_timeout_secs: u64,
    /// Scheduler re-picks after losing an acquisition race.
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
    /// Upper bound on pre-stream failover attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl DispatchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_read_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_read_timeout_secs)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,
    /// How many finished jobs to keep queryable before eviction.
    #[serde(default = "default_retain_jobs")]
    pub retain_jobs: usize,
}

impl JobsConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_offline_alert_delay_secs")]
    pub offline_alert_delay_secs: u64,
    #[serde(default = "default_gpu_temp_critical")]
    pub gpu_temp_critical: f64,
    #[serde(default = "default_gpu_mem_warning")]
    pub gpu_mem_warning: f64,
    #[serde(default = "default_mem_warning")]
    pub mem_warning: f64,
    #[serde(default = "default_gpu_util_warning")]
    pub gpu_util_warning: f64,
    /// Consecutive polls at or above `gpu_util_warning` before warning.
    #[serde(default = "default_sustained_polls")]
    pub sustained_polls: u32,
}

impl AlertsConfig {
    pub fn offline_alert_delay(&self) -> Duration {
        Duration::from_secs(self.offline_alert_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Defaults
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_telemetry_timeout_ms() -> u64 { 1500 }
fn default_failure_threshold() -> u32 { 3 }
fn default_offline_after_secs() -> u64 { 15 }
fn default_w_capability() -> f64 { 0.30 }
fn default_w_gpu_util() -> f64 { 0.25 }
fn default_w_gpu_mem() -> f64 { 0.15 }
fn default_w_cpu() -> f64 { 0.10 }
fn default_w_mem() -> f64 { 0.10 }
fn default_w_temp() -> f64 { 0.10 }
fn default_connect_timeout_secs() -> u64 { 5 }
fn default_idle_read_timeout_secs() -> u64 { 60 }
fn default_lock_retries() -> u32 { 3 }
fn default_lock_retry_delay_ms() -> u64 { 50 }
fn default_max_attempts() -> u32 { 3 }
fn default_max_workers() -> usize { 8 }
fn default_item_timeout_secs() -> u64 { 300 }
fn default_retain_jobs() -> usize { 64 }
fn default_offline_alert_delay_secs() -> u64 { 30 }
fn default_gpu_temp_critical() -> f64 { 85.0 }
fn default_gpu_mem_warning() -> f64 { 90.0 }
fn default_mem_warning() -> f64 { 90.0 }
fn default_gpu_util_warning() -> f64 { 95.0 }
fn default_sustained_polls() -> u32 { 2 }
fn default_log_level() -> String { "info".to_string() }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_telemetry_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            offline_after_secs: default_offline_after_secs(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            w_capability: default_w_capability(),
            w_gpu_util: default_w_gpu_util(),
            w_gpu_mem: default_w_gpu_mem(),
            w_cpu: default_w_cpu(),
            w_mem: default_w_mem(),
            w_temp: default_w_temp(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_read_timeout_secs: default_idle_read_timeout_secs(),
            lock_retries: default_lock_retries(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            item_timeout_secs: default_item_timeout_secs(),
            retain_jobs: default_retain_jobs(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            offline_alert_delay_secs: default_offline_alert_delay_secs(),
            gpu_temp_critical: default_gpu_temp_critical(),
            gpu_mem_warning: default_gpu_mem_warning(),
            mem_warning: default_mem_warning(),
            gpu_util_warning: default_gpu_util_warning(),
            sustained_polls: default_sustained_polls(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nodes: Vec::new(),
            telemetry: TelemetryConfig::default(),
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            jobs: JobsConfig::default(),
            alerts: AlertsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    LoadError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl Config {
    /// Load configuration from config.toml (if present) and environment
    /// variables. Environment variables override file settings.
    /// Env var format: INFEROPS__SECTION__KEY (e.g. INFEROPS__TELEMETRY__POLL_INTERVAL_MS).
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("INFEROPS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(ConfigError::from)
    }
}
