use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Concurrency-control discipline, selected once at startup.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Pessimistic,
    Optimistic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    /// Expiry window applied when a caller does not pass an explicit TTL.
    #[serde(default = "default_hold_ttl_seconds")]
    pub default_hold_ttl_seconds: u64,
    /// Pessimistic only: bound on waiting for a single unit lock.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// Optimistic only: CAS attempts per acquire before ContentionExceeded.
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
    /// Optimistic only: base for the jittered retry backoff.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Cadence of the expiry sweeper.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Pessimistic
}
fn default_hold_ttl_seconds() -> u64 {
    600
}
fn default_lock_wait_ms() -> u64 {
    2000
}
fn default_max_cas_retries() -> u32 {
    4
}
fn default_retry_backoff_ms() -> u64 {
    10
}
fn default_sweep_interval_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            default_hold_ttl_seconds: default_hold_ttl_seconds(),
            lock_wait_ms: default_lock_wait_ms(),
            max_cas_retries: default_max_cas_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `TESSERA_STRATEGY=optimistic` selects the CAS path
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.default_hold_ttl_seconds)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
