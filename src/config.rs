use chrono::Utc;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::script::ScriptLimits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub replay: ReplayConfig,
    pub decoder: DecoderConfig,
    pub lorawan: LorawanConfig,
    pub logging: LoggingConfig,
}

/// Separate TTL and capacity for the scan and decode caches
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub decode_ttl_secs: u64,
    pub decode_max_items: usize,
    pub scan_ttl_secs: u64,
    pub scan_max_items: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub loop_iteration_limit: u64,
    pub recursion_limit: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LorawanConfig {
    /// TOML file of `[[device]]` session keys
    pub keys_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.decode_max_items == 0 || self.cache.scan_max_items == 0 {
            anyhow::bail!("cache max_items must be at least 1");
        }
        if !ttl_in_range(self.cache.decode_ttl()) || !ttl_in_range(self.cache.scan_ttl()) {
            anyhow::bail!("cache ttl_secs is too large");
        }
        self.replay.timeout()?;
        if self.decoder.loop_iteration_limit == 0 || self.decoder.recursion_limit == 0 {
            anyhow::bail!("decoder limits must be positive");
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn decode_ttl(&self) -> Duration {
        Duration::from_secs(self.decode_ttl_secs)
    }

    pub fn scan_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_ttl_secs)
    }
}

/// Whether an entry created now with this TTL has a representable expiry
fn ttl_in_range(ttl: Duration) -> bool {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .is_some()
}

impl ReplayConfig {
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        match Duration::try_from_secs_f64(self.timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => Ok(timeout),
            _ => anyhow::bail!(
                "replay timeout_secs must be a positive number of seconds, got {}",
                self.timeout_secs
            ),
        }
    }
}

impl DecoderConfig {
    pub fn limits(&self) -> ScriptLimits {
        ScriptLimits {
            loop_iteration_limit: self.loop_iteration_limit,
            recursion_limit: self.recursion_limit,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            decode_ttl_secs: 30 * 60,
            decode_max_items: 64,
            scan_ttl_secs: 30 * 60,
            scan_max_items: 64,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { timeout_secs: 2.0 }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let limits = ScriptLimits::default();
        Self {
            loop_iteration_limit: limits.loop_iteration_limit,
            recursion_limit: limits.recursion_limit,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
