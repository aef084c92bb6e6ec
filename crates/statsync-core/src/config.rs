//! Application configuration management.
//!
//! This module handles loading and saving the configuration: the API
//! endpoint, retry budget, cache quota, TTL policy per data class, and the
//! region resolver's threshold tables.
//!
//! Configuration is stored at `~/.config/statsync/config.json`. Every field
//! has a default, so a missing or partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::DataClass;
use crate::region::ResolverThresholds;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "statsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides `api.base_url`
pub const API_URL_ENV: &str = "STATSYNC_API_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    /// Start in offline mode regardless of what the platform reports.
    pub offline_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Total attempts per request, including the first one.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            request_timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 10_000,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on bytes held by cache entries.
    pub max_bytes: u64,
    /// Eviction brings usage down to `max_bytes * cleanup_ratio`.
    pub cleanup_ratio: f64,
    /// Namespace for every key this crate writes to the backing store.
    pub key_prefix: String,
    pub sweep_interval_secs: u64,
    pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            cleanup_ratio: 0.8,
            key_prefix: "statsync:".to_string(),
            sweep_interval_secs: 300,
            ttl: TtlPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Usage eviction brings the cache down to, for a quota of `quota` bytes.
    pub fn cleanup_threshold(&self, quota: u64) -> u64 {
        (quota as f64 * self.cleanup_ratio.clamp(0.0, 1.0)) as u64
    }
}

/// Time-to-live per data class, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    /// Slow-changing reference data such as the region list
    pub reference_secs: u64,
    /// Per-region datasets
    pub region_secs: u64,
    /// Aggregate dashboard data
    pub aggregate_secs: u64,
    /// Backend health checks
    pub health_secs: u64,
    pub location_fix_secs: u64,
    pub resolution_secs: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            reference_secs: 24 * 60 * 60,
            region_secs: 2 * 60 * 60,
            aggregate_secs: 30 * 60,
            health_secs: 5 * 60,
            location_fix_secs: 5 * 60,
            resolution_secs: 10 * 60,
        }
    }
}

impl TtlPolicy {
    pub fn for_class(&self, class: DataClass) -> chrono::Duration {
        let secs = match class {
            DataClass::Reference => self.reference_secs,
            DataClass::Region => self.region_secs,
            DataClass::Aggregate => self.aggregate_secs,
            DataClass::Health => self.health_secs,
        };
        secs_to_duration(secs)
    }

    pub fn location_fix(&self) -> chrono::Duration {
        secs_to_duration(self.location_fix_secs)
    }

    pub fn resolution(&self) -> chrono::Duration {
        secs_to_duration(self.resolution_secs)
    }
}

fn secs_to_duration(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub thresholds: ResolverThresholds,
    pub high_accuracy_timeout_secs: u64,
    pub low_accuracy_timeout_secs: u64,
    /// Optional JSON file replacing the bundled region catalog
    pub regions_file: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            thresholds: ResolverThresholds::default(),
            high_accuracy_timeout_secs: 15,
            low_accuracy_timeout_secs: 8,
            regions_file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
