//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sonar_control::WatchdogConfig;
use sonar_core::builder::{sample_sidescan, DeviceDescription};
use sonar_proxy::{ProxyConfig, ProxyMode, ScaleConfig};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub watchdog: WatchdogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Simulated sonar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Interval between pings while started, in milliseconds
    #[serde(default = "default_ping_period")]
    pub ping_period_ms: u64,
    /// Points per acoustic line
    #[serde(default = "default_line_points")]
    pub line_points: usize,
    #[serde(flatten)]
    pub description: DeviceDescription,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: default_ping_period(),
            line_points: default_line_points(),
            description: sample_sidescan(),
        }
    }
}

fn default_ping_period() -> u64 {
    200
}

fn default_line_points() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySection {
    #[serde(default)]
    pub mode: ProxyMode,
    /// Points averaged into one (computed mode)
    #[serde(default = "default_scale")]
    pub range_scale: u32,
    /// Pings averaged into one (computed mode)
    #[serde(default = "default_scale")]
    pub track_scale: u32,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            mode: ProxyMode::default(),
            range_scale: default_scale(),
            track_scale: default_scale(),
        }
    }
}

fn default_scale() -> u32 {
    1
}

impl ProxySection {
    pub fn to_proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            mode: self.mode,
            scale: ScaleConfig::new(self.range_scale, self.track_scale),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogSection {
    /// Client silence before a timeout is reported, in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Stop a running track when clients go silent
    #[serde(default)]
    pub stop_on_timeout: bool,
}

impl Default for WatchdogSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            poll_interval_ms: default_poll_interval(),
            stop_on_timeout: false,
        }
    }
}

fn default_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    100
}

impl WatchdogSection {
    pub fn to_watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)?;
    Ok(())
}
