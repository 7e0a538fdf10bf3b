//! Server configuration management

use crate::hid::rev_lights::{DEFAULT_THRESHOLDS, LED_COUNT};
use crate::hotplug::{BackendKind, HotplugOptions};
use anyhow::{Context, Result, anyhow};
use protocol::SinkDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub hotplug: HotplugSettings,
    #[serde(default)]
    pub websocket: WebSocketSettings,
    /// USB sinks to register at startup
    #[serde(default = "ServerConfig::default_devices")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Telemetry listen address
    #[serde(default = "ServerSettings::default_udp_addr")]
    pub udp_addr: String,
    /// Viewer listen address
    #[serde(default = "ServerSettings::default_ws_addr")]
    pub ws_addr: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            udp_addr: Self::default_udp_addr(),
            ws_addr: Self::default_ws_addr(),
            log_level: Self::default_log_level(),
        }
    }
}

impl ServerSettings {
    fn default_udp_addr() -> String {
        "0.0.0.0:20777".to_string()
    }

    fn default_ws_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotplugSettings {
    /// auto, usb or poll
    #[serde(default)]
    pub backend: BackendKind,
    /// Enumeration interval of the polling backend
    #[serde(default = "HotplugSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Delay between a USB event and the re-enumeration it triggers
    #[serde(default = "HotplugSettings::default_settle")]
    pub settle_ms: u64,
}

impl Default for HotplugSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            poll_interval_ms: Self::default_poll_interval(),
            settle_ms: Self::default_settle(),
        }
    }
}

impl HotplugSettings {
    fn default_poll_interval() -> u64 {
        1000
    }

    fn default_settle() -> u64 {
        250
    }

    pub fn options(&self) -> HotplugOptions {
        HotplugOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketSettings {
    /// Frames buffered per viewer before the oldest is dropped
    #[serde(default = "WebSocketSettings::default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            queue_depth: Self::default_queue_depth(),
        }
    }
}

impl WebSocketSettings {
    fn default_queue_depth() -> usize {
        16
    }
}

/// Sink behaviour attached to a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    RevLights,
    Debug,
}

/// One USB sink
///
/// # Example Configuration
/// ```toml
/// [[devices]]
/// kind = "rev_lights"
/// vendor_id = "0x16c0"
/// product_id = "0x0480"
/// usage_page = "0xffab"
/// usage = "0x0200"
/// thresholds = [80, 83, 85, 87, 89, 91, 93, 95]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    pub vendor_id: String,
    pub product_id: String,
    pub usage_page: String,
    pub usage: String,
    /// LED thresholds in percent of max RPM (rev lights only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Vec<u8>>,
}

impl DeviceConfig {
    /// Parsed descriptor; fails on malformed hex ids
    pub fn descriptor(&self) -> Result<SinkDescriptor> {
        Ok(SinkDescriptor::new(
            parse_hex_id(&self.vendor_id, "vendor_id")?,
            parse_hex_id(&self.product_id, "product_id")?,
            parse_hex_id(&self.usage_page, "usage_page")?,
            parse_hex_id(&self.usage, "usage")?,
        ))
    }

    /// LED thresholds, falling back to the reference board's
    pub fn led_thresholds(&self) -> Result<[u8; LED_COUNT]> {
        match &self.thresholds {
            None => Ok(DEFAULT_THRESHOLDS),
            Some(values) => values.as_slice().try_into().map_err(|_| {
                anyhow!(
                    "Expected {} thresholds, got {}",
                    LED_COUNT,
                    values.len()
                )
            }),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            hotplug: HotplugSettings::default(),
            websocket: WebSocketSettings::default(),
            devices: Self::default_devices(),
        }
    }
}

impl ServerConfig {
    fn default_devices() -> Vec<DeviceConfig> {
        vec![
            DeviceConfig {
                kind: DeviceKind::RevLights,
                vendor_id: "0x16c0".to_string(),
                product_id: "0x0480".to_string(),
                usage_page: "0xffab".to_string(),
                usage: "0x0200".to_string(),
                thresholds: Some(DEFAULT_THRESHOLDS.to_vec()),
            },
            DeviceConfig {
                kind: DeviceKind::Debug,
                vendor_id: "0x16c0".to_string(),
                product_id: "0x0480".to_string(),
                usage_page: "0xff31".to_string(),
                usage: "0x0074".to_string(),
                thresholds: None,
            },
        ]
    }

    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/opendash/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("opendash").join("server.toml")
        } else {
            PathBuf::from(".config/opendash/server.toml")
        }
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.server.udp_addr, "udp_addr")
    }

    pub fn ws_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.server.ws_addr, "ws_addr")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.udp_addr()?;
        self.ws_addr()?;

        if self.websocket.queue_depth == 0 {
            return Err(anyhow!("websocket.queue_depth must be at least 1"));
        }

        if self.hotplug.poll_interval_ms < 10 {
            return Err(anyhow!(
                "hotplug.poll_interval_ms must be at least 10, got {}",
                self.hotplug.poll_interval_ms
            ));
        }

        for device in &self.devices {
            device.descriptor()?;
            match device.kind {
                DeviceKind::RevLights => {
                    device.led_thresholds()?;
                }
                DeviceKind::Debug if device.thresholds.is_some() => {
                    return Err(anyhow!(
                        "Debug device {} does not take thresholds",
                        device.descriptor()?
                    ));
                }
                DeviceKind::Debug => {}
            }
        }

        Ok(())
    }
}

fn parse_addr(addr: &str, name: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|_| anyhow!("Invalid {} '{}', expected HOST:PORT", name, addr))
}

/// Parse a hex ID such as `0x16c0`
fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
        return Err(anyhow!(
            "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
            name,
            id
        ));
    };

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<ServerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ServerConfig::load(Some(path_buf))
}
