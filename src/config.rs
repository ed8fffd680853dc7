use crate::tracker::DEFAULT_ARRIVAL_DURATION_MS;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BayScanConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Tag-to-route registry entries.
    #[serde(default = "default_registry")]
    pub registry: Vec<RegistryEntry>,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TerminalConfig {
    /// Terminal display name, passed to the describer.
    #[serde(default = "default_terminal_name")]
    pub terminal_name: String,

    /// Loading bay label, passed to the describer.
    #[serde(default = "default_bay_number")]
    pub bay_number: String,

    /// Host hint: whether audible alerts should be played on arrival and
    /// health transitions. The core never acts on this itself.
    #[serde(default = "default_audio_alerts")]
    pub audio_alerts_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Readings weaker than this are kept in raw history but never reach the
    /// presence tracker.
    #[serde(default = "default_min_rssi_threshold")]
    pub min_rssi_threshold: i32,

    /// Continuous-reading dwell required before an arrival is declared.
    #[serde(default = "default_arrival_duration_ms")]
    pub arrival_duration_ms: u64,

    /// Per-read timeout in the transport read loop.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransportConfig {
    /// Device node for the wired scanner.
    #[serde(default = "default_wired_device")]
    pub wired_device: String,

    /// Socket address of the wireless scanner link bridge.
    #[serde(default = "default_wireless_addr")]
    pub wireless_addr: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryEntry {
    pub tag: String,
    pub route: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl BayScanConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("bayscan.toml")
    }

    /// Load configuration from a specific file path. The file is optional;
    /// defaults and `BAYSCAN_*` environment overrides apply either way.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("BAYSCAN").separator("__"))
            .build()?;

        let config: BayScanConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-100..=0).contains(&self.scanner.min_rssi_threshold) {
            return Err(ConfigError::Message(
                "Scanner min_rssi_threshold must be within -100..0 dBm".to_string(),
            ));
        }

        if self.scanner.arrival_duration_ms == 0 {
            return Err(ConfigError::Message(
                "Scanner arrival_duration_ms must be greater than 0".to_string(),
            ));
        }

        if self.scanner.read_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Scanner read_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.registry.is_empty() {
            return Err(ConfigError::Message(
                "Registry must contain at least one tag".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Registry entries as a lookup map.
    pub fn registry_map(&self) -> HashMap<String, String> {
        self.registry
            .iter()
            .map(|entry| (entry.tag.clone(), entry.route.clone()))
            .collect()
    }
}

impl Default for BayScanConfig {
    fn default() -> Self {
        Self {
            terminal: TerminalConfig::default(),
            scanner: ScannerConfig::default(),
            transport: TransportConfig::default(),
            registry: default_registry(),
            system: SystemConfig::default(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            terminal_name: default_terminal_name(),
            bay_number: default_bay_number(),
            audio_alerts_enabled: default_audio_alerts(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_rssi_threshold: default_min_rssi_threshold(),
            arrival_duration_ms: default_arrival_duration_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            wired_device: default_wired_device(),
            wireless_addr: default_wireless_addr(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_terminal_name() -> String {
    "Kottarakara".to_string()
}
fn default_bay_number() -> String {
    "Bay 12".to_string()
}
fn default_audio_alerts() -> bool {
    true
}

fn default_min_rssi_threshold() -> i32 {
    -75
}
fn default_arrival_duration_ms() -> u64 {
    DEFAULT_ARRIVAL_DURATION_MS
}
fn default_read_timeout_ms() -> u64 {
    500
}

fn default_wired_device() -> String {
    "/dev/ttyACM0".to_string()
}
fn default_wireless_addr() -> String {
    "127.0.0.1:7733".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}

fn default_registry() -> Vec<RegistryEntry> {
    vec![
        RegistryEntry {
            tag: "E280-11AC-0001".to_string(),
            route: "Route 402 - Northgate".to_string(),
        },
        RegistryEntry {
            tag: "E280-11AC-0002".to_string(),
            route: "Route 105 - University District".to_string(),
        },
        RegistryEntry {
            tag: "E280-11AC-0003".to_string(),
            route: "Route 550 - Bellevue Express".to_string(),
        },
        RegistryEntry {
            tag: "E280-11AC-0004".to_string(),
            route: "Route 7 - Rainier Beach".to_string(),
        },
    ]
}
