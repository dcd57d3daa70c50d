use crate::domain::models::ControlId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::Context;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_pad_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Output transport parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Device path, or "-" for stdout.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: String, // "none", "odd", "even"
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_flow_control")]
    pub flow_control: String, // "none", "software", "hardware"
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            flow_control: default_flow_control(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_parity() -> String {
    "none".to_string()
}
fn default_stop_bits() -> u8 {
    1
}
fn default_flow_control() -> String {
    "hardware".to_string()
}
fn default_write_timeout_ms() -> u64 {
    100
}

/// Per-control "publish enabled" flags.
///
/// Serialized as a map keyed by control id; controls missing from the map
/// are enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTable {
    enabled: [bool; ControlId::COUNT],
}

impl PublishTable {
    pub fn all_enabled() -> Self {
        Self {
            enabled: [true; ControlId::COUNT],
        }
    }

    pub fn is_enabled(&self, id: ControlId) -> bool {
        self.enabled[id.index()]
    }

    pub fn set(&mut self, id: ControlId, enabled: bool) {
        self.enabled[id.index()] = enabled;
    }

    pub fn with(mut self, id: ControlId, enabled: bool) -> Self {
        self.set(id, enabled);
        self
    }
}

impl Default for PublishTable {
    /// Digital trigger clicks are redundant with the analog triggers.
    fn default() -> Self {
        Self::all_enabled()
            .with(ControlId::Ltb, false)
            .with(ControlId::Rtb, false)
    }
}

impl Serialize for PublishTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<ControlId, bool> = ControlId::ALL
            .iter()
            .map(|id| (*id, self.is_enabled(*id)))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublishTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<ControlId, bool>::deserialize(deserializer)?;
        let mut table = Self::all_enabled();
        for (id, enabled) in map {
            table.set(id, enabled);
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Exact advertised complete name of the peripheral to connect to.
    #[serde(default = "default_target_device_name")]
    pub target_device_name: String,
    #[serde(default = "default_scan_duration_secs")]
    pub scan_duration_secs: u32,
    #[serde(default = "default_local_mtu")]
    pub local_mtu: u16,
    #[serde(default = "default_false")]
    pub rescan_on_disconnect: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub publish: PublishTable,
    #[serde(default)]
    pub serial: SerialSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Debug Settings
    #[serde(default = "default_false")]
    pub debug_raw_report_logging: bool,
    #[serde(default = "default_false")]
    pub debug_echo_output: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_device_name: default_target_device_name(),
            scan_duration_secs: default_scan_duration_secs(),
            local_mtu: default_local_mtu(),
            rescan_on_disconnect: false,
            queue_capacity: default_queue_capacity(),
            publish: PublishTable::default(),
            serial: SerialSettings::default(),
            log_settings: LogSettings::default(),
            debug_raw_report_logging: false,
            debug_echo_output: false,
        }
    }
}

fn default_target_device_name() -> String {
    "StadiaBWVQ-855f".to_string()
}
fn default_scan_duration_secs() -> u32 {
    30
}
fn default_local_mtu() -> u16 {
    23
}
fn default_queue_capacity() -> usize {
    1024
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory.
    ///
    /// An unreadable or invalid file yields the defaults, returned together
    /// with the load error so the caller can report it once logging is up.
    pub fn new() -> anyhow::Result<(Self, Option<anyhow::Error>)> {
        let settings_path = Self::get_settings_path()?;
        Ok(match Self::load(&settings_path) {
            Ok(service) => (service, None),
            Err(e) => (
                Self {
                    settings: Settings::default(),
                    settings_path,
                },
                Some(e),
            ),
        })
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load(settings_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = settings_path.into();
        let settings = if settings_path.exists() {
            Self::load_from_file(&settings_path)
                .with_context(|| format!("Invalid settings file {}", settings_path.display()))?
        } else {
            Settings::default()
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BlePadBridge");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        info!("Settings saved to {}", self.settings_path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

}
