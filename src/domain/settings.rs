use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

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
    #[serde(default = "default_false")]
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
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// How responses come back from the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundMode {
    /// Persistent subscription on the response characteristic
    #[default]
    Notify,
    /// One read of the response characteristic after every write
    OneShotRead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub known_peripheral_ids: Vec<String>,
    #[serde(default)]
    pub last_connected_id: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,
    #[serde(default = "default_response_uuid")]
    pub ble_response_char_uuid: String,
    #[serde(default = "default_telemetry_uuid")]
    pub ble_telemetry_char_uuid: Option<String>,
    #[serde(default)]
    pub inbound_mode: InboundMode,

    // Protocol timing
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_notify_retries")]
    pub notify_retries: u32,
    #[serde(default = "default_notify_retry_delay_ms")]
    pub notify_retry_delay_ms: u64,

    // Block behavior
    #[serde(default = "default_distance_divisor")]
    pub distance_divisor: f64,
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            known_peripheral_ids: Vec::new(),
            last_connected_id: None,
            log_settings: LogSettings::default(),

            ble_service_uuid: default_service_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            ble_response_char_uuid: default_response_uuid(),
            ble_telemetry_char_uuid: default_telemetry_uuid(),
            inbound_mode: InboundMode::default(),

            response_timeout_ms: default_response_timeout_ms(),
            notify_retries: default_notify_retries(),
            notify_retry_delay_ms: default_notify_retry_delay_ms(),

            distance_divisor: default_distance_divisor(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
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
    "ottopi".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    protocol::COMMAND_CHAR_UUID.to_string()
}
fn default_response_uuid() -> String {
    protocol::RESPONSE_CHAR_UUID.to_string()
}
fn default_telemetry_uuid() -> Option<String> {
    Some(protocol::DISTANCE_CHAR_UUID.to_string())
}
fn default_response_timeout_ms() -> u64 {
    3000
}
fn default_notify_retries() -> u32 {
    3
}
fn default_notify_retry_delay_ms() -> u64 {
    500
}
fn default_distance_divisor() -> f64 {
    10.0
}
fn default_scheduler_tick_ms() -> u64 {
    16
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Use an explicit settings file. Missing or unreadable files yield defaults.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("OttoPi");
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
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Remember a peripheral the user connected to
    pub fn record_connection(&mut self, peripheral_id: &str) -> anyhow::Result<()> {
        if !self
            .settings
            .known_peripheral_ids
            .iter()
            .any(|id| id == peripheral_id)
        {
            self.settings
                .known_peripheral_ids
                .push(peripheral_id.to_string());
        }
        self.settings.last_connected_id = Some(peripheral_id.to_string());
        self.save()
    }
}
