use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
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
    "handlink".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Connection Settings
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    // Hand actuator board (ESP32 running the Nordic UART service)
    #[serde(default = "default_hand_prefix")]
    pub hand_name_prefix: String,
    #[serde(default = "default_hand_service_uuid")]
    pub hand_service_uuid: String,
    #[serde(default = "default_hand_notify_uuid")]
    pub hand_notify_char_uuid: String,
    #[serde(default = "default_hand_write_uuid")]
    pub hand_write_char_uuid: String,

    // EMG sensor board (Nicla, telemetry only)
    #[serde(default = "default_emg_prefix")]
    pub emg_name_prefix: String,
    #[serde(default = "default_emg_service_uuid")]
    pub emg_service_uuid: String,
    #[serde(default = "default_emg_notify_uuid")]
    pub emg_notify_char_uuid: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            scan_timeout_secs: default_scan_timeout_secs(),
            sync_interval_ms: default_sync_interval_ms(),
            hand_name_prefix: default_hand_prefix(),
            hand_service_uuid: default_hand_service_uuid(),
            hand_notify_char_uuid: default_hand_notify_uuid(),
            hand_write_char_uuid: default_hand_write_uuid(),
            emg_name_prefix: default_emg_prefix(),
            emg_service_uuid: default_emg_service_uuid(),
            emg_notify_char_uuid: default_emg_notify_uuid(),
        }
    }
}

fn default_scan_timeout_secs() -> u64 {
    10
}
fn default_sync_interval_ms() -> u64 {
    100
}
fn default_hand_prefix() -> String {
    "ESP32".to_string()
}
fn default_hand_service_uuid() -> String {
    "6e400001-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_hand_notify_uuid() -> String {
    "6e400003-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_hand_write_uuid() -> String {
    "6e400002-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_emg_prefix() -> String {
    "Nicla".to_string()
}
fn default_emg_service_uuid() -> String {
    "0000180c-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_emg_notify_uuid() -> String {
    "00002a56-0000-1000-8000-00805f9b34fb".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("HandLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
