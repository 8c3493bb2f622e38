use crate::domain::models::UserConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "GattScanner";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    // Console output shares the terminal with the prompts, so it is off unless asked for
    #[serde(default = "default_false")]
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
            console_logging_enabled: default_false(),
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
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
        .to_string_lossy()
        .into_owned()
}
fn default_prefix() -> String {
    "gatt_scanner".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Offered as the default username on the next run. The password is never stored.
    #[serde(default)]
    pub last_username: Option<String>,

    /// Defaults for the scan and connection parameters of a run
    #[serde(default)]
    pub user_config: UserConfig,
    /// Default answer of the scan period prompt
    #[serde(default = "default_scan_period_prompt")]
    pub default_scan_period: u32,
    /// Only advertisements with exactly this local name are kept
    #[serde(default)]
    pub advertisement_name_filter: Option<String>,

    // Gateway Settings
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_shutdown_retry_budget")]
    pub shutdown_retry_budget: u32,
    #[serde(default = "default_shutdown_retry_delay_ms")]
    pub shutdown_retry_delay_ms: u64,

    // Presentation
    #[serde(default = "default_device_page_size")]
    pub device_page_size: usize,

    /// JSON fixture for the simulated gateway; built-in devices when unset
    #[serde(default)]
    pub simulator_fixture: Option<PathBuf>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_username: None,
            user_config: UserConfig::default(),
            default_scan_period: default_scan_period_prompt(),
            advertisement_name_filter: None,
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            shutdown_retry_budget: default_shutdown_retry_budget(),
            shutdown_retry_delay_ms: default_shutdown_retry_delay_ms(),
            device_page_size: default_device_page_size(),
            simulator_fixture: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_scan_period_prompt() -> u32 {
    5
}
fn default_heartbeat_timeout_ms() -> u64 {
    5000
}
fn default_shutdown_retry_budget() -> u32 {
    3
}
fn default_shutdown_retry_delay_ms() -> u64 {
    100
}
fn default_device_page_size() -> usize {
    30
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

    /// Loads from an explicit file; a missing or unreadable file yields defaults.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push(APP_DIR);
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
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn remember_username(&mut self, username: &str) -> anyhow::Result<()> {
        if self.settings.last_username.as_deref() != Some(username) {
            self.settings.last_username = Some(username.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::with_path(dir.path().join("settings.json"));
        let settings = service.get();
        assert!(settings.last_username.is_none());
        assert_eq!(settings.heartbeat_timeout_ms, 5000);
        assert_eq!(settings.shutdown_retry_budget, 3);
        assert_eq!(settings.device_page_size, 30);
        assert_eq!(settings.default_scan_period, 5);
    }

    #[test]
    fn test_username_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.remember_username("user@example.com").unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(
            reloaded.get().last_username.as_deref(),
            Some("user@example.com")
        );

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("pwd"));
        assert!(!raw.contains("password"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"user_config": {"scan_mode": "passive"}, "log_settings": {"level": "debug"}}"#,
        )
        .unwrap();

        let service = SettingsService::with_path(path);
        let settings = service.get();
        assert!(!settings.user_config.scan_mode.is_active());
        assert_eq!(settings.user_config.interval_max, 100);
        assert_eq!(settings.log_settings.level, "debug");
        assert!(settings.log_settings.file_logging_enabled);
    }
}
