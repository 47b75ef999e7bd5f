use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, Context};
use log::{info, warn, debug, error};

use crate::fathom::DEFAULT_API_URL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: String,
    pub application: ApplicationConfig,
    pub fathom: FathomConfig,
    pub view: ViewConfig,
    pub host: HostConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub system_tray: SystemTrayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTrayConfig {
    /// Off: the desktop shell runs without a tray icon.
    pub enabled: bool,
    pub tooltip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FathomConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token. Empty means requests go out unauthenticated and fail.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_sites_stale_seconds")]
    pub sites_stale_seconds: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_sites_stale_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    pub interval_ms: u64,
    pub interval_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub emit_interval_ms: u64,
    #[serde(default = "default_emit_message")]
    pub emit_message: String,
}

fn default_emit_message() -> String {
    "rs -> js".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub console: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_max_log_size_mb")]
    pub max_log_size_mb: u64,
    #[serde(default = "default_file_rotation")]
    pub file_rotation: bool,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_max_log_size_mb() -> u64 {
    10
}

fn default_file_rotation() -> bool {
    true
}

#[derive(Debug)]
pub struct ConfigManager {
    config: AppConfig,
    config_dir: PathBuf,
    default_config_path: PathBuf,
    user_config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_directory()?;
        let default_config_path = config_dir.join("default.json");
        let user_config_path = config_dir.join("user.json");

        Self::new_with_paths(config_dir, default_config_path, user_config_path)
    }

    pub fn new_with_paths(config_dir: PathBuf, default_config_path: PathBuf, user_config_path: PathBuf) -> Result<Self> {
        debug!("Config directory: {:?}", config_dir);
        debug!("Default config path: {:?}", default_config_path);
        debug!("User config path: {:?}", user_config_path);

        let config = Self::load_merged_config(&default_config_path, &user_config_path)?;

        Ok(ConfigManager {
            config,
            config_dir,
            default_config_path,
            user_config_path,
        })
    }

    fn get_config_directory() -> Result<PathBuf> {
        let exe_dir = std::env::current_exe()?
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
            .to_path_buf();

        // Bundled app first, then the source tree when running from target/
        let possible_paths = vec![
            exe_dir.join("config"),
            exe_dir.join("../config"),
            exe_dir.join("../../config"),
        ];

        for path in possible_paths {
            if path.is_dir() {
                debug!("Found config directory: {:?}", path);
                return Ok(path);
            }
        }

        let config_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine app data directory"))?
            .join("FathomTray")
            .join("config");

        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

        info!("Created config directory: {:?}", config_dir);
        Ok(config_dir)
    }

    fn load_merged_config(default_path: &Path, user_path: &Path) -> Result<AppConfig> {
        let mut config: AppConfig = if default_path.exists() {
            let default_content = std::fs::read_to_string(default_path)
                .with_context(|| format!("Failed to read default config from {:?}", default_path))?;

            match serde_json::from_str(&default_content) {
                Ok(parsed) => {
                    info!("Loaded default configuration from {:?}", default_path);
                    parsed
                }
                Err(e) => {
                    error!("Failed to parse default configuration: {}", e);
                    return Err(anyhow::anyhow!("Failed to parse default configuration: {}", e));
                }
            }
        } else {
            info!("No default config found at {:?}, using built-in defaults", default_path);
            AppConfig::default()
        };

        if user_path.exists() {
            let user_content = std::fs::read_to_string(user_path)
                .with_context(|| format!("Failed to read user config from {:?}", user_path))?;

            let user_config: serde_json::Value = serde_json::from_str(&user_content)
                .with_context(|| "Failed to parse user configuration")?;

            let default_json = serde_json::to_value(&config)?;
            let merged_json = Self::merge_json_values(default_json, user_config);
            config = serde_json::from_value(merged_json)
                .with_context(|| "Failed to deserialize merged configuration")?;

            info!("Merged user configuration from {:?}", user_path);
        } else {
            debug!("No user configuration found at {:?}", user_path);
        }

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Objects merge key by key; arrays and scalars from `user` win outright.
    fn merge_json_values(default: serde_json::Value, user: serde_json::Value) -> serde_json::Value {
        use serde_json::Value;

        match (default, user) {
            (Value::Object(mut default_map), Value::Object(user_map)) => {
                for (key, user_value) in user_map {
                    let merged_value = match default_map.remove(&key) {
                        Some(default_value) => Self::merge_json_values(default_value, user_value),
                        None => user_value,
                    };
                    default_map.insert(key, merged_value);
                }
                Value::Object(default_map)
            }
            (_, user_value) => user_value,
        }
    }

    fn validate_config(config: &AppConfig) -> Result<()> {
        url::Url::parse(&config.fathom.api_url)
            .with_context(|| format!("Invalid Fathom API url: {}", config.fathom.api_url))?;

        if config.fathom.api_key.is_empty() {
            warn!("No Fathom API key configured, site listing will fail");
        }

        if config.view.interval_ms == 0 {
            return Err(anyhow::anyhow!("view.interval_ms must be greater than zero"));
        }
        if config.host.emit_interval_ms == 0 {
            return Err(anyhow::anyhow!("host.emit_interval_ms must be greater than zero"));
        }

        match config.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {},
            _ => return Err(anyhow::anyhow!("Invalid logging level: {}", config.logging.level)),
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn reload(&mut self) -> Result<()> {
        info!("Reloading configuration");
        self.config = Self::load_merged_config(&self.default_config_path, &self.user_config_path)?;
        Ok(())
    }

    /// Writes `config` to `user.json` and makes it current.
    pub fn save_user_config(&mut self, config: AppConfig) -> Result<()> {
        Self::validate_config(&config)?;

        let content = serde_json::to_string_pretty(&config)?;
        std::fs::write(&self.user_config_path, content)
            .with_context(|| format!("Failed to write user config to {:?}", self.user_config_path))?;

        self.config = config;
        info!("Saved user configuration to {:?}", self.user_config_path);
        Ok(())
    }

    pub fn interval_period(&self) -> Duration {
        Duration::from_millis(self.config.view.interval_ms)
    }

    pub fn emit_period(&self) -> Duration {
        Duration::from_millis(self.config.host.emit_interval_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            version: env!("CARGO_PKG_VERSION").to_string(),
            application: ApplicationConfig {
                name: "Fathom Tray".to_string(),
                system_tray: SystemTrayConfig {
                    enabled: true,
                    tooltip: "Fathom Analytics".to_string(),
                },
            },
            fathom: FathomConfig {
                api_url: default_api_url(),
                api_key: String::new(),
                sites_stale_seconds: default_sites_stale_seconds(),
            },
            view: ViewConfig {
                interval_ms: 5000,
                interval_message: "interval msg".to_string(),
            },
            host: HostConfig {
                emit_interval_ms: 5000,
                emit_message: default_emit_message(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                console: true,
                log_dir: default_log_dir(),
                max_log_size_mb: default_max_log_size_mb(),
                file_rotation: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager(default_json: Option<&str>, user_json: Option<&str>) -> Result<(TempDir, ConfigManager)> {
        let temp_dir = TempDir::new()?;
        let config_dir = temp_dir.path().to_path_buf();
        let default_config_path = config_dir.join("default.json");
        let user_config_path = config_dir.join("user.json");

        if let Some(content) = default_json {
            std::fs::write(&default_config_path, content)?;
        }
        if let Some(content) = user_json {
            std::fs::write(&user_config_path, content)?;
        }

        let manager = ConfigManager::new_with_paths(config_dir, default_config_path, user_config_path)?;
        Ok((temp_dir, manager))
    }

    #[test]
    fn test_builtin_defaults_when_no_files() {
        let (_dir, manager) = create_test_config_manager(None, None).unwrap();
        let config = manager.get_config();

        assert_eq!(config.fathom.api_url, "https://api.usefathom.com/v1");
        assert_eq!(config.view.interval_ms, 5000);
        assert_eq!(config.view.interval_message, "interval msg");
        assert_eq!(manager.interval_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_user_config_overrides_nested_keys() {
        let user = r#"{ "fathom": { "api_key": "secret" }, "view": { "interval_ms": 1000 } }"#;
        let (_dir, manager) = create_test_config_manager(None, Some(user)).unwrap();
        let config = manager.get_config();

        assert_eq!(config.fathom.api_key, "secret");
        assert_eq!(config.fathom.api_url, "https://api.usefathom.com/v1");
        assert_eq!(config.view.interval_ms, 1000);
        assert_eq!(config.view.interval_message, "interval msg");
    }

    #[test]
    fn test_invalid_api_url_is_rejected() {
        let user = r#"{ "fathom": { "api_url": "::not a url::" } }"#;
        assert!(create_test_config_manager(None, Some(user)).is_err());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let user = r#"{ "view": { "interval_ms": 0 } }"#;
        assert!(create_test_config_manager(None, Some(user)).is_err());
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let user = r#"{ "logging": { "level": "loud" } }"#;
        assert!(create_test_config_manager(None, Some(user)).is_err());
    }

    #[test]
    fn test_malformed_default_is_an_error() {
        assert!(create_test_config_manager(Some("{ nope"), None).is_err());
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let merged = ConfigManager::merge_json_values(
            serde_json::json!({ "a": [1, 2], "b": { "c": 1, "d": 2 } }),
            serde_json::json!({ "a": [3], "b": { "d": 5 } }),
        );
        assert_eq!(merged, serde_json::json!({ "a": [3], "b": { "c": 1, "d": 5 } }));
    }

    #[test]
    fn test_save_user_config_then_reload() {
        let (_dir, mut manager) = create_test_config_manager(None, None).unwrap();

        let mut config = manager.get_config().clone();
        config.fathom.api_key = "abc".to_string();
        manager.save_user_config(config).unwrap();

        manager.reload().unwrap();
        assert_eq!(manager.get_config().fathom.api_key, "abc");
    }

    #[test]
    fn test_tray_can_be_disabled() {
        // Configs written by older versions still carry a window section
        let user = r#"{ "application": { "window": { "width": 400 }, "system_tray": { "enabled": false } } }"#;
        let (_dir, manager) = create_test_config_manager(None, Some(user)).unwrap();
        let tray = &manager.get_config().application.system_tray;

        assert!(!tray.enabled);
        assert_eq!(tray.tooltip, "Fathom Analytics");
    }
}
