//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from, in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: the service logs a warning and
//! starts on compiled defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Environment variable overriding the storage root folder
pub const ROOT_FOLDER_ENV: &str = "FRAS_ROOT_FOLDER";

/// How the storage root is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Application-private data directory, created on demand
    #[default]
    Private,
    /// User-granted directory that must already exist
    Granted,
}

impl FromStr for StorageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(StorageMode::Private),
            "granted" => Ok(StorageMode::Granted),
            other => Err(Error::Config(format!(
                "Unknown storage mode '{}' (expected 'private' or 'granted')",
                other
            ))),
        }
    }
}

/// Bootstrap configuration loaded from TOML file
///
/// Every field is optional; absent values fall through to environment
/// variables and compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Base URL of the recognition backend (roster + capture control)
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Trained face model file checked by the readiness gate
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default)]
    pub storage_mode: Option<StorageMode>,

    /// Lifetime of "already marked" notices
    #[serde(default)]
    pub notice_ttl_ms: Option<u64>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Built-in defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub port: u16,
    pub log_level: String,
    pub model_path: PathBuf,
    pub notice_ttl_ms: u64,
    pub storage_mode: StorageMode,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: get_default_root_folder(),
            port: 5750,
            log_level: default_log_level(),
            model_path: PathBuf::from("trained_models/face_recognition_model"),
            notice_ttl_ms: 3000,
            storage_mode: StorageMode::Private,
        }
    }
}

/// Load the TOML bootstrap file
///
/// Uses `explicit` when given, otherwise the platform config location.
/// Returns defaults (with a warning) when the file does not exist; a file
/// that exists but cannot be read or parsed is a `Config` error.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => {
                warn!("No config file found, using compiled defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    if !path.exists() {
        warn!("Config file {} not found, using compiled defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
    let config = parse_toml_config(&content)?;
    info!("Loaded TOML configuration from {}", path.display());
    Ok(config)
}

/// Parse TOML bootstrap text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
}

/// Platform config file location, if one exists
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("fras").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fras/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
pub fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/fras (or /var/lib/fras for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("fras"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/fras"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("fras"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/fras"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("fras"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\fras"))
    } else {
        PathBuf::from("./fras_data")
    }
}

/// Resolves the storage root folder across all configuration sources
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder {} (command line)", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.is_empty() {
                info!("{}: root folder {} ({})", self.module_name, path, ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!("{}: root folder {} (config file)", self.module_name, path.display());
            return path.clone();
        }

        let path = get_default_root_folder();
        info!("{}: root folder {} (default)", self.module_name, path.display());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!("granted".parse::<StorageMode>().unwrap(), StorageMode::Granted);
        assert_eq!("Private".parse::<StorageMode>().unwrap(), StorageMode::Private);
        assert!("cloud".parse::<StorageMode>().is_err());
    }

    #[test]
    fn test_parse_toml_config_all_fields() {
        let config = parse_toml_config(
            r#"
            root_folder = "/srv/fras"
            port = 6000
            backend_url = "http://localhost:5000"
            model_path = "/srv/models/face"
            storage_mode = "granted"
            notice_ttl_ms = 1500

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/fras")));
        assert_eq!(config.port, Some(6000));
        assert_eq!(config.backend_url.as_deref(), Some("http://localhost:5000"));
        assert_eq!(config.storage_mode, Some(StorageMode::Granted));
        assert_eq!(config.notice_ttl_ms, Some(1500));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_toml_config_rejects_bad_types() {
        let err = parse_toml_config("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
