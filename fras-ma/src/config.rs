//! Configuration for the fras-ma attendance service
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--port`, `--root-folder`, ...)
//! 2. Environment variables (`FRAS_MA_PORT`, `FRAS_ROOT_FOLDER`, `FRAS_BACKEND_URL`)
//! 3. TOML configuration file
//! 4. Built-in defaults ([`CompiledDefaults`])
//!
//! Command-line and environment sources are merged by clap; the TOML layer
//! and defaults are applied in [`Config::resolve`].

use crate::error::{Error, Result};
use clap::Parser;
use fras_common::config::{
    load_toml_config, CompiledDefaults, RootFolderResolver, StorageMode, TomlConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Command-line arguments for fras-ma
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fras-ma")]
#[command(about = "Mark-attendance service for face-recognition attendance")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "FRAS_MA_PORT")]
    pub port: Option<u16>,

    /// Storage root folder
    #[arg(short, long, env = "FRAS_ROOT_FOLDER")]
    pub root_folder: Option<PathBuf>,

    /// Recognition backend base URL; local roster and capture when absent
    #[arg(short, long, env = "FRAS_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Storage mode: private (created on demand) or granted (must exist)
    #[arg(long)]
    pub storage_mode: Option<StorageMode>,

    /// Trained face model checked before a session may start
    #[arg(long)]
    pub model_path: Option<PathBuf>,
}

/// Resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub root_folder: PathBuf,
    pub storage_mode: StorageMode,
    pub backend_url: Option<String>,
    pub model_path: PathBuf,
    pub notice_ttl: Duration,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load the TOML file named by `args` (or the platform default) and resolve
    pub fn load(args: &Args) -> Result<Self> {
        let toml = load_toml_config(args.config.as_deref())?;
        Self::resolve(args, &toml)
    }

    /// Merge command-line/environment values over TOML values and defaults
    pub fn resolve(args: &Args, toml: &TomlConfig) -> Result<Self> {
        let defaults = CompiledDefaults::for_current_platform();

        let root_folder = RootFolderResolver::new("fras-ma")
            .with_cli_arg(args.root_folder.clone())
            .with_toml(toml)
            .resolve();

        let backend_url = args
            .backend_url
            .clone()
            .or_else(|| toml.backend_url.clone())
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "Backend URL '{}' must start with http:// or https://",
                    url
                )));
            }
        }

        let config = Self {
            port: args.port.or(toml.port).unwrap_or(defaults.port),
            root_folder,
            storage_mode: args
                .storage_mode
                .or(toml.storage_mode)
                .unwrap_or(defaults.storage_mode),
            backend_url,
            model_path: args
                .model_path
                .clone()
                .or_else(|| toml.model_path.clone())
                .unwrap_or(defaults.model_path),
            notice_ttl: Duration::from_millis(toml.notice_ttl_ms.unwrap_or(defaults.notice_ttl_ms)),
            log_level: toml.logging.level.clone(),
            log_file: toml.logging.file.clone(),
        };

        info!(
            "Configuration: port={}, storage={:?}, backend={}",
            config.port,
            config.storage_mode,
            config.backend_url.as_deref().unwrap_or("local")
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fras_common::config::parse_toml_config;

    fn no_env_args() -> Args {
        Args {
            root_folder: Some(PathBuf::from("/tmp/fras-config-test")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_apply_without_overrides() {
        let config = Config::resolve(&no_env_args(), &TomlConfig::default()).unwrap();

        assert_eq!(config.port, 5750);
        assert_eq!(config.storage_mode, StorageMode::Private);
        assert_eq!(config.notice_ttl, Duration::from_millis(3000));
        assert_eq!(config.model_path, PathBuf::from("trained_models/face_recognition_model"));
        assert!(config.backend_url.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_values_apply_below_args() {
        let toml = parse_toml_config(
            r#"
            port = 6100
            backend_url = "http://localhost:5000/"
            storage_mode = "granted"
            notice_ttl_ms = 500
            "#,
        )
        .unwrap();

        let config = Config::resolve(&no_env_args(), &toml).unwrap();
        assert_eq!(config.port, 6100);
        assert_eq!(config.backend_url.as_deref(), Some("http://localhost:5000"));
        assert_eq!(config.storage_mode, StorageMode::Granted);
        assert_eq!(config.notice_ttl, Duration::from_millis(500));

        let args = Args {
            port: Some(7000),
            storage_mode: Some(StorageMode::Private),
            ..no_env_args()
        };
        let config = Config::resolve(&args, &toml).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.storage_mode, StorageMode::Private);
    }

    #[test]
    fn test_backend_url_requires_scheme() {
        let args = Args {
            backend_url: Some("localhost:5000".to_string()),
            ..no_env_args()
        };
        assert!(matches!(
            Config::resolve(&args, &TomlConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_args_parse_from_command_line() {
        let args = Args::try_parse_from([
            "fras-ma",
            "--port",
            "6200",
            "--storage-mode",
            "granted",
            "--model-path",
            "/models/face",
        ])
        .unwrap();

        assert_eq!(args.port, Some(6200));
        assert_eq!(args.storage_mode, Some(StorageMode::Granted));
        assert_eq!(args.model_path, Some(PathBuf::from("/models/face")));
    }
}
