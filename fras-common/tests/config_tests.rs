//! Configuration loading and root folder resolution
//!
//! Tests that set FRAS_ROOT_FOLDER are marked #[serial] so they never run
//! concurrently with each other.

use fras_common::config::{
    load_toml_config, CompiledDefaults, RootFolderResolver, StorageMode, TomlConfig,
    ROOT_FOLDER_ENV,
};
use fras_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert!(defaults.root_folder.ends_with("fras") || defaults.root_folder.ends_with("fras_data"));
    assert_eq!(defaults.port, 5750);
    assert_eq!(defaults.log_level, "info");
    assert_eq!(defaults.notice_ttl_ms, 3000);
    assert_eq!(defaults.storage_mode, StorageMode::Private);
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let root_folder = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_overrides_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/fras-test-env-folder");

    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/fras-test-toml-folder")),
        ..Default::default()
    };
    let root_folder = RootFolderResolver::new("test-module").with_toml(&toml).resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/fras-test-env-folder"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_cli_arg_has_highest_priority() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/fras-test-env-folder");

    let root_folder = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/fras-test-cli-folder")))
        .resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/fras-test-cli-folder"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_empty_env_var_falls_through_to_toml() {
    env::set_var(ROOT_FOLDER_ENV, "");

    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/fras-test-toml-folder")),
        ..Default::default()
    };
    let root_folder = RootFolderResolver::new("test-module").with_toml(&toml).resolve();
    assert_eq!(root_folder, PathBuf::from("/tmp/fras-test-toml-folder"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
fn test_missing_config_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = load_toml_config(Some(&dir.path().join("absent.toml"))).unwrap();

    assert!(config.root_folder.is_none());
    assert!(config.port.is_none());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_config_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "root_folder = \"/srv/fras\"\nstorage_mode = \"private\"\n\n[logging]\nlevel = \"warn\"\n",
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/fras")));
    assert_eq!(config.storage_mode, Some(StorageMode::Private));
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn test_unparsable_config_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = [").unwrap();

    assert!(matches!(load_toml_config(Some(&path)), Err(Error::Config(_))));
}
