//! Configuration loading and graceful degradation
//!
//! Tests that manipulate `QTAG_*` environment variables are marked
//! `#[serial]` so they never run in parallel with each other.

use qtag_common::config::{resolve_config_path, OverlayConfig, CONFIG_PATH_ENV};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn clear_env() {
    for name in [
        CONFIG_PATH_ENV,
        "QTAG_SERVER_URL",
        "QTAG_API_KEY",
        "QTAG_USER_ID",
        "QTAG_CACHE_VERSION",
        "QTAG_LOG_LEVEL",
    ] {
        env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = OverlayConfig::load(Some(&missing)).unwrap();
    assert_eq!(config, OverlayConfig::default());
}

#[test]
#[serial]
fn test_file_is_loaded() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r##"
        [server]
        base_url = "http://media.local:8096"
        user_id = "0123456789abcdef0123456789abcdef"

        [scheduler]
        max_requests_per_second = 4

        [reconciler]
        ignore_selectors = ["#castCollapsible"]
        "##,
    )
    .unwrap();

    let config = OverlayConfig::load(Some(&path)).unwrap();
    assert_eq!(
        config.server.base_url.as_deref(),
        Some("http://media.local:8096")
    );
    assert_eq!(config.scheduler.max_requests_per_second, 4);
    assert_eq!(config.reconciler.ignore_selectors, vec!["#castCollapsible"]);
    assert_eq!(config.cache.version, "v15");
}

#[test]
#[serial]
fn test_invalid_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[scheduler]\nbase_delay_ms = 0\n").unwrap();

    assert!(OverlayConfig::load(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_env_var_selects_config_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("from-env.toml");
    fs::write(&path, "[cache]\nversion = \"v99\"\n").unwrap();
    env::set_var(CONFIG_PATH_ENV, &path);

    assert_eq!(resolve_config_path(None), Some(path.clone()));
    let config = OverlayConfig::load(None).unwrap();
    assert_eq!(config.cache.version, "v99");

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_beat_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        "[server]\nbase_url = \"http://file\"\n[logging]\nlevel = \"warn\"\n",
    )
    .unwrap();

    env::set_var("QTAG_SERVER_URL", "http://env");
    env::set_var("QTAG_API_KEY", "secret");
    env::set_var("QTAG_CACHE_VERSION", "v20");
    env::set_var("QTAG_LOG_LEVEL", "debug");

    let config = OverlayConfig::load(Some(&path)).unwrap();
    assert_eq!(config.server.base_url.as_deref(), Some("http://env"));
    assert_eq!(config.server.api_key.as_deref(), Some("secret"));
    assert_eq!(config.cache.version, "v20");
    assert_eq!(config.logging.level, "debug");

    clear_env();
}

#[test]
#[serial]
fn test_blank_env_values_are_ignored() {
    clear_env();
    env::set_var("QTAG_CACHE_VERSION", "   ");

    let mut config = OverlayConfig::default();
    config.apply_env_overrides();
    assert_eq!(config.cache.version, "v15");

    clear_env();
}

#[test]
#[serial]
fn test_env_cache_version_must_be_key_safe() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    env::set_var("QTAG_CACHE_VERSION", "v16/beta");
    assert!(OverlayConfig::load(Some(&missing)).is_err());

    clear_env();
}
