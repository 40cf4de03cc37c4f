//! Config path resolution and TOML loading tests
//!
//! Uses serial_test to prevent env var races: tests touching
//! SGC_TEST_CONFIG are marked #[serial].

use serde::{Deserialize, Serialize};
use serial_test::serial;
use sgc_common::config::{load_toml, resolve_config_path, write_toml_config, LoggingConfig};
use sgc_common::Error;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
struct Sample {
    seed: u64,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    env::set_var("SGC_TEST_CONFIG", "/tmp/sgc-env-config.toml");

    let path = resolve_config_path(None, "SGC_TEST_CONFIG", "sweep.toml").unwrap();
    assert_eq!(path, PathBuf::from("/tmp/sgc-env-config.toml"));

    env::remove_var("SGC_TEST_CONFIG");
}

#[test]
#[serial]
fn test_cli_arg_overrides_env_var() {
    env::set_var("SGC_TEST_CONFIG", "/tmp/sgc-env-config.toml");

    let cli = PathBuf::from("/tmp/sgc-cli-config.toml");
    let path = resolve_config_path(Some(&cli), "SGC_TEST_CONFIG", "sweep.toml").unwrap();
    assert_eq!(path, cli);

    env::remove_var("SGC_TEST_CONFIG");
}

#[test]
#[serial]
fn test_no_source_is_config_error() {
    env::remove_var("SGC_TEST_CONFIG");

    let result = resolve_config_path(None, "SGC_TEST_CONFIG", "sgc-surely-absent-file.toml");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_write_then_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("resolved.toml");

    let sample = Sample {
        seed: 7,
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
    };
    write_toml_config(&sample, &path).unwrap();
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded: Sample = load_toml(&path).unwrap();
    assert_eq!(loaded.seed, 7);
    assert_eq!(loaded.logging.level, "debug");
}

#[test]
fn test_load_malformed_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "seed = [unclosed").unwrap();

    let result: Result<Sample, _> = load_toml(&path);
    assert!(matches!(result, Err(Error::Config(_))));
}
