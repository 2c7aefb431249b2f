use std::path::Path;
use tempfile::tempdir;

use crate::config::{BatchPolicy, ConfigError, ConfigFormat, LoaderConfig};

#[test]
fn test_default_config() {
    let config = LoaderConfig::default();
    assert_eq!(config.batch_policy, BatchPolicy::AbortOnFirstError);
    assert!(config.log_skipped_candidates);
}

#[test]
fn test_format_from_path() {
    assert_eq!(ConfigFormat::from_path(Path::new("loader.json")), Some(ConfigFormat::Json));
    assert_eq!(ConfigFormat::from_path(Path::new("LOADER.JSON")), Some(ConfigFormat::Json));
    #[cfg(feature = "yaml-config")]
    {
        assert_eq!(ConfigFormat::from_path(Path::new("loader.yaml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("loader.yml")), Some(ConfigFormat::Yaml));
    }
    #[cfg(feature = "toml-config")]
    assert_eq!(ConfigFormat::from_path(Path::new("loader.toml")), Some(ConfigFormat::Toml));
    assert_eq!(ConfigFormat::from_path(Path::new("loader.ini")), None);
    assert_eq!(ConfigFormat::from_path(Path::new("loader")), None);
}

#[test]
fn test_partial_json_uses_defaults() {
    let config = LoaderConfig::from_str_with_format(r#"{ "batch_policy": "continue_on_error" }"#, ConfigFormat::Json)
        .expect("valid config");
    assert_eq!(config.batch_policy, BatchPolicy::ContinueOnError);
    assert!(config.log_skipped_candidates); // default kept
}

#[cfg(feature = "toml-config")]
#[test]
fn test_toml_config() {
    let data = "batch_policy = \"abort_on_first_error\"\nlog_skipped_candidates = false\n";
    let config = LoaderConfig::from_str_with_format(data, ConfigFormat::Toml).expect("valid TOML");
    assert_eq!(config.batch_policy, BatchPolicy::AbortOnFirstError);
    assert!(!config.log_skipped_candidates);
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_yaml_config() {
    let data = "batch_policy: continue_on_error\n";
    let config = LoaderConfig::from_str_with_format(data, ConfigFormat::Yaml).expect("valid YAML");
    assert_eq!(config.batch_policy, BatchPolicy::ContinueOnError);
}

#[test]
fn test_unknown_policy_is_rejected() {
    let result = LoaderConfig::from_str_with_format(r#"{ "batch_policy": "sometimes" }"#, ConfigFormat::Json);
    match result {
        Err(ConfigError::DeserializationError { format, .. }) => assert_eq!(format, "JSON"),
        other => panic!("Expected DeserializationError, got {:?}", other),
    }
}

#[test]
fn test_save_and_load_from_disk() {
    let dir = tempdir().expect("Failed to create temp directory");
    let config = LoaderConfig {
        batch_policy: BatchPolicy::ContinueOnError,
        log_skipped_candidates: false,
    };

    let json_path = dir.path().join("loader.json");
    config.save(&json_path).expect("save JSON");
    assert_eq!(LoaderConfig::from_path(&json_path).expect("load JSON"), config);

    #[cfg(feature = "toml-config")]
    {
        let toml_path = dir.path().join("loader.toml");
        config.save(&toml_path).expect("save TOML");
        assert_eq!(LoaderConfig::from_path(&toml_path).expect("load TOML"), config);
    }
}

#[test]
fn test_from_path_errors() {
    let dir = tempdir().expect("Failed to create temp directory");

    let unsupported = dir.path().join("loader.ini");
    assert!(matches!(
        LoaderConfig::from_path(&unsupported),
        Err(ConfigError::UnsupportedFormat(_))
    ));

    let missing = dir.path().join("missing.json");
    match LoaderConfig::from_path(&missing) {
        Err(ConfigError::Io { path, operation, .. }) => {
            assert_eq!(path, missing);
            assert_eq!(operation, "read_config");
        }
        other => panic!("Expected Io error, got {:?}", other),
    }
}
