use super::data::Config;
use super::io::ConfigError;
use super::ConfigOverrides;
use crate::core::constants::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT};
use tempfile::TempDir;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert_eq!(config.model(), DEFAULT_MODEL);
    assert_eq!(config.base_url(), DEFAULT_BASE_URL);
    assert_eq!(config.system_prompt(), DEFAULT_SYSTEM_PROMPT);
    assert_eq!(config.api_key_env(), "GEMINI_API_KEY");
}

#[test]
fn test_config_persistence_round_trip() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let config = Config {
        model: Some("gemini-1.5-flash".to_string()),
        system_prompt: Some("You are Sifra.".to_string()),
        bind: Some("0.0.0.0:8080".to_string()),
        ..Default::default()
    };
    config.save_to_path(&config_path).expect("save failed");

    let loaded = Config::load_from_path(&config_path).expect("load failed");
    assert_eq!(loaded, config);
    assert_eq!(loaded.bind(), "0.0.0.0:8080");
    assert_eq!(loaded.base_url(), DEFAULT_BASE_URL);
}

#[test]
fn test_invalid_toml_reports_parse_error_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "model = [unterminated").expect("write failed");

    let err = Config::load_from_path(&config_path).expect_err("parse should fail");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().starts_with("Failed to parse config at "));
}

#[test]
fn test_blank_values_fall_back_to_defaults() {
    let config: Config = toml::from_str("model = \"  \"\nbase_url = \"\"").expect("valid toml");
    assert_eq!(config.model(), DEFAULT_MODEL);
    assert_eq!(config.base_url(), DEFAULT_BASE_URL);
}

#[test]
fn test_empty_system_prompt_is_kept() {
    let config: Config = toml::from_str("system_prompt = \"\"").expect("valid toml");
    assert_eq!(config.system_prompt(), "");
}

#[test]
fn test_overrides_replace_only_given_values() {
    let mut config = Config {
        model: Some("from-file".to_string()),
        bind: Some("127.0.0.1:4000".to_string()),
        ..Default::default()
    };
    config.apply_overrides(ConfigOverrides {
        model: Some("from-cli".to_string()),
        ..Default::default()
    });
    assert_eq!(config.model(), "from-cli");
    assert_eq!(config.bind(), "127.0.0.1:4000");
}

#[test]
fn test_api_key_reads_configured_env_var() {
    let config = Config {
        api_key_env: Some("SIFRA_TEST_KEY_PRESENT".to_string()),
        ..Default::default()
    };
    std::env::set_var("SIFRA_TEST_KEY_PRESENT", " secret ");
    assert_eq!(config.api_key().as_deref(), Some("secret"));

    let missing = Config {
        api_key_env: Some("SIFRA_TEST_KEY_ABSENT".to_string()),
        ..Default::default()
    };
    std::env::remove_var("SIFRA_TEST_KEY_ABSENT");
    assert_eq!(missing.api_key(), None);
}
