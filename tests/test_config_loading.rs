//! Configuration loading and validation tests
//!
//! Tests focus on the observable outcome of loading a file, layering
//! overrides on top and validating before any connection is attempted.

use std::io::Write;
use tempfile::NamedTempFile;
use ttn_bridge::config::{BridgeConfig, ConfigError, ConfigOverrides};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[ttn]
region = "eu1"
user_id = "my-app@ttn"
access_key = "NNSXS.ABC.DEF"
device_id = "dev1"
"#,
    );

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();
    config.validate().unwrap();

    let params = config.broker_params().unwrap();
    assert_eq!(params.host(), "eu1.cloud.thethings.network");
    assert_eq!(params.user_id, "my-app@ttn");
    assert_eq!(params.access_key, "NNSXS.ABC.DEF");
    assert_eq!(params.mqtt.port, 1883);
    assert_eq!(params.mqtt.keep_alive_secs, 60);
    assert_eq!(config.device_id().unwrap(), "dev1");
}

#[test]
fn test_config_loads_mqtt_section() {
    let temp_file = write_config(
        r#"
[ttn]
region = "nam1"
user_id = "my-app@ttn"
access_key = "NNSXS.KEY"
device_id = "dev1"

[mqtt]
port = 8883
tls = true
keep_alive_secs = 30
connect_timeout_secs = 5
client_id = "bridge-1"
"#,
    );

    let config = BridgeConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.mqtt.port, 8883);
    assert!(config.mqtt.tls);
    assert_eq!(config.mqtt.keep_alive_secs, 30);
    assert_eq!(config.mqtt.connect_timeout_secs, 5);
    assert_eq!(config.mqtt.client_id.as_deref(), Some("bridge-1"));
}

#[test]
fn test_access_key_from_environment_variable() {
    std::env::set_var("TTN_BRIDGE_TEST_KEY_PRESENT", "NNSXS.FROMENV");
    let config = BridgeConfig::from_toml(
        r#"
[ttn]
region = "eu1"
user_id = "my-app@ttn"
access_key_env = "TTN_BRIDGE_TEST_KEY_PRESENT"
device_id = "dev1"
"#,
    )
    .unwrap();

    assert_eq!(config.access_key().unwrap(), "NNSXS.FROMENV");
}

#[test]
fn test_missing_access_key_env_is_an_error() {
    let config = BridgeConfig::from_toml(
        r#"
[ttn]
region = "eu1"
user_id = "my-app@ttn"
access_key_env = "TTN_BRIDGE_TEST_KEY_DEFINITELY_UNSET"
device_id = "dev1"
"#,
    )
    .unwrap();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "TTN_BRIDGE_TEST_KEY_DEFINITELY_UNSET"
    ));
}

#[test]
fn test_missing_values_fail_validation() {
    let config = BridgeConfig::from_toml(
        r#"
[ttn]
region = "eu1"
access_key = "NNSXS.KEY"
device_id = "dev1"
"#,
    )
    .unwrap();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingField(field)) if field == "user_id"
    ));

    assert!(BridgeConfig::default().validate().is_err());
}

#[test]
fn test_empty_values_fail_validation() {
    let config = BridgeConfig::from_toml(
        r#"
[ttn]
region = ""
user_id = "my-app@ttn"
access_key = "NNSXS.KEY"
device_id = "dev1"
"#,
    )
    .unwrap();

    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_device_id_fails_validation() {
    let config = BridgeConfig::from_toml(
        r#"
[ttn]
region = "eu1"
user_id = "my-app@ttn"
access_key = "NNSXS.KEY"
device_id = "dev/1"
"#,
    )
    .unwrap();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue(field, _)) if field == "device_id"
    ));
}

#[test]
fn test_overrides_win_over_file() {
    let mut config = BridgeConfig::from_toml(
        r#"
[ttn]
region = "eu1"
user_id = "file-app@ttn"
access_key = "NNSXS.FILE"
device_id = "file-dev"
"#,
    )
    .unwrap();

    config.apply_overrides(ConfigOverrides {
        region: Some("au1".to_string()),
        user_id: None,
        access_key: Some("NNSXS.CLI".to_string()),
        device_id: Some("cli-dev".to_string()),
    });

    let params = config.broker_params().unwrap();
    assert_eq!(params.region, "au1");
    assert_eq!(params.user_id, "file-app@ttn");
    assert_eq!(params.access_key, "NNSXS.CLI");
    assert_eq!(config.device_id().unwrap(), "cli-dev");
}

#[test]
fn test_overrides_alone_are_enough() {
    let mut config = BridgeConfig::default();
    config.apply_overrides(ConfigOverrides {
        region: Some("eu1".to_string()),
        user_id: Some("my-app@ttn".to_string()),
        access_key: Some("NNSXS.KEY".to_string()),
        device_id: Some("dev1".to_string()),
    });

    assert!(config.validate().is_ok());
}

#[test]
fn test_config_file_not_found() {
    let result = BridgeConfig::load_from_file(std::path::Path::new("/nonexistent/ttn-bridge.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml_syntax() {
    let temp_file = write_config("[ttn\nregion = ");
    let result = BridgeConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_redacted_hides_access_key() {
    let config = BridgeConfig::from_toml(
        r#"
[ttn]
region = "eu1"
user_id = "my-app@ttn"
access_key = "NNSXS.SECRET"
device_id = "dev1"
"#,
    )
    .unwrap();

    let shown = toml::to_string_pretty(&config.redacted()).unwrap();
    assert!(!shown.contains("NNSXS.SECRET"));
    assert!(shown.contains("my-app@ttn"));
    assert!(!format!("{:?}", config.broker_params().unwrap()).contains("SECRET"));
}
