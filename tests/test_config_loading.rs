//! Configuration loading and validation tests
//!
//! Files are written to temporary paths and loaded the way the CLI loads them.

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use up_mqtt5_transport::{ConfigError, TransportConfig, UUri};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[source]
authority = "device1"
ue_id = 256
ue_version_major = 1

[mqtt]
broker_url = "mqtt://localhost:1883"
username_env = "MQTT_USER"
password_env = "MQTT_PASS"
"#,
    );

    let config = TransportConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.source.to_uri(), UUri::new("device1", 0x100, 1, 0));
    assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
    assert_eq!(config.mqtt.username_env.as_deref(), Some("MQTT_USER"));
    assert_eq!(config.mqtt.password_env.as_deref(), Some("MQTT_PASS"));
}

#[test]
fn test_config_applies_reconnect_defaults_when_not_specified() {
    let temp_file = write_config(
        r#"
[source]
authority = "device1"
ue_id = 1
ue_version_major = 1

[mqtt]
broker_url = "mqtt://localhost"

[mqtt.reconnect]
max_attempts = 3
"#,
    );

    let config = TransportConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.reconnect.max_attempts, Some(3));
    assert_eq!(config.mqtt.reconnect.backoff_pattern, vec![25, 50, 100, 250]);
    assert_eq!(config.mqtt.reconnect.sustained_delay, 250);
}

#[test]
fn test_config_returns_error_when_file_missing() {
    let result = TransportConfig::load_from_file(Path::new("/nonexistent/transport.toml"));

    match result {
        Err(ConfigError::FileRead(_)) => {}
        other => panic!("Expected FileRead error, got {other:?}"),
    }
}

#[test]
fn test_config_returns_error_when_source_section_missing() {
    let temp_file = write_config(
        r#"
[mqtt]
broker_url = "mqtt://localhost:1883"
"#,
    );

    match TransportConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::TomlParse(_)) => {}
        other => panic!("Expected TomlParse error, got {other:?}"),
    }
}

#[test]
fn test_config_returns_error_for_invalid_toml_syntax() {
    let temp_file = write_config("[source\nauthority = device1");

    match TransportConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::TomlParse(_)) => {}
        other => panic!("Expected TomlParse error, got {other:?}"),
    }
}

#[test]
fn test_config_returns_error_for_empty_file() {
    let temp_file = write_config("");

    assert!(TransportConfig::load_from_file(temp_file.path()).is_err());
}

#[test]
fn test_config_rejects_authority_with_topic_characters() {
    for authority in ["dev/ice", "dev+1", "dev#"] {
        let temp_file = write_config(&format!(
            r#"
[source]
authority = "{authority}"
ue_id = 1
ue_version_major = 1

[mqtt]
broker_url = "mqtt://localhost"
"#
        ));

        match TransportConfig::load_from_file(temp_file.path()) {
            Err(ConfigError::InvalidConfig(message)) => {
                assert!(message.contains(authority), "{message}")
            }
            other => panic!("Expected InvalidConfig for {authority}, got {other:?}"),
        }
    }
}

#[test]
fn test_config_rejects_unsupported_broker_scheme() {
    let temp_file = write_config(
        r#"
[source]
authority = "device1"
ue_id = 1
ue_version_major = 1

[mqtt]
broker_url = "http://localhost:1883"
"#,
    );

    match TransportConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::InvalidConfig(message)) => assert!(message.contains("mqtt://")),
        other => panic!("Expected InvalidConfig error, got {other:?}"),
    }
}

#[test]
fn test_config_show_output_loads_back() {
    let temp_file = write_config(
        r#"
[source]
authority = "cloud"
ue_id = 0x200
ue_version_major = 2
resource_id = 0x8000

[mqtt]
broker_url = "mqtts://broker.example.com"
client_id = "gateway"
"#,
    );
    let config = TransportConfig::load_from_file(temp_file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reloaded = TransportConfig::from_toml(&rendered).unwrap();

    assert_eq!(reloaded, config);
}
