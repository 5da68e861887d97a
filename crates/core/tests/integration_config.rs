//! Integration tests for configuration loading from files and the process
//! environment. Tests that touch process-wide variables run serially.

use serial_test::serial;
use std::io::Write;
use tailgate_core::config::ServiceConfig;
use tailgate_core::errors::{ConfigError, TailgateError};
use tailgate_core::redaction;
use tempfile::NamedTempFile;

const VARS: &[&str] = &[
    "TAILGATE_CONFIG",
    "TAILGATE_ENV",
    "TAILGATE_PREFIX",
    "TAILGATE_DEV_MODE",
    "TAILGATE_AUTH_KEY",
    "TS_AUTHKEY",
    "TAILSCALE_API_KEY",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_defaults_without_file_or_env() {
    clear_env();
    let config = ServiceConfig::load(None).unwrap();
    assert_eq!(config, ServiceConfig::default());
    let identity = config.default_identity().unwrap();
    assert_eq!(identity.container_name, "tailgate-dev-tailscale");
}

#[test]
#[serial]
fn test_file_then_env_precedence() {
    clear_env();
    let file = config_file(
        r#"
project_prefix = "chronicle"
environment = "green"
dev_mode = true
certs_root = "/srv/certs"

[services]
backend_port = 9000

[environments]
blue = "chronicle-blue.example.ts.net"
"#,
    );
    std::env::set_var("TAILGATE_ENV", "blue");
    std::env::set_var("TAILGATE_DEV_MODE", "false");

    let config = ServiceConfig::load(Some(file.path())).unwrap();
    clear_env();

    assert_eq!(config.project_prefix, "chronicle");
    assert_eq!(config.environment, "blue");
    assert!(!config.dev_mode);
    assert_eq!(config.services.backend_port, 9000);
    assert_eq!(config.services.streaming_port, 8000);
    assert_eq!(
        config.environments.get("blue").map(String::as_str),
        Some("chronicle-blue.example.ts.net")
    );
    let identity = config.default_identity().unwrap();
    assert_eq!(identity.container_name, "chronicle-blue-tailscale");
    assert_eq!(identity.certs_dir, std::path::PathBuf::from("/srv/certs/blue"));
}

#[test]
#[serial]
fn test_config_path_from_environment() {
    clear_env();
    let file = config_file("environment = \"staging\"\n");
    std::env::set_var("TAILGATE_CONFIG", file.path());

    let config = ServiceConfig::load(None).unwrap();
    clear_env();
    assert_eq!(config.environment, "staging");
}

#[test]
#[serial]
fn test_invalid_environment_name_is_rejected() {
    clear_env();
    std::env::set_var("TAILGATE_ENV", "Prod_1");
    let err = ServiceConfig::load(None).unwrap_err();
    clear_env();
    assert!(matches!(
        err,
        TailgateError::Config(ConfigError::InvalidEnvironment { .. })
    ));
}

#[test]
#[serial]
fn test_malformed_file_names_the_path() {
    clear_env();
    let file = config_file("environment = [\n");
    let err = ServiceConfig::load(Some(file.path())).unwrap_err();
    assert!(err
        .to_string()
        .contains(&file.path().display().to_string()));
}

#[test]
#[serial]
fn test_missing_file_is_a_read_error_naming_the_path() {
    clear_env();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    match ServiceConfig::load(Some(&path)) {
        Err(TailgateError::Config(ConfigError::Io { path: reported, source })) => {
            assert_eq!(reported, path.display().to_string());
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected a read error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_credentials_are_registered_for_redaction() {
    clear_env();
    std::env::set_var("TS_AUTHKEY", "unattended-login-secret-42");
    let config = ServiceConfig::load(None).unwrap();
    clear_env();

    assert_eq!(config.auth_key.as_deref(), Some("unattended-login-secret-42"));
    let text = redaction::redact("up --authkey=unattended-login-secret-42");
    assert_eq!(text, "up --authkey=****");

    // credentials never serialize
    let rendered = serde_json::to_string(&config).unwrap();
    assert!(!rendered.contains("unattended-login-secret-42"));
}
