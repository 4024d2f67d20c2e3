//! CLI integration tests.
//!
//! These tests verify the CLI argument parsing and configuration loading.

use std::ffi::OsString;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

use shell_bridge::cli::{parse_args_from, Args};
use shell_bridge::config::Config;

fn args(args: &[&str]) -> Vec<OsString> {
    std::iter::once("shell-bridge")
        .chain(args.iter().copied())
        .map(OsString::from)
        .collect()
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

// ============================================================================
// CLI Argument Tests
// ============================================================================

#[test]
fn test_cli_defaults() {
    let result = parse_args_from(args(&[])).unwrap();

    assert!(result.host.is_none());
    assert!(result.port.is_none());
    assert!(result.config.is_none());
    assert!(result.shell.is_none());
    assert!(result.log_level.is_none());
    assert!(!result.help);
    assert!(!result.version);
}

#[test]
fn test_cli_full_options() {
    let result = parse_args_from(args(&[
        "-H",
        "0.0.0.0",
        "-p",
        "8080",
        "-s",
        "/bin/zsh",
        "-l",
        "debug",
    ]))
    .unwrap();

    assert_eq!(result.host.unwrap().to_string(), "0.0.0.0");
    assert_eq!(result.port, Some(8080));
    assert_eq!(result.shell.as_deref(), Some("/bin/zsh"));
    assert_eq!(result.log_level.as_deref(), Some("debug"));
}

#[test]
fn test_cli_long_options() {
    let result = parse_args_from(args(&[
        "--host",
        "::1",
        "--port",
        "9000",
        "--log-level",
        "trace",
        "--version",
    ]))
    .unwrap();

    assert_eq!(result.host.unwrap().to_string(), "::1");
    assert_eq!(result.port, Some(9000));
    assert!(result.version);
}

#[test]
fn test_cli_config_file() {
    let result = parse_args_from(args(&["-c", "/etc/shell-bridge.json"])).unwrap();

    assert_eq!(
        result.config.unwrap().to_str().unwrap(),
        "/etc/shell-bridge.json"
    );
}

#[test]
fn test_cli_invalid_port() {
    let result = parse_args_from(args(&["-p", "not-a-number"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_invalid_host() {
    let result = parse_args_from(args(&["-H", "not-an-ip"]));
    assert!(result.is_err());
}

#[test]
fn test_cli_unexpected_argument() {
    let err = parse_args_from(args(&["serve"])).unwrap_err();
    assert!(err.to_string().contains("serve"));
}

// ============================================================================
// Configuration Loading Tests
// ============================================================================

#[test]
fn test_config_from_json_file() {
    let file = config_file(
        r#"{
            "server": { "host": "192.168.1.100", "port": 9000 },
            "shell": {
                "program": "/bin/zsh",
                "args": ["-f"],
                "cols": 132,
                "rows": 50,
                "terminate_timeout_ms": 750
            },
            "dispatch": { "interpreter": "/bin/dash" },
            "pump": { "flush_after_ms": 100 },
            "logging": { "level": "debug" }
        }"#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.server.host, "192.168.1.100");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.logging.level, "debug");

    let session = config.session_config();
    assert_eq!(session.shell.program, "/bin/zsh");
    assert_eq!(session.shell.args, vec!["-f"]);
    assert_eq!(session.shell.size.cols, 132);
    assert_eq!(session.shell.size.rows, 50);
    assert_eq!(session.shell.terminate_timeout, Duration::from_millis(750));
    assert_eq!(session.dispatcher.interpreter, "/bin/dash");
    assert_eq!(session.flush.flush_after, Duration::from_millis(100));
    assert_eq!(session.flush.idle_flush_after, Duration::from_millis(300));
}

#[test]
fn test_config_priority_cli_over_file() {
    let file = config_file(
        r#"{
            "server": { "host": "10.0.0.1", "port": 5000 },
            "shell": { "program": "/bin/zsh" }
        }"#,
    );

    let args = Args {
        host: Some("192.168.1.1".parse().unwrap()),
        port: Some(8080),
        shell: Some("/bin/sh".to_string()),
        config: Some(file.path().to_path_buf()),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();

    assert_eq!(config.server.host, "192.168.1.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.shell.program, "/bin/sh");
}

#[test]
fn test_config_file_kept_when_cli_silent() {
    let file = config_file(r#"{ "server": { "port": 5000 } }"#);

    let args = Args {
        config: Some(file.path().to_path_buf()),
        port: None,
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let port = std::env::var("SHELL_BRIDGE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000);
    assert_eq!(config.server.port, port);
}

#[test]
fn test_config_missing_file_fails() {
    let args = Args {
        config: Some("/nonexistent/shell-bridge.json".into()),
        ..Args::default()
    };

    assert!(Config::load(&args).is_err());
}

#[test]
fn test_config_to_server_config() {
    let args = Args {
        host: Some("0.0.0.0".parse().unwrap()),
        port: Some(8080),
        ..Args::default()
    };

    let config = Config::load(&args).unwrap();
    let server_config = config.to_server_config().unwrap();

    assert_eq!(server_config.bind_address().to_string(), "0.0.0.0:8080");
}

// ============================================================================
// Configuration Serialization Tests
// ============================================================================

#[test]
fn test_config_roundtrip() {
    let original = Config::default();
    let json = serde_json::to_string(&original).unwrap();
    let loaded: Config = serde_json::from_str(&json).unwrap();

    assert_eq!(original.server.port, loaded.server.port);
    assert_eq!(original.shell.prompt, loaded.shell.prompt);
    assert_eq!(
        original.dispatch.interactive_hints,
        loaded.dispatch.interactive_hints
    );
}

#[test]
fn test_config_partial_deserialization() {
    let json = r#"{"pump": {"tick_ms": 5}}"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.pump.tick_ms, 5);
    assert_eq!(config.pump.max_pending_chars, 50);
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.shell.term, "dumb");
}
