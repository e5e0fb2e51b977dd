//! Integration tests for configuration loading and logging setup

use bridge_traits::time::LogLevel;
use core_runtime::config::MirrorConfig;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::io::Write;

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_filter("core_runtime=debug");

    // Only one global subscriber per process
    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());

    tracing::info!(component = "test", "Logging initialized");
}

#[test]
fn test_config_file_round_trip_through_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "sources": [
                {{ "name": "mainnet", "host": "ledger-a" }},
                {{ "name": "mainnet", "host": "ledger-b", "port": 6432 }}
            ],
            "gateway_root": "https://gw.example/ipfs",
            "root_dir": "/srv/media",
            "temp_dir": "/tmp/mirror",
            "root_url": "https://media.example",
            "worker_concurrency": 4,
            "log_format": "json"
        }}"#
    )
    .unwrap();

    let config = MirrorConfig::from_json_file(file.path()).unwrap();

    assert_eq!(config.sources.len(), 2);
    assert_eq!(config.sources[1].port, 6432);
    assert_eq!(config.worker_concurrency, 4);
    assert_eq!(config.log_format, LogFormat::Json);
}

#[test]
fn test_missing_config_file_is_reported() {
    let result = MirrorConfig::from_json_file("/nonexistent/mintmirror.json");
    assert!(result.is_err());
}
