use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use love_ledger::config::{
    Cli, ConfigError, FileConfig, ServerConfig, Storage, normalize_prefix, parse_bind,
};

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["love-ledger"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_defaults() {
    let config = ServerConfig::resolve(Cli::default(), FileConfig::default()).unwrap();
    assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
    assert_eq!(config.storage, Storage::Sqlite(PathBuf::from("love-ledger.db")));
    assert_eq!(config.prefix, "/api");
    assert_eq!(config.api_token, None);
    assert_eq!(config.log_level, LevelFilter::Info);
}

#[test]
fn test_flags() {
    let config = ServerConfig::resolve(
        cli(&[
            "--bind",
            "0.0.0.0:9000",
            "--in-memory",
            "--prefix",
            "/v1/ledger/",
            "--api-token",
            "s3cret",
            "--log-level",
            "debug",
        ]),
        FileConfig::default(),
    )
    .unwrap();
    assert_eq!(config.bind.port(), 9000);
    assert_eq!(config.storage, Storage::Memory);
    assert_eq!(config.prefix, "/v1/ledger");
    assert_eq!(config.api_token.as_deref(), Some("s3cret"));
    assert_eq!(config.log_level, LevelFilter::Debug);
}

#[test]
fn test_db_conflicts_with_in_memory() {
    let result = Cli::try_parse_from(["love-ledger", "--db", "x.db", "--in-memory"]);
    assert!(result.is_err());
}

#[test]
fn test_flags_override_file() {
    let file = write_config(
        r#"{ "bind": "127.0.0.1:7000", "dbPath": "/var/lib/ledger.db", "prefix": "/", "apiToken": "from-file" }"#,
    );
    let path = file.path().to_string_lossy().into_owned();

    let config = ServerConfig::from_cli(cli(&["--config", &path, "--bind", "127.0.0.1:7001"]))
        .unwrap();
    assert_eq!(config.bind.port(), 7001);
    assert_eq!(
        config.storage,
        Storage::Sqlite(PathBuf::from("/var/lib/ledger.db"))
    );
    assert_eq!(config.prefix, "");
    assert_eq!(config.api_token.as_deref(), Some("from-file"));

    let config = ServerConfig::from_cli(cli(&["--config", &path, "--db", "other.db"])).unwrap();
    assert_eq!(config.storage, Storage::Sqlite(PathBuf::from("other.db")));
}

#[test]
fn test_file_in_memory() {
    let file = write_config(r#"{ "inMemory": true, "logLevel": "warn" }"#);
    let config = ServerConfig::from_cli(cli(&[
        "--config",
        &file.path().to_string_lossy(),
    ]))
    .unwrap();
    assert_eq!(config.storage, Storage::Memory);
    assert_eq!(config.log_level, LevelFilter::Warn);
}

#[test]
fn test_bad_config_files() {
    let err = ServerConfig::from_cli(cli(&["--config", "/nonexistent/love-ledger.json"]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));

    let file = write_config(r#"{ "port": 8080 }"#);
    let err = ServerConfig::from_cli(cli(&["--config", &file.path().to_string_lossy()]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_validation() {
    for args in [
        &["--bind", "localhost"][..],
        &["--prefix", "api"],
        &["--prefix", "/api//x"],
        &["--prefix", "/contracts/:id"],
        &["--api-token", "  "],
        &["--log-level", "loud"],
    ] {
        let err = ServerConfig::resolve(cli(args), FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{args:?}");
    }
}

#[test]
fn test_helpers() {
    assert!(parse_bind(" [::1]:80 ").is_ok());
    assert!(parse_bind("127.0.0.1").is_err());
    assert_eq!(normalize_prefix("/").unwrap(), "");
    assert_eq!(normalize_prefix("/api").unwrap(), "/api");
    assert!(normalize_prefix("").is_err());
}
