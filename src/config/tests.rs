//! Configuration tests

use config::FileFormat;

use super::Config;

fn parse(toml: &str) -> Config {
    config::Config::builder()
        .add_source(config::File::from_str(toml, FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

#[test]
fn defaults_without_file() {
    let cfg = Config::default();
    assert_eq!(cfg.server.port, 44444);
    assert_eq!(cfg.server.backlog, 1024);
    assert!(cfg.server.frame_trailing_newline);
    assert_eq!(cfg.server.default_prefetch, 10);
    assert_eq!(cfg.log.level, "info");
    assert_eq!(cfg.database.port, 5432);
    assert!(!cfg.database.is_configured());
}

#[test]
fn partial_file_overrides_defaults() {
    let cfg = parse(
        r#"
        [server]
        port = 61613
        frame_trailing_newline = false

        [database]
        host = "db.internal"
        user = "broker"
        password = "secret"
        "#,
    );
    assert_eq!(cfg.server.port, 61613);
    assert!(!cfg.server.frame_trailing_newline);
    // Untouched sections keep their defaults.
    assert_eq!(cfg.server.backlog, 1024);
    assert_eq!(cfg.database.host.as_deref(), Some("db.internal"));
    assert_eq!(cfg.database.user.as_deref(), Some("broker"));
    assert!(cfg.database.is_configured());
}

#[test]
fn sockdir_counts_as_configured() {
    let cfg = parse(
        r#"
        [database]
        sockdir = "/var/run/postgresql"
        "#,
    );
    assert!(cfg.database.is_configured());
    assert!(cfg.database.host.is_none());
}
