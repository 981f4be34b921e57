//! Tests for configuration loading and defaults.

use std::path::PathBuf;
use vigil::config::{Config, Discipline, Linger, TriggerMode};

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("vigil-cfg-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_defaults_without_file() {
    let cfg = Config::load(None).unwrap();
    assert_eq!(cfg.port, 9006);
    assert_eq!(cfg.workers, 8);
    assert_eq!(cfg.discipline, Discipline::Proactor);
    assert_eq!(cfg.listener_trigger, TriggerMode::Level);
    assert_eq!(cfg.conn_trigger, TriggerMode::Level);
    assert_eq!(cfg.linger, Linger::Off);
    assert_eq!(cfg.timeslot_secs, 5);
    assert_eq!(cfg.landing_page, "/judge.html");
    assert!(cfg.credentials.is_none());
}

#[test]
fn test_yaml_overrides_and_defaults_mix() {
    let path = write_temp(
        "mix.yaml",
        r#"
port: 8080
discipline: reactor
conn_trigger: edge
linger: !wait 5
workers: 4
doc_root: /srv/www
"#,
    );
    let cfg = Config::load(Some(&path)).unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.discipline, Discipline::Reactor);
    assert_eq!(cfg.conn_trigger, TriggerMode::Edge);
    assert_eq!(cfg.linger, Linger::Wait(5));
    assert_eq!(cfg.workers, 4);
    assert_eq!(cfg.doc_root, PathBuf::from("/srv/www"));
    // Unspecified keys keep their defaults.
    assert_eq!(cfg.listener_trigger, TriggerMode::Level);
    assert_eq!(cfg.timeslot_secs, 5);
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_unknown_key_is_rejected() {
    let path = write_temp("unknown.yaml", "prot: 8080\n");
    assert!(Config::load(Some(&path)).is_err());
    let _ = std::fs::remove_file(path);
}

#[test]
fn test_missing_file_is_an_error() {
    let path = PathBuf::from("/nonexistent/vigil.yaml");
    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_listen_env_overrides_port() {
    unsafe {
        std::env::set_var("LISTEN", "127.0.0.1:3000");
    }
    let cfg = Config::load(None).unwrap();
    assert_eq!(cfg.listen_addr(), "127.0.0.1:3000");
    unsafe {
        std::env::remove_var("LISTEN");
    }
    assert_eq!(cfg.listen_addr(), "0.0.0.0:9006");
}
