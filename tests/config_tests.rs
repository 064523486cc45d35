//! Configuration layering, end to end into a node.

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use drone_dispatch::config::{ConfigError, ConfigOrigin};
use drone_dispatch::sim::{FlatEarth, SimAircraft, SimBroker};
use drone_dispatch::{Collaborators, Coordinates, DroneNode, EffectiveConfig, MissionControl};

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_host_file_then_explicit_file_then_cli() {
    let dir = TempDir::new().unwrap();
    let host = write(
        &dir,
        "host.toml",
        r#"
drone_id = "host-drone"

[scheduler]
cruise_altitude_m = 20.0

[scheduler.busy_retry]
max_attempts = 5
"#,
    );
    let file = write(
        &dir,
        "fleet.toml",
        r#"
[scheduler.busy_retry]
initial_delay_ms = 250
max_delay_ms = 2000

[mission]
hover_seconds = 3.0
"#,
    );
    let cli = serde_json::json!({"drone_id": "cli-drone"});

    let effective = EffectiveConfig::build(Some(&host), Some(&file), Some(cli)).unwrap();
    let origins: Vec<_> = effective.sources.iter().map(|s| s.origin.clone()).collect();
    assert_eq!(
        origins,
        vec![
            ConfigOrigin::Builtin,
            ConfigOrigin::Host,
            ConfigOrigin::File,
            ConfigOrigin::Cli
        ]
    );

    let settings = effective.settings().unwrap();
    assert_eq!(settings.drone_id.as_deref(), Some("cli-drone"));
    assert_eq!(settings.scheduler.cruise_altitude_m, 20.0);
    assert_eq!(settings.scheduler.survey_altitude_m, 6.0);
    assert_eq!(settings.scheduler.busy_retry.max_attempts, Some(5));
    assert_eq!(settings.scheduler.busy_retry.initial_delay_ms, 250);
    assert_eq!(settings.scheduler.busy_retry.max_delay_ms, 2000);
    assert_eq!(settings.scheduler.reject_retry.initial_delay_ms, 1000);
    assert_eq!(settings.mission.hover_seconds, 3.0);
}

#[test]
fn test_digest_changes_with_contents() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.toml", "drone_id = \"a\"\n");
    let b = write(&dir, "b.toml", "drone_id = \"b\"\n");

    let digest = |path: &std::path::Path| {
        EffectiveConfig::build(None, Some(path), None).unwrap().sources[1]
            .digest
            .clone()
            .unwrap()
    };
    assert_ne!(digest(a.as_path()), digest(b.as_path()));
    assert_eq!(digest(a.as_path()), digest(a.as_path()));
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let bad = write(&dir, "bad.toml", "[scheduler\ncruise = ");
    let err = EffectiveConfig::build(None, Some(&bad), None).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_effective_config_serializes_with_provenance() {
    let dir = TempDir::new().unwrap();
    let file = write(&dir, "fleet.toml", "drone_id = \"d\"\n");
    let effective = EffectiveConfig::build(None, Some(&file), None).unwrap();

    let json: serde_json::Value = serde_json::from_str(&effective.to_json().unwrap()).unwrap();
    assert_eq!(json["schema_id"], "drone-dispatch/effective_config@1");
    assert_eq!(json["sources"][1]["origin"], "file");
    assert_eq!(json["config"]["drone_id"], "d");
}

#[tokio::test]
async fn test_node_takes_drone_id_from_config() {
    let cli = serde_json::json!({"drone_id": "drone42"});
    let settings = EffectiveConfig::build(None, None, Some(cli))
        .unwrap()
        .settings()
        .unwrap();

    let aircraft = Arc::new(SimAircraft::new(Coordinates::new(46.0, 11.0)));
    let node = DroneNode::assemble(
        &settings,
        Collaborators {
            aircraft: aircraft.clone(),
            mission_control: Some(aircraft as Arc<dyn MissionControl>),
            geo: Arc::new(FlatEarth),
            feed: Arc::new(SimBroker::default()),
            planner: None,
            log: None,
        },
    );
    assert_eq!(node.drone_id(), "drone42");
    assert_eq!(node.coordinator().drone_id(), "drone42");

    let handle = node.start();
    assert_eq!(handle.drone_id(), "drone42");
    handle.shutdown().await;
}
