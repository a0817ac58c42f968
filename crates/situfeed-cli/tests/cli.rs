use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn workspace_file(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative)
}

fn situfeed() -> Command {
    let mut cmd = Command::cargo_bin("situfeed").unwrap();
    for var in [
        "FEED_URL",
        "MQTT_BROKER",
        "TOPIC_PREFIX",
        "MAPPINGS_PATH",
        "WORKER_THREADS",
        "POLL_INTERVAL_SECONDS",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn");
    cmd
}

#[test]
fn check_mappings_reports_rule_count() {
    situfeed()
        .arg("check-mappings")
        .arg("--path")
        .arg(workspace_file("config/mappings.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("type rules"));
}

#[test]
fn check_mappings_fails_on_missing_file() {
    situfeed()
        .args(["check-mappings", "--path", "/nonexistent/mappings.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn check_mappings_rejects_unknown_keys() {
    let path = std::env::temp_dir().join("situfeed_cli_bad_mappings.yaml");
    std::fs::write(&path, "mappings:\n  Cause:\n    renam: { causeType: type }\n").unwrap();
    situfeed()
        .arg("check-mappings")
        .arg("--path")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid mapping config"));
}

#[test]
fn preview_prints_topic_and_payload_per_record() {
    let assert = situfeed()
        .arg("preview")
        .arg(workspace_file("crates/situfeed-core/tests/fixtures/feed/situations.xml"))
        .arg("--mappings")
        .arg(workspace_file("config/mappings.yaml"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let topics: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.split_once('\t').map(|(topic, _)| topic))
        .collect();
    assert_eq!(
        topics,
        vec![
            "datex/v1/es/madrid/situations/maintenance_works",
            "datex/v1/es/valencia/situations/accident",
            "datex/v1/es/burgos/situations/poor_environment",
            "datex/v1/es/unknown/situations/road_or_carriageway_or_lane_management",
        ]
    );
    assert!(stdout.contains(r#""id":"R-PT-1""#));
}

#[test]
fn preview_honours_topic_prefix() {
    situfeed()
        .arg("preview")
        .arg(workspace_file("crates/situfeed-core/tests/fixtures/feed/situations.xml"))
        .arg("--mappings")
        .arg(workspace_file("config/mappings.yaml"))
        .args(["--topic-prefix", "beacon/v1/es/"])
        .assert()
        .success()
        .stdout(predicate::str::contains("beacon/v1/es/burgos/situations/poor_environment\t"));
}

#[test]
fn run_requires_feed_url() {
    situfeed()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--feed-url"));
}

#[test]
fn run_rejects_invalid_broker_before_starting() {
    situfeed()
        .args([
            "run",
            "--feed-url",
            "http://127.0.0.1:9/feed.xml",
            "--mqtt-broker",
            "tcp://broker:notaport",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid MQTT broker port"));
}
