//! Runs the built `parklearn` binary against a throwaway home directory.

use parklearn_db::{NewCctvResult, NewExperimentSession, NewRoiResult, ParkDb};
use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const OVERRIDE_VARS: &[&str] = &[
    "PARKLEARN_SHARED_ROOT",
    "PARKLEARN_EXECUTABLE",
    "PARKLEARN_STATE_STORE",
    "PARKLEARN_DEADLINE_SECS",
];

fn parklearn(home: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_parklearn"));
    cmd.env("PARKLEARN_HOME", home).env_remove("RUST_LOG");
    for var in OVERRIDE_VARS {
        cmd.env_remove(var);
    }
    cmd.args(args).output().expect("failed to run parklearn")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "parklearn failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

#[test]
fn test_config_json_reports_resolved_paths() {
    let home = TempDir::new().unwrap();
    std::fs::write(
        home.path().join("parklearn.toml"),
        "shared_root = \"data/shared\"\ndeadline_secs = 42\n",
    )
    .unwrap();

    let value = stdout_json(&parklearn(home.path(), &["config", "--json"]));

    assert_eq!(value["home"], home.path().to_string_lossy().to_string());
    assert_eq!(
        value["shared_root"]["path"],
        home.path().join("data").join("shared").to_string_lossy().to_string()
    );
    assert_eq!(value["config_file"]["exists"], true);
    assert_eq!(value["deadline_secs"], 42);
    assert_eq!(value["state_store"]["exists"], false);
}

#[test]
fn test_deadline_flag_overrides_config_file() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("parklearn.toml"), "deadline_secs = 42\n").unwrap();

    let value = stdout_json(&parklearn(
        home.path(),
        &["config", "--json", "--deadline-secs", "7"],
    ));
    assert_eq!(value["deadline_secs"], 7);
}

#[test]
fn test_history_of_fresh_home_is_empty() {
    let home = TempDir::new().unwrap();
    let value = stdout_json(&parklearn(home.path(), &["history", "lot-7", "--json"]));
    assert_eq!(value, Value::Array(Vec::new()));
}

#[tokio::test]
async fn test_history_and_session_read_stored_results() {
    let home = TempDir::new().unwrap();
    let db = ParkDb::open(home.path().join("state.sqlite")).await.unwrap();
    db.insert_session_tree(
        &NewExperimentSession {
            project_id: "lot-7".to_string(),
            var_threshold: 16.0,
            learning_rate: 0.01,
            iterations: 500,
            learning_path: "day1".to_string(),
            test_image_path: "day2".to_string(),
            roi_path: "roi.json".to_string(),
            name: "20240501093000".to_string(),
        },
        &[NewCctvResult {
            cctv_id: "gate".to_string(),
            learning_data_size: 40,
            rois: vec![
                NewRoiResult { roi_id: 1, rate: 0.25 },
                NewRoiResult { roi_id: 2, rate: 0.75 },
            ],
        }],
    )
    .await
    .unwrap();
    db.close().await;

    let history = stdout_json(&parklearn(home.path(), &["history", "lot-7", "--json"]));
    let rows = history.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "20240501093000");
    assert_eq!(rows[0]["cctv_ids"][0], "gate");
    let result_dir = rows[0]["result_dir"].as_str().unwrap();
    assert!(Path::new(result_dir).ends_with("shared/lot-7/results/20240501093000"));

    let session = stdout_json(&parklearn(
        home.path(),
        &["session", "lot-7", "20240501093000", "--json"],
    ));
    assert_eq!(session["cameras"][0]["cctv_id"], "gate");
    assert_eq!(session["cameras"][0]["rois"].as_array().unwrap().len(), 2);

    let other = stdout_json(&parklearn(home.path(), &["history", "lot-8", "--json"]));
    assert_eq!(other, Value::Array(Vec::new()));
}

#[test]
fn test_unknown_session_fails_with_hint() {
    let home = TempDir::new().unwrap();
    let output = parklearn(home.path(), &["session", "lot-7", "nope"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Session not found: nope"));
    assert!(stderr.contains("parklearn history lot-7"));
}

#[test]
fn test_batch_with_missing_inputs_reports_validating_stage() {
    let home = TempDir::new().unwrap();
    let output = parklearn(
        home.path(),
        &[
            "batch", "lot-7", "--rate", "0.01", "--iterations", "10", "--threshold", "16",
            "--learning", "day1", "--test", "day2", "--roi", "roi.json",
        ],
    );

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
    assert!(stderr.contains("Stage: validating"), "stderr: {}", stderr);
}

#[test]
fn test_batch_json_error_is_json() {
    let home = TempDir::new().unwrap();
    let output = parklearn(
        home.path(),
        &[
            "batch", "lot-7", "--rate", "2.0", "--iterations", "10", "--threshold", "16",
            "--learning", "day1", "--test", "day2", "--roi", "roi.json", "--json",
        ],
    );

    assert!(!output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["error"].as_str().unwrap().contains("invalid parameters"));
    assert_eq!(value["context"], "Stage: validating");
}
