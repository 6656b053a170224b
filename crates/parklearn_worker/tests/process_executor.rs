//! ProcessExecutor against small shell scripts.
#![cfg(unix)]

use parklearn_db::ParkDb;
use parklearn_worker::{
    CancellationToken, DetectionExecutor, ExecError, JobMode, JobOrchestrator, JobParameters,
    ProcessExecutor, ProjectLayout,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn args() -> Vec<String> {
    (1..=8).map(|i| format!("arg{}", i)).collect()
}

fn in_secs(secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(secs)
}

#[tokio::test]
async fn test_captures_stdout_and_stderr() {
    let tmp = TempDir::new().unwrap();
    let exe = script(
        tmp.path(),
        "detector",
        "echo \"starting $1 $8\"\necho 'warning: low light' >&2\necho 'JSON_FILE: /x/results/T/r.json'",
    );

    let out = ProcessExecutor::new(&exe)
        .run(&args(), in_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    assert!(out.output.contains("starting arg1 arg8"));
    assert!(out.output.contains("warning: low light"));
    assert!(out.output.contains("JSON_FILE: /x/results/T/r.json"));
    assert!(!out.truncated);
}

#[tokio::test]
async fn test_runs_in_executable_directory() {
    let tmp = TempDir::new().unwrap();
    let bin = tmp.path().join("opencv").join("build");
    fs::create_dir_all(&bin).unwrap();
    let exe = script(&bin, "main", "pwd");

    let out = ProcessExecutor::new(&exe)
        .run(&args(), in_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    let printed = PathBuf::from(out.output.trim());
    assert_eq!(
        printed.canonicalize().unwrap(),
        bin.canonicalize().unwrap()
    );
}

#[tokio::test]
async fn test_non_zero_exit_is_failure_with_output() {
    let tmp = TempDir::new().unwrap();
    let exe = script(tmp.path(), "detector", "echo 'cannot open roi file' >&2\nexit 3");

    let err = ProcessExecutor::new(&exe)
        .run(&args(), in_secs(10), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ExecError::Failed { exit_code, output } => {
            assert_eq!(exit_code, Some(3));
            assert!(output.contains("cannot open roi file"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_binary_is_spawn_error() {
    let tmp = TempDir::new().unwrap();
    let err = ProcessExecutor::new(tmp.path().join("absent"))
        .run(&args(), in_secs(10), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Spawn { .. }));
}

#[tokio::test]
async fn test_deadline_kills_whole_process_group() {
    let tmp = TempDir::new().unwrap();
    let marker = tmp.path().join("late.txt");
    let exe = script(
        tmp.path(),
        "detector",
        &format!(
            "(sleep 1; touch '{}') &\necho started\nsleep 30",
            marker.display()
        ),
    );

    let started = std::time::Instant::now();
    let err = ProcessExecutor::new(&exe)
        .run(
            &args(),
            Instant::now() + Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        ExecError::DeadlineExceeded { output, .. } => assert!(output.contains("started")),
        other => panic!("unexpected error: {other}"),
    }

    // The background helper was in the same group and must not have survived.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_cancel_reports_cancelled() {
    let tmp = TempDir::new().unwrap();
    let exe = script(tmp.path(), "detector", "sleep 30");
    let cancel = CancellationToken::new();

    let trigger = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        }
    };
    let executor = ProcessExecutor::new(&exe);
    let args = args();
    let (result, ()) = tokio::join!(executor.run(&args, in_secs(30), &cancel), trigger);

    assert!(matches!(result, Err(ExecError::Cancelled { .. })));
}

#[tokio::test]
async fn test_output_is_capped() {
    let tmp = TempDir::new().unwrap();
    let exe = script(
        tmp.path(),
        "detector",
        "i=0\nwhile [ $i -lt 200 ]; do echo \"line $i of noisy output\"; i=$((i+1)); done",
    );

    let out = ProcessExecutor::new(&exe)
        .with_max_output_bytes(256)
        .run(&args(), in_secs(10), &CancellationToken::new())
        .await
        .unwrap();

    assert!(out.truncated);
    assert!(out.output.starts_with("line 0 of noisy output\n"));
    assert!(out.output.ends_with("[output truncated at 256 bytes]\n"));
}

/// A detector stand-in that writes its artifact where the output-folder
/// argument says and announces it the way the real one does.
const FAKE_DETECTOR: &str = r#"
out="$8"
mkdir -p "$out"
cat > "$out/result.json" <<EOF
{"project_id": "$4", "total_tests": 1, "results": [
  {"cctv_id": "gate", "learning_data_size": 5, "roi_results": [
    {"roi_id": 1, "foreground_ratio": 0.5},
    {"roi_id": 2, "foreground_ratio": 0.75}
  ]}
]}
EOF
echo "learning with rate $1"
echo "JSON_FILE: $out/result.json"
"#;

#[tokio::test]
async fn test_batch_job_with_real_process() {
    let tmp = TempDir::new().unwrap();
    let layout = ProjectLayout::new(tmp.path().join("shared"), tmp.path().join("live"));
    fs::create_dir_all(layout.learning_images("lot-7", "day1")).unwrap();
    fs::create_dir_all(layout.test_images("lot-7", "day2")).unwrap();
    let roi = layout.roi_file("lot-7", "roi.json");
    fs::create_dir_all(roi.parent().unwrap()).unwrap();
    fs::write(&roi, "[]").unwrap();

    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let exe = script(&bin, "detector", FAKE_DETECTOR);

    let db = ParkDb::open(tmp.path().join("state.sqlite")).await.unwrap();
    let orchestrator = JobOrchestrator::new(
        layout.clone(),
        &exe,
        Arc::new(ProcessExecutor::new(&exe)),
        Arc::new(db.clone()),
    )
    .with_deadline(Duration::from_secs(30));

    let outcome = orchestrator
        .run_batch_job(JobParameters {
            project_id: "lot-7".to_string(),
            learning_rate: 0.25,
            iterations: 3,
            var_threshold: 9.5,
            learning_path: "day1".to_string(),
            roi_path: "roi.json".to_string(),
            mode: JobMode::Batch {
                test_path: "day2".to_string(),
            },
        })
        .await
        .unwrap();

    assert_eq!(outcome.camera_count, 1);
    assert_eq!(outcome.region_count, 2);

    let history = db.list_sessions("lot-7").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].session.name, outcome.session_name);
    assert_eq!(history[0].cctv_ids, vec!["gate"]);
    assert_eq!(history[0].session.var_threshold, 9.5);
}
