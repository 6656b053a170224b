use parklearn_db::{DbError, NewCctvResult, NewExperimentSession, NewRoiResult, ParkDb, ResultLevel};
use tempfile::TempDir;

fn session(name: &str) -> NewExperimentSession {
    NewExperimentSession {
        project_id: "lot-7".to_string(),
        var_threshold: 16.0,
        learning_rate: 0.01,
        iterations: 500,
        learning_path: "day1".to_string(),
        test_image_path: "day2".to_string(),
        roi_path: "roi.json".to_string(),
        name: name.to_string(),
    }
}

fn camera(id: &str, roi_ids: &[i64]) -> NewCctvResult {
    NewCctvResult {
        cctv_id: id.to_string(),
        learning_data_size: 40,
        rois: roi_ids
            .iter()
            .map(|&roi_id| NewRoiResult {
                roi_id,
                rate: roi_id as f64 / 10.0,
            })
            .collect(),
    }
}

async fn open(tmp: &TempDir) -> ParkDb {
    ParkDb::open(tmp.path().join("state.sqlite")).await.unwrap()
}

async fn count(db: &ParkDb, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    sqlx::query_scalar(&sql).fetch_one(db.pool()).await.unwrap()
}

#[tokio::test]
async fn test_tree_insert_links_parents() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp).await;

    let inserted = db
        .insert_session_tree(
            &session("20240101120000"),
            &[camera("camA", &[1, 2, 3]), camera("camB", &[1])],
        )
        .await
        .unwrap();

    assert_eq!(inserted.cctv_result_ids.len(), 2);
    assert_eq!(inserted.roi_result_count, 4);
    assert_eq!(count(&db, "experiment_sessions").await, 1);
    assert_eq!(count(&db, "cctv_results").await, 2);
    assert_eq!(count(&db, "roi_results").await, 4);

    let detail = db
        .get_session_by_name("lot-7", "20240101120000")
        .await
        .unwrap()
        .expect("session should exist");

    assert_eq!(detail.session.id, inserted.session_id);
    assert_eq!(detail.session.iterations, 500);
    assert_eq!(detail.cameras.len(), 2);

    let cam_a = &detail.cameras[0];
    assert_eq!(cam_a.result.cctv_id, "camA");
    assert_eq!(cam_a.result.experiment_session_id, inserted.session_id);
    assert_eq!(cam_a.rois.len(), 3);
    assert!(cam_a
        .rois
        .iter()
        .all(|r| r.cctv_result_id == inserted.cctv_result_ids[0]));

    let cam_b = &detail.cameras[1];
    assert_eq!(cam_b.result.cctv_id, "camB");
    assert_eq!(cam_b.rois.len(), 1);
    assert_eq!(cam_b.rois[0].cctv_result_id, inserted.cctv_result_ids[1]);
}

#[tokio::test]
async fn test_region_failure_rolls_back_whole_tree() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp).await;

    sqlx::query(
        r#"
        CREATE TRIGGER reject_roi_99 BEFORE INSERT ON roi_results
        WHEN NEW.roi_id = 99
        BEGIN
            SELECT RAISE(ABORT, 'rejected region');
        END
        "#,
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = db
        .insert_session_tree(
            &session("20240101120000"),
            &[camera("camA", &[1, 2]), camera("camB", &[5, 99])],
        )
        .await
        .unwrap_err();

    match err {
        DbError::Insert { level, index, .. } => {
            assert_eq!(level, ResultLevel::Region);
            assert_eq!(index, 1);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(count(&db, "experiment_sessions").await, 0);
    assert_eq!(count(&db, "cctv_results").await, 0);
    assert_eq!(count(&db, "roi_results").await, 0);
}

#[tokio::test]
async fn test_camera_failure_reports_camera_index() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp).await;

    sqlx::query(
        r#"
        CREATE TRIGGER reject_cam BEFORE INSERT ON cctv_results
        WHEN NEW.cctv_id = 'broken'
        BEGIN
            SELECT RAISE(ABORT, 'rejected camera');
        END
        "#,
    )
    .execute(db.pool())
    .await
    .unwrap();

    let err = db
        .insert_session_tree(
            &session("s1"),
            &[camera("ok", &[1]), camera("ok2", &[]), camera("broken", &[1])],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DbError::Insert {
            level: ResultLevel::Camera,
            index: 2,
            ..
        }
    ));
    assert_eq!(count(&db, "experiment_sessions").await, 0);
}

#[tokio::test]
async fn test_history_is_newest_first_per_project() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp).await;

    db.insert_session_tree(&session("first"), &[camera("camA", &[1])])
        .await
        .unwrap();
    db.insert_session_tree(
        &session("second"),
        &[camera("camB", &[1]), camera("camC", &[])],
    )
    .await
    .unwrap();

    let mut other = session("elsewhere");
    other.project_id = "lot-8".to_string();
    db.insert_session_tree(&other, &[]).await.unwrap();

    let history = db.list_sessions("lot-7").await.unwrap();
    let names: Vec<_> = history.iter().map(|h| h.session.name.as_str()).collect();
    assert_eq!(names, vec!["second", "first"]);
    assert_eq!(history[0].cctv_ids, vec!["camB", "camC"]);
    assert_eq!(history[1].cctv_ids, vec!["camA"]);

    assert_eq!(db.list_sessions("lot-8").await.unwrap().len(), 1);
    assert!(db.list_sessions("lot-9").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_session_name_is_none() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp).await;

    assert!(db
        .get_session_by_name("lot-7", "missing")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_empty_tree_is_just_a_session() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp).await;

    let inserted = db.insert_session_tree(&session("bare"), &[]).await.unwrap();
    assert!(inserted.cctv_result_ids.is_empty());
    assert_eq!(inserted.roi_result_count, 0);

    let stored = db.get_session(inserted.session_id).await.unwrap().unwrap();
    assert_eq!(stored.name, "bare");
    assert_eq!(stored.roi_path, "roi.json");
}
