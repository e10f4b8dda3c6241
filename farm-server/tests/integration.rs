//! HTTP-level integration tests: exercise the control API end to end through
//! the router, against a real file-backed SQLite store (no mocking of the
//! store itself).

use std::sync::Arc;

use axum::body::Body;
use farm_core::config::FarmConfig;
use farm_core::control::FarmControlApi;
use farm_core::store::FrameStore;
use farm_core::store_sqlite::SqliteStore;
use farm_server::routes::router;
use farm_server::state::AppState;
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

/// Each test gets its own throwaway SQLite file; the tempdir is leaked into
/// the returned router's closure scope implicitly via `Arc`, and cleaned up
/// when the process exits (these are short-lived test processes).
async fn test_app() -> axum::Router {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("farm-test.db");
    let store: Arc<dyn FrameStore> = Arc::new(SqliteStore::connect(&db_path).await.unwrap());
    std::mem::forget(dir);
    let api = Arc::new(FarmControlApi::new(store, std::time::Duration::from_secs(300)));
    router(AppState { api })
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn sample_job_spec(job_id: &str, output_dir: &str) -> Value {
    json!({
        "job_id": job_id,
        "pool_id": "default",
        "clip_path": "shots/A001_C001.braw",
        "output_dir": output_dir,
        "start_frame": 0,
        "end_frame": 99,
        "eyes": ["left"],
        "format": "exr",
        "separate_folders": false,
        "use_aces": true,
        "color_input_space": "BMDFilm WideGamut Gen5",
        "color_output_space": "ACEScg",
        "use_stmap": false,
        "stmap_path": "",
        "priority": 50,
        "created_by": "tester"
    })
}

#[tokio::test]
async fn submit_then_fetch_job_round_trips() {
    let app = test_app().await;
    let dir = tempfile::tempdir().unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(sample_job_spec("j1", dir.path().to_str().unwrap()).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    assert_eq!(created["job_id"], "j1");
    assert_eq!(created["status"], "pending");

    let resp = app
        .oneshot(Request::builder().uri("/api/jobs/j1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched = body_json(resp).await;
    assert_eq!(fetched["start_frame"], 0);
    assert_eq!(fetched["end_frame"], 99);
}

#[tokio::test]
async fn duplicate_job_id_returns_conflict() {
    let app = test_app().await;
    let dir = tempfile::tempdir().unwrap();
    let spec = sample_job_spec("dup", dir.path().to_str().unwrap());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(spec.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(spec.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn missing_job_returns_not_found() {
    let app = test_app().await;
    let resp = app
        .oneshot(Request::builder().uri("/api/jobs/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn exclude_then_activate_round_trip_over_http() {
    let app = test_app().await;
    let dir = tempfile::tempdir().unwrap();

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(sample_job_spec("j2", dir.path().to_str().unwrap()).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/api/jobs/j2/exclude").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/api/jobs?include_excluded=true").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let rows = body_json(resp).await;
    let row = rows.as_array().unwrap().iter().find(|r| r["job"]["job_id"] == "j2").unwrap();
    assert_eq!(row["computed_status"], "excluded");

    app.clone()
        .oneshot(Request::builder().method("POST").uri("/api/jobs/j2/activate").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let resp = app
        .oneshot(Request::builder().uri("/api/jobs?include_excluded=true").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let rows = body_json(resp).await;
    let row = rows.as_array().unwrap().iter().find(|r| r["job"]["job_id"] == "j2").unwrap();
    assert_eq!(row["computed_status"], "pending");
}

#[tokio::test]
async fn rerender_hook_creates_a_new_job_over_the_union_range() {
    let app = test_app().await;
    let dir = tempfile::tempdir().unwrap();

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(sample_job_spec("j3", dir.path().to_str().unwrap()).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs/j3/rerender")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "report": "RE-RENDER_FRAMES:\n7, 8, 40\n", "new_job_id": "j3-rerender-1" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let new_job = body_json(resp).await;
    assert_eq!(new_job["start_frame"], 7);
    assert_eq!(new_job["end_frame"], 40);
    assert_eq!(new_job["priority"], 60);
}

#[tokio::test]
async fn pool_lifecycle_create_list_delete() {
    let app = test_app().await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/pools")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "pool_id": "gpu-farm", "name": "GPU Farm", "description": "", "priority": 50 }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/api/pools").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let pools = body_json(resp).await;
    assert!(pools.as_array().unwrap().iter().any(|p| p["pool_id"] == "gpu-farm"));

    let resp = app
        .oneshot(Request::builder().method("DELETE").uri("/api/pools/gpu-farm").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn cannot_delete_default_pool_returns_bad_request() {
    let app = test_app().await;
    let resp = app
        .oneshot(Request::builder().method("DELETE").uri("/api/pools/default").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_progress_reflects_claimed_frames() {
    let app = test_app().await;
    let dir = tempfile::tempdir().unwrap();

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header("content-type", "application/json")
                .body(Body::from(sample_job_spec("j4", dir.path().to_str().unwrap()).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .oneshot(Request::builder().uri("/api/jobs/j4/progress").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let progress = body_json(resp).await;
    assert_eq!(progress["pending"], 100);
    assert_eq!(progress["completed"], 0);
}

#[tokio::test]
async fn health_check_config_defaults_load() {
    // Sanity check that the default config this binary would boot with is
    // well-formed, independent of the HTTP surface above.
    let cfg = FarmConfig::default();
    assert_eq!(cfg.worker.pool_id, "default");
}
