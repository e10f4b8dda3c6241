use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use farm_core::control::JobWithStatus;
use farm_core::types::{Job, JobSpec, Pool, ProgressCounts, Worker};
use serde::{Deserialize, Serialize};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/pools", get(list_pools).post(create_pool))
        .route("/api/pools/:pool_id", delete(delete_pool))
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/:job_id", get(get_job).delete(delete_job))
        .route("/api/jobs/:job_id/exclude", post(exclude_job))
        .route("/api/jobs/:job_id/activate", post(activate_job))
        .route("/api/jobs/:job_id/pause", post(pause_job))
        .route("/api/jobs/:job_id/priority", post(set_job_priority))
        .route("/api/jobs/:job_id/move", post(move_job_to_pool))
        .route("/api/jobs/:job_id/reset", post(reset_job))
        .route("/api/jobs/:job_id/progress", get(get_job_progress))
        .route("/api/jobs/:job_id/eye-progress", get(get_job_eye_progress))
        .route("/api/jobs/:job_id/rerender", post(rerender_job))
        .route("/api/workers", get(list_workers))
        .with_state(state)
}

// ── Pools ──

#[derive(Debug, Deserialize)]
struct CreatePoolRequest {
    pool_id: String,
    name: String,
    description: String,
    priority: i32,
}

async fn create_pool(
    State(state): State<AppState>,
    Json(req): Json<CreatePoolRequest>,
) -> Result<Json<Pool>, ApiError> {
    let pool = state
        .api
        .create_pool(req.pool_id, req.name, req.description, req.priority, chrono::Utc::now())
        .await?;
    Ok(Json(pool))
}

async fn list_pools(State(state): State<AppState>) -> Result<Json<Vec<Pool>>, ApiError> {
    Ok(Json(state.api.list_pools().await?))
}

async fn delete_pool(State(state): State<AppState>, Path(pool_id): Path<String>) -> Result<(), ApiError> {
    state.api.delete_pool(&pool_id).await?;
    Ok(())
}

// ── Jobs ──

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    pool_id: Option<String>,
    #[serde(default)]
    include_excluded: bool,
}

async fn submit_job(State(state): State<AppState>, Json(spec): Json<JobSpec>) -> Result<Json<Job>, ApiError> {
    let job = state.api.submit_job(spec, chrono::Utc::now()).await?;
    Ok(Json(job))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobWithStatus>>, ApiError> {
    let rows = state
        .api
        .list_jobs_with_status(q.pool_id.as_deref(), q.include_excluded)
        .await?;
    Ok(Json(rows))
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.api.get_job(&job_id).await?))
}

async fn delete_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    state.api.delete_job(&job_id).await?;
    Ok(())
}

async fn exclude_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    state.api.exclude_job(&job_id).await?;
    Ok(())
}

async fn activate_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    state.api.activate_job(&job_id).await?;
    Ok(())
}

async fn pause_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    state.api.pause_job(&job_id).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SetPriorityRequest {
    priority: i32,
}

async fn set_job_priority(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<SetPriorityRequest>,
) -> Result<(), ApiError> {
    state.api.set_job_priority(&job_id, req.priority).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MoveJobRequest {
    pool_id: String,
}

async fn move_job_to_pool(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<MoveJobRequest>,
) -> Result<(), ApiError> {
    state.api.move_job_to_pool(&job_id, &req.pool_id).await?;
    Ok(())
}

async fn reset_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<(), ApiError> {
    state.api.reset_job(&job_id).await?;
    Ok(())
}

async fn get_job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProgressCounts>, ApiError> {
    Ok(Json(state.api.get_job_progress(&job_id).await?))
}

async fn get_job_eye_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<EyeProgressEntry>>, ApiError> {
    let rows = state.api.get_job_eye_progress(&job_id).await?;
    Ok(Json(rows.into_iter().map(|(eye, counts)| EyeProgressEntry { eye, counts }).collect()))
}

#[derive(Debug, Serialize)]
struct EyeProgressEntry {
    eye: farm_core::types::Eye,
    counts: ProgressCounts,
}

#[derive(Debug, Deserialize)]
struct RerenderRequest {
    report: String,
    new_job_id: String,
}

async fn rerender_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<RerenderRequest>,
) -> Result<Json<Option<Job>>, ApiError> {
    let job = state
        .api
        .rerender_from_report(&job_id, &req.report, req.new_job_id, chrono::Utc::now())
        .await?;
    Ok(Json(job))
}

// ── Workers ──

#[derive(Debug, Deserialize)]
struct ListWorkersQuery {
    pool_id: Option<String>,
}

async fn list_workers(
    State(state): State<AppState>,
    Query(q): Query<ListWorkersQuery>,
) -> Result<Json<Vec<Worker>>, ApiError> {
    Ok(Json(state.api.list_workers(q.pool_id.as_deref()).await?))
}
