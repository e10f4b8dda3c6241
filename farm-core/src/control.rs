use crate::error::{FarmError, FarmResult};
use crate::rerender;
use crate::store::FrameStore;
use crate::types::*;
use std::sync::Arc;

/// Top-level facade over a `FrameStore`. The control API (C5) and the
/// re-render hook delegate to this; the worker runtime (C4) talks to the
/// store directly for `claim_frames`/`complete_frames`/`release_frames`
/// since those are on the hot path and don't need the computed-status logic
/// below.
pub struct FarmControlApi {
    store: Arc<dyn FrameStore>,
    /// Mirrors `TimeoutConfig::heartbeat_timeout_secs`: a worker silent for
    /// longer than this is reported offline by `list_workers` even if no
    /// `cleanup_offline_workers` sweep has touched its row yet.
    heartbeat_timeout: std::time::Duration,
}

/// One row of `list_jobs_with_status`: the stored job plus a status that may
/// diverge from it when frame rows show progress the stored status hasn't
/// caught up with.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobWithStatus {
    pub job: Job,
    pub computed_status: ComputedJobStatus,
    pub completed_count: i64,
    pub total_count: i64,
}

impl FarmControlApi {
    pub fn new(store: Arc<dyn FrameStore>, heartbeat_timeout: std::time::Duration) -> Self {
        Self { store, heartbeat_timeout }
    }

    pub fn store(&self) -> &Arc<dyn FrameStore> {
        &self.store
    }

    // ── Pools ──

    pub async fn create_pool(&self, pool_id: String, name: String, description: String, priority: i32, now: Timestamp) -> FarmResult<Pool> {
        if !(0..=100).contains(&priority) {
            return Err(FarmError::InvalidArgument(format!(
                "priority {priority} out of range [0,100]"
            )));
        }
        let pool = Pool {
            pool_id,
            name,
            description,
            priority,
            created_at: now,
        };
        self.store.create_pool(&pool).await?;
        Ok(pool)
    }

    pub async fn list_pools(&self) -> FarmResult<Vec<Pool>> {
        self.store.list_pools().await
    }

    pub async fn delete_pool(&self, pool_id: &str) -> FarmResult<()> {
        self.store.delete_pool(pool_id).await
    }

    // ── Jobs ──

    pub async fn submit_job(&self, spec: JobSpec, now: Timestamp) -> FarmResult<Job> {
        self.store.submit_job(spec, now).await
    }

    pub async fn get_job(&self, job_id: &str) -> FarmResult<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| FarmError::NotFound(format!("job not found: {job_id}")))
    }

    /// Lists jobs with a computed status: stored `excluded`/`paused` wins
    /// outright; otherwise fully-completed beats any-progress beats pending.
    pub async fn list_jobs_with_status(
        &self,
        pool_id: Option<&str>,
        include_excluded: bool,
    ) -> FarmResult<Vec<JobWithStatus>> {
        let jobs = self.store.list_jobs(pool_id, include_excluded).await?;
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            let progress = self.store.get_job_progress(&job.job_id).await?;
            let total = progress.total();
            let computed_status = match job.status {
                JobStatus::Excluded => ComputedJobStatus::Excluded,
                JobStatus::Paused => ComputedJobStatus::Paused,
                _ if total > 0 && progress.completed == total => ComputedJobStatus::Completed,
                _ if progress.completed > 0 || progress.claimed > 0 => ComputedJobStatus::InProgress,
                _ => ComputedJobStatus::Pending,
            };
            out.push(JobWithStatus {
                completed_count: progress.completed,
                total_count: total,
                computed_status,
                job,
            });
        }
        Ok(out)
    }

    pub async fn exclude_job(&self, job_id: &str) -> FarmResult<()> {
        self.store.set_job_status(job_id, JobStatus::Excluded).await
    }

    pub async fn activate_job(&self, job_id: &str) -> FarmResult<()> {
        self.store.set_job_status(job_id, JobStatus::Pending).await
    }

    pub async fn pause_job(&self, job_id: &str) -> FarmResult<()> {
        self.store.set_job_status(job_id, JobStatus::Paused).await
    }

    pub async fn set_job_priority(&self, job_id: &str, priority: i32) -> FarmResult<()> {
        self.store.set_job_priority(job_id, priority).await
    }

    pub async fn move_job_to_pool(&self, job_id: &str, pool_id: &str) -> FarmResult<()> {
        self.store.move_job_to_pool(job_id, pool_id).await
    }

    pub async fn reset_job(&self, job_id: &str) -> FarmResult<()> {
        self.store.reset_job(job_id).await
    }

    pub async fn delete_job(&self, job_id: &str) -> FarmResult<()> {
        self.store.delete_job(job_id).await
    }

    pub async fn get_job_progress(&self, job_id: &str) -> FarmResult<ProgressCounts> {
        self.store.get_job_progress(job_id).await
    }

    pub async fn get_job_eye_progress(&self, job_id: &str) -> FarmResult<Vec<(Eye, ProgressCounts)>> {
        self.store.get_job_eye_progress(job_id).await
    }

    // ── Workers ──

    pub async fn list_workers(&self, pool_id: Option<&str>) -> FarmResult<Vec<Worker>> {
        self.store
            .list_workers(pool_id, self.heartbeat_timeout, chrono::Utc::now())
            .await
    }

    // ── Re-render hook ──

    /// Parses a checker report, groups the bad frames, and submits a new
    /// job spanning their union range at a raised priority. Returns `None`
    /// if the report names no bad frames. The caller supplies `new_job_id`
    /// since id assignment policy (e.g. `{original}-rerender-{n}`) lives
    /// outside this library.
    pub async fn rerender_from_report(
        &self,
        original_job_id: &str,
        report: &str,
        new_job_id: String,
        now: Timestamp,
    ) -> FarmResult<Option<Job>> {
        let original = self.get_job(original_job_id).await?;
        let error_frames = rerender::parse_report(report);
        if error_frames.is_empty() {
            return Ok(None);
        }
        let Some(spec) = rerender::build_rerender_spec(&original, &error_frames, new_job_id) else {
            return Ok(None);
        };
        let job = self.store.submit_job(spec, now).await?;
        Ok(Some(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use std::collections::HashSet;

    fn spec(job_id: &str, start: i64, end: i64) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            pool_id: DEFAULT_POOL_ID.to_string(),
            clip_path: "A.braw".to_string(),
            output_dir: "/out".to_string(),
            start_frame: start,
            end_frame: end,
            eyes: HashSet::from([Eye::Left]),
            format: OutputFormat::Exr,
            separate_folders: false,
            use_aces: true,
            color_input_space: "BMDFilm WideGamut Gen5".to_string(),
            color_output_space: "ACEScg".to_string(),
            use_stmap: false,
            stmap_path: String::new(),
            priority: 90,
            created_by: "tester".to_string(),
        }
    }

    fn api() -> FarmControlApi {
        FarmControlApi::new(Arc::new(MemoryStore::new()), std::time::Duration::from_secs(300))
    }

    #[tokio::test]
    async fn exclude_then_activate_round_trip() {
        let api = api();
        let now = chrono::Utc::now();
        api.submit_job(spec("j1", 0, 9), now).await.unwrap();
        api.exclude_job("j1").await.unwrap();

        let rows = api.list_jobs_with_status(None, true).await.unwrap();
        let row = rows.iter().find(|r| r.job.job_id == "j1").unwrap();
        assert_eq!(row.computed_status, ComputedJobStatus::Excluded);

        let hidden = api.list_jobs_with_status(None, false).await.unwrap();
        assert!(hidden.iter().all(|r| r.job.job_id != "j1"));

        api.activate_job("j1").await.unwrap();
        let rows = api.list_jobs_with_status(None, true).await.unwrap();
        let row = rows.iter().find(|r| r.job.job_id == "j1").unwrap();
        assert_eq!(row.computed_status, ComputedJobStatus::Pending);
    }

    #[tokio::test]
    async fn computed_status_reflects_partial_progress_before_stored_status_catches_up() {
        let api = api();
        let now = chrono::Utc::now();
        api.submit_job(spec("j1", 0, 9), now).await.unwrap();
        api.store()
            .claim_frames(DEFAULT_POOL_ID, "w1", 3, std::time::Duration::from_secs(180), now)
            .await
            .unwrap();

        let rows = api.list_jobs_with_status(None, false).await.unwrap();
        let row = rows.iter().find(|r| r.job.job_id == "j1").unwrap();
        assert_eq!(row.computed_status, ComputedJobStatus::InProgress);
    }

    #[tokio::test]
    async fn rerender_hook_creates_job_over_union_range_with_raised_priority() {
        let api = api();
        let now = chrono::Utc::now();
        api.submit_job(spec("j1", 0, 99), now).await.unwrap();

        let report = "RE-RENDER_FRAMES:\n7, 8, 40\n";
        let new_job = api
            .rerender_from_report("j1", report, "j1-rerender-1".to_string(), now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(new_job.start_frame, 7);
        assert_eq!(new_job.end_frame, 40);
        assert_eq!(new_job.priority, 100);
    }

    #[tokio::test]
    async fn list_workers_reports_stale_heartbeat_as_offline_at_read_time() {
        let store: Arc<dyn FrameStore> = Arc::new(MemoryStore::new());
        let api = FarmControlApi::new(store.clone(), std::time::Duration::from_secs(300));
        store
            .register_worker(&Worker {
                worker_id: "w1".to_string(),
                pool_id: DEFAULT_POOL_ID.to_string(),
                hostname: "render01".to_string(),
                ip: "10.0.0.1".to_string(),
                status: WorkerStatus::Active,
                current_job_id: None,
                frames_completed: 0,
                last_heartbeat: chrono::Utc::now() - chrono::Duration::hours(1),
            })
            .await
            .unwrap();

        // No cleanup_offline_workers sweep ran; the override must still show
        // up on a plain list call.
        let workers = api.list_workers(None).await.unwrap();
        assert_eq!(workers[0].status, WorkerStatus::Offline);
    }

    #[tokio::test]
    async fn rerender_hook_is_a_noop_for_a_clean_report() {
        let api = api();
        let now = chrono::Utc::now();
        api.submit_job(spec("j1", 0, 99), now).await.unwrap();
        let result = api
            .rerender_from_report("j1", "all frames ok", "j1-rerender-1".to_string(), now)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
