use crate::error::FarmResult;
use crate::types::*;
use async_trait::async_trait;

/// Persistence trait for all render-farm state.
///
/// The claim scheduler and control API operate exclusively through this
/// trait, enabling pluggable backends (`MemoryStore` for tests, `SqliteStore`
/// for production). Implementations must uphold the invariants of §3 and the
/// concurrency guarantees of §4.1/§4.2: in particular, `claim_frames` must be
/// atomic with respect to every other call on the same backend.
#[async_trait]
pub trait FrameStore: Send + Sync {
    // ── Pools ──

    async fn create_pool(&self, pool: &Pool) -> FarmResult<()>;
    async fn list_pools(&self) -> FarmResult<Vec<Pool>>;
    /// Fails with `InvalidArgument` if `pool_id == "default"`. Otherwise
    /// reassigns the pool's jobs and workers to `default` and removes the
    /// row, as one atomic unit.
    async fn delete_pool(&self, pool_id: &str) -> FarmResult<()>;

    // ── Jobs ──

    /// Inserts the job row and every derived frame row in `pending` state,
    /// as one atomic unit. Fails with `Conflict` on duplicate job id.
    async fn submit_job(&self, spec: JobSpec, now: Timestamp) -> FarmResult<Job>;
    async fn get_job(&self, job_id: &str) -> FarmResult<Option<Job>>;
    async fn list_jobs(&self, pool_id: Option<&str>, include_excluded: bool)
        -> FarmResult<Vec<Job>>;
    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> FarmResult<()>;
    async fn set_job_priority(&self, job_id: &str, priority: i32) -> FarmResult<()>;
    async fn move_job_to_pool(&self, job_id: &str, pool_id: &str) -> FarmResult<()>;
    /// Returns every frame to `pending` and the job to `pending`, resetting
    /// retry counts to zero. Does not touch output files on disk.
    async fn reset_job(&self, job_id: &str) -> FarmResult<()>;
    /// Deletes the job and all its frames, atomically.
    async fn delete_job(&self, job_id: &str) -> FarmResult<()>;

    async fn get_job_progress(&self, job_id: &str) -> FarmResult<ProgressCounts>;
    async fn get_job_eye_progress(
        &self,
        job_id: &str,
    ) -> FarmResult<Vec<(Eye, ProgressCounts)>>;

    // ── Workers ──

    async fn register_worker(&self, worker: &Worker) -> FarmResult<()>;
    async fn update_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        current_job_id: Option<&str>,
        frames_completed: i64,
        now: Timestamp,
    ) -> FarmResult<()>;
    /// Lists workers, overriding the stored status to `Offline` for any
    /// worker whose `last_heartbeat` is older than `heartbeat_timeout` —
    /// callers must see a dead host as offline even if no
    /// `cleanup_offline_workers` sweep has run yet (§3's invariant).
    async fn list_workers(
        &self,
        pool_id: Option<&str>,
        heartbeat_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<Vec<Worker>>;
    async fn pending_frame_count(&self, pool_id: &str) -> FarmResult<i64>;

    /// For every worker whose `last_heartbeat` is older than
    /// `heartbeat_timeout`, reassign any frames they hold back to `pending`
    /// and mark them offline, atomically per worker.
    async fn cleanup_offline_workers(
        &self,
        heartbeat_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<()>;

    // ── The claim scheduler (C3), expressed as store operations ──

    /// The critical operation. Within a single transaction: expire claims
    /// older than `claim_timeout`, select the first eligible pending frame
    /// under the priority/creation-order/frame-index/eye policy, extend the
    /// selection to a contiguous same-job same-eye run capped at
    /// `batch_size`, then lock in the claim. Returns `None` if nothing is
    /// eligible.
    async fn claim_frames(
        &self,
        pool_id: &str,
        worker_id: &str,
        batch_size: i64,
        claim_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<Option<ClaimedRange>>;

    /// Marks a contiguous range `completed` regardless of which worker
    /// currently holds the claim (tolerates reclaim races — see §9's
    /// duplicate-work-after-reclaim note). If the job has zero
    /// non-completed frames afterward, its status is atomically set to
    /// `completed`.
    async fn complete_frames(
        &self,
        job_id: &str,
        start_frame: i64,
        end_frame: i64,
        eye: Eye,
        worker_id: &str,
        now: Timestamp,
    ) -> FarmResult<()>;

    /// Reverts the calling worker's rows in range to `pending` and
    /// increments each row's retry count.
    async fn release_frames(
        &self,
        job_id: &str,
        start_frame: i64,
        end_frame: i64,
        eye: Eye,
        worker_id: &str,
    ) -> FarmResult<()>;
}
