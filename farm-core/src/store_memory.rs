use crate::error::{FarmError, FarmResult};
use crate::store::FrameStore;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Inner {
    pools: HashMap<String, Pool>,
    jobs: HashMap<String, Job>,
    /// Insertion order, used as the "job creation order" tie-break alongside
    /// `created_at` (two jobs can share a timestamp under test clocks).
    job_seq: HashMap<String, u64>,
    next_seq: u64,
    frames: HashMap<(String, i64, Eye), Frame>,
    workers: HashMap<String, Worker>,
}

/// In-memory implementation of `FrameStore`, for unit tests and as a
/// lightweight non-durable backend. Not a production substitute for
/// `SqliteStore` — nothing here survives a process restart.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            DEFAULT_POOL_ID.to_string(),
            Pool::default_pool(chrono::Utc::now()),
        );
        MemoryStore {
            inner: RwLock::new(Inner {
                pools,
                jobs: HashMap::new(),
                job_seq: HashMap::new(),
                next_seq: 0,
                frames: HashMap::new(),
                workers: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn progress_of<'a>(frames: impl Iterator<Item = &'a Frame>) -> ProgressCounts {
    let mut counts = ProgressCounts::default();
    for f in frames {
        match f.status {
            FrameStatus::Pending => counts.pending += 1,
            FrameStatus::Claimed => counts.claimed += 1,
            FrameStatus::Completed => counts.completed += 1,
            FrameStatus::Failed => counts.failed += 1,
        }
    }
    counts
}

#[async_trait]
impl FrameStore for MemoryStore {
    // ── Pools ──

    async fn create_pool(&self, pool: &Pool) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        if w.pools.contains_key(&pool.pool_id) {
            return Err(FarmError::Conflict(format!(
                "pool already exists: {}",
                pool.pool_id
            )));
        }
        w.pools.insert(pool.pool_id.clone(), pool.clone());
        Ok(())
    }

    async fn list_pools(&self) -> FarmResult<Vec<Pool>> {
        let r = self.inner.read().await;
        let mut pools: Vec<Pool> = r.pools.values().cloned().collect();
        pools.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.pool_id.cmp(&b.pool_id)));
        Ok(pools)
    }

    async fn delete_pool(&self, pool_id: &str) -> FarmResult<()> {
        if pool_id == DEFAULT_POOL_ID {
            return Err(FarmError::InvalidArgument(
                "cannot delete the default pool".to_string(),
            ));
        }
        let mut w = self.inner.write().await;
        if !w.pools.contains_key(pool_id) {
            return Err(FarmError::NotFound(format!("pool not found: {pool_id}")));
        }
        for job in w.jobs.values_mut() {
            if job.pool_id == pool_id {
                job.pool_id = DEFAULT_POOL_ID.to_string();
            }
        }
        for worker in w.workers.values_mut() {
            if worker.pool_id == pool_id {
                worker.pool_id = DEFAULT_POOL_ID.to_string();
            }
        }
        w.pools.remove(pool_id);
        Ok(())
    }

    // ── Jobs ──

    async fn submit_job(&self, spec: JobSpec, now: Timestamp) -> FarmResult<Job> {
        spec.validate()?;
        let mut w = self.inner.write().await;
        if w.jobs.contains_key(&spec.job_id) {
            return Err(FarmError::Conflict(format!(
                "job already exists: {}",
                spec.job_id
            )));
        }
        let job_id = spec.job_id.clone();
        let job = Job::from_spec(spec, now);

        for frame_idx in job.start_frame..=job.end_frame {
            for &eye in &job.eyes {
                w.frames.insert(
                    (job_id.clone(), frame_idx, eye),
                    Frame {
                        job_id: job_id.clone(),
                        frame_idx,
                        eye,
                        status: FrameStatus::Pending,
                        worker_id: None,
                        claimed_at: None,
                        completed_at: None,
                        retry_count: 0,
                    },
                );
            }
        }

        let seq = w.next_seq;
        w.next_seq += 1;
        w.job_seq.insert(job_id.clone(), seq);
        w.jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> FarmResult<Option<Job>> {
        let r = self.inner.read().await;
        Ok(r.jobs.get(job_id).cloned())
    }

    async fn list_jobs(
        &self,
        pool_id: Option<&str>,
        include_excluded: bool,
    ) -> FarmResult<Vec<Job>> {
        let r = self.inner.read().await;
        let mut jobs: Vec<Job> = r
            .jobs
            .values()
            .filter(|j| pool_id.map(|p| p == j.pool_id).unwrap_or(true))
            .filter(|j| include_excluded || j.status != JobStatus::Excluded)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        Ok(jobs)
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        let job = w
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FarmError::NotFound(format!("job not found: {job_id}")))?;
        job.status = status;
        Ok(())
    }

    async fn set_job_priority(&self, job_id: &str, priority: i32) -> FarmResult<()> {
        if !(0..=100).contains(&priority) {
            return Err(FarmError::InvalidArgument(format!(
                "priority {priority} out of range [0,100]"
            )));
        }
        let mut w = self.inner.write().await;
        let job = w
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FarmError::NotFound(format!("job not found: {job_id}")))?;
        job.priority = priority;
        Ok(())
    }

    async fn move_job_to_pool(&self, job_id: &str, pool_id: &str) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        if !w.pools.contains_key(pool_id) {
            return Err(FarmError::NotFound(format!("pool not found: {pool_id}")));
        }
        let job = w
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FarmError::NotFound(format!("job not found: {job_id}")))?;
        job.pool_id = pool_id.to_string();
        Ok(())
    }

    async fn reset_job(&self, job_id: &str) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        if !w.jobs.contains_key(job_id) {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        for frame in w.frames.values_mut() {
            if frame.job_id == job_id {
                frame.status = FrameStatus::Pending;
                frame.worker_id = None;
                frame.claimed_at = None;
                frame.completed_at = None;
                frame.retry_count = 0;
            }
        }
        w.jobs.get_mut(job_id).unwrap().status = JobStatus::Pending;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        if w.jobs.remove(job_id).is_none() {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        w.frames.retain(|(jid, _, _), _| jid != job_id);
        w.job_seq.remove(job_id);
        Ok(())
    }

    async fn get_job_progress(&self, job_id: &str) -> FarmResult<ProgressCounts> {
        let r = self.inner.read().await;
        Ok(progress_of(
            r.frames.values().filter(|f| f.job_id == job_id),
        ))
    }

    async fn get_job_eye_progress(&self, job_id: &str) -> FarmResult<Vec<(Eye, ProgressCounts)>> {
        let r = self.inner.read().await;
        let mut by_eye: HashMap<Eye, ProgressCounts> = HashMap::new();
        for f in r.frames.values().filter(|f| f.job_id == job_id) {
            let counts = by_eye.entry(f.eye).or_default();
            match f.status {
                FrameStatus::Pending => counts.pending += 1,
                FrameStatus::Claimed => counts.claimed += 1,
                FrameStatus::Completed => counts.completed += 1,
                FrameStatus::Failed => counts.failed += 1,
            }
        }
        let mut result: Vec<_> = by_eye.into_iter().collect();
        result.sort_by_key(|(eye, _)| *eye);
        Ok(result)
    }

    // ── Workers ──

    async fn register_worker(&self, worker: &Worker) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        w.workers.insert(worker.worker_id.clone(), worker.clone());
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        current_job_id: Option<&str>,
        frames_completed: i64,
        now: Timestamp,
    ) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        let worker = w
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| FarmError::NotFound(format!("worker not found: {worker_id}")))?;
        worker.status = status;
        worker.current_job_id = current_job_id.map(|s| s.to_string());
        worker.frames_completed = frames_completed;
        worker.last_heartbeat = now;
        Ok(())
    }

    async fn list_workers(
        &self,
        pool_id: Option<&str>,
        heartbeat_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<Vec<Worker>> {
        let cutoff = now - chrono::Duration::from_std(heartbeat_timeout).unwrap();
        let r = self.inner.read().await;
        let mut workers: Vec<Worker> = r
            .workers
            .values()
            .filter(|w| pool_id.map(|p| p == w.pool_id).unwrap_or(true))
            .cloned()
            .map(|mut w| {
                if w.last_heartbeat < cutoff {
                    w.status = WorkerStatus::Offline;
                }
                w
            })
            .collect();
        workers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(workers)
    }

    async fn pending_frame_count(&self, pool_id: &str) -> FarmResult<i64> {
        let r = self.inner.read().await;
        let job_ids: std::collections::HashSet<&String> = r
            .jobs
            .values()
            .filter(|j| j.pool_id == pool_id && j.status.is_claimable())
            .map(|j| &j.job_id)
            .collect();
        Ok(r.frames
            .values()
            .filter(|f| job_ids.contains(&f.job_id) && f.status == FrameStatus::Pending)
            .count() as i64)
    }

    async fn cleanup_offline_workers(
        &self,
        heartbeat_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        let cutoff = now - chrono::Duration::from_std(heartbeat_timeout).unwrap();
        let offline_worker_ids: Vec<String> = w
            .workers
            .values()
            .filter(|worker| worker.last_heartbeat < cutoff)
            .map(|worker| worker.worker_id.clone())
            .collect();

        for worker_id in &offline_worker_ids {
            for frame in w.frames.values_mut() {
                if frame.worker_id.as_deref() == Some(worker_id.as_str())
                    && frame.status == FrameStatus::Claimed
                {
                    frame.status = FrameStatus::Pending;
                    frame.worker_id = None;
                    frame.claimed_at = None;
                }
            }
            if let Some(worker) = w.workers.get_mut(worker_id) {
                worker.status = WorkerStatus::Offline;
                worker.current_job_id = None;
            }
        }
        Ok(())
    }

    // ── Claim scheduler ──

    async fn claim_frames(
        &self,
        pool_id: &str,
        worker_id: &str,
        batch_size: i64,
        claim_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<Option<ClaimedRange>> {
        let mut w = self.inner.write().await;

        // Reclaim step: expire stale claims across the whole store (mirrors
        // the reference SQL, which has no pool filter on the expiry UPDATE).
        let cutoff = now - chrono::Duration::from_std(claim_timeout).unwrap();
        for frame in w.frames.values_mut() {
            if frame.status == FrameStatus::Claimed && frame.claimed_at.map(|t| t < cutoff).unwrap_or(false) {
                frame.status = FrameStatus::Pending;
                frame.worker_id = None;
                frame.claimed_at = None;
            }
        }

        // Selection step: eligible jobs in this pool, ordered by priority
        // desc, then creation order asc.
        let mut eligible_job_ids: Vec<String> = w
            .jobs
            .values()
            .filter(|j| j.pool_id == pool_id && j.status.is_claimable())
            .map(|j| j.job_id.clone())
            .collect();
        eligible_job_ids.sort_by(|a, b| {
            let ja = &w.jobs[a];
            let jb = &w.jobs[b];
            jb.priority
                .cmp(&ja.priority)
                .then(w.job_seq[a].cmp(&w.job_seq[b]))
        });

        let mut chosen: Option<(String, i64, Eye)> = None;
        'outer: for job_id in &eligible_job_ids {
            let mut candidates: Vec<(i64, Eye)> = w
                .frames
                .values()
                .filter(|f| &f.job_id == job_id && f.status == FrameStatus::Pending)
                .map(|f| (f.frame_idx, f.eye))
                .collect();
            candidates.sort();
            if let Some(first) = candidates.into_iter().next() {
                chosen = Some((job_id.clone(), first.0, first.1));
                break 'outer;
            }
        }

        let (job_id, start_frame, eye) = match chosen {
            Some(c) => c,
            None => return Ok(None),
        };

        // Range extension: consecutive pending frames, same job/eye, from
        // start_frame forward, capped at batch_size.
        let mut end_frame = start_frame;
        let mut claimed_indices = vec![start_frame];
        loop {
            if claimed_indices.len() as i64 >= batch_size {
                break;
            }
            let next = end_frame + 1;
            match w.frames.get(&(job_id.clone(), next, eye)) {
                Some(f) if f.status == FrameStatus::Pending => {
                    end_frame = next;
                    claimed_indices.push(next);
                }
                _ => break,
            }
        }

        for idx in &claimed_indices {
            let frame = w.frames.get_mut(&(job_id.clone(), *idx, eye)).unwrap();
            frame.status = FrameStatus::Claimed;
            frame.worker_id = Some(worker_id.to_string());
            frame.claimed_at = Some(now);
        }

        if let Some(job) = w.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::InProgress;
            }
        }

        Ok(Some(ClaimedRange {
            job_id,
            start_frame,
            end_frame,
            eye,
        }))
    }

    async fn complete_frames(
        &self,
        job_id: &str,
        start_frame: i64,
        end_frame: i64,
        eye: Eye,
        _worker_id: &str,
        now: Timestamp,
    ) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        for frame_idx in start_frame..=end_frame {
            if let Some(frame) = w.frames.get_mut(&(job_id.to_string(), frame_idx, eye)) {
                if matches!(frame.status, FrameStatus::Claimed | FrameStatus::Pending) {
                    frame.status = FrameStatus::Completed;
                    frame.completed_at = Some(now);
                }
            }
        }

        let remaining = w
            .frames
            .values()
            .filter(|f| f.job_id == job_id && f.status != FrameStatus::Completed)
            .count();
        if remaining == 0 {
            if let Some(job) = w.jobs.get_mut(job_id) {
                job.status = JobStatus::Completed;
            }
        }
        Ok(())
    }

    async fn release_frames(
        &self,
        job_id: &str,
        start_frame: i64,
        end_frame: i64,
        eye: Eye,
        worker_id: &str,
    ) -> FarmResult<()> {
        let mut w = self.inner.write().await;
        for frame_idx in start_frame..=end_frame {
            if let Some(frame) = w.frames.get_mut(&(job_id.to_string(), frame_idx, eye)) {
                if frame.worker_id.as_deref() == Some(worker_id) {
                    frame.status = FrameStatus::Pending;
                    frame.worker_id = None;
                    frame.claimed_at = None;
                    frame.retry_count += 1;
                }
            }
        }
        Ok(())
    }
}
