use crate::dispatch::{self, DispatchOutcome};
use farm_core::config::FarmConfig;
use farm_core::error::FarmResult;
use farm_core::scheduler::effective_parallelism;
use farm_core::store::FrameStore;
use farm_core::types::{Worker, WorkerStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Per-host worker loop: register, claim, dispatch, heartbeat, drain, repeat.
/// Holds no in-memory copy of worker state beyond what it needs to drive the
/// loop — the store row is the single source of truth (per §9's ambient
/// concurrency note).
pub struct WorkerRuntime {
    store: Arc<dyn FrameStore>,
    config: FarmConfig,
    worker_id: String,
    hostname: String,
    ip: String,
    stop_soft: Arc<AtomicBool>,
    stop_hard: Arc<AtomicBool>,
}

impl WorkerRuntime {
    pub fn new(store: Arc<dyn FrameStore>, config: FarmConfig, worker_id: String, hostname: String, ip: String) -> Self {
        WorkerRuntime {
            store,
            config,
            worker_id,
            hostname,
            ip,
            stop_soft: Arc::new(AtomicBool::new(false)),
            stop_hard: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone-able handle other tasks (e.g. a signal handler) can use to
    /// request a soft or hard stop without owning the runtime.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            soft: self.stop_soft.clone(),
            hard: self.stop_hard.clone(),
        }
    }

    /// Registers the worker row and runs the main loop until a stop is
    /// requested and every in-flight range has drained (soft stop), or
    /// immediately (hard stop, which also kills in-flight children via
    /// `kill_on_drop` when the `JoinSet` is dropped).
    pub async fn run(&self) -> FarmResult<()> {
        let now = chrono::Utc::now();
        self.store
            .register_worker(&Worker {
                worker_id: self.worker_id.clone(),
                pool_id: self.config.worker.pool_id.clone(),
                hostname: self.hostname.clone(),
                ip: self.ip.clone(),
                status: WorkerStatus::Active,
                current_job_id: None,
                frames_completed: 0,
                last_heartbeat: now,
            })
            .await?;
        tracing::info!(worker_id = %self.worker_id, pool = %self.config.worker.pool_id, "worker registered");

        let mut in_flight: JoinSet<(String, FarmResult<DispatchOutcome>)> = JoinSet::new();
        let mut frames_completed: i64 = 0;
        let mut current_job_id: Option<String> = None;

        // Independent heartbeat clock: a worker sitting on one long-running
        // range must keep emitting heartbeats for the whole run, or another
        // host's `cleanup_offline_workers` reclaims its still-valid frames
        // once the heartbeat-timeout elapses (§4.2/§9). Gating heartbeats on
        // `join_next()` alone ties liveness to task completion, which is
        // exactly the bug this timer avoids.
        let mut heartbeat_tick = tokio::time::interval(Duration::from_secs(self.config.timeouts.heartbeat_interval_secs));
        heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat_tick.tick().await; // first tick fires immediately; the loop sends its own heartbeat below

        loop {
            if self.stop_hard.load(Ordering::SeqCst) {
                tracing::warn!(worker_id = %self.worker_id, "hard stop requested, abandoning in-flight ranges");
                in_flight.abort_all();
                self.mark_offline().await;
                return Ok(());
            }

            // Opportunistic reclaim of other hosts' dead workers.
            if let Err(e) = self
                .store
                .cleanup_offline_workers(Duration::from_secs(self.config.timeouts.heartbeat_timeout_secs), chrono::Utc::now())
                .await
            {
                tracing::warn!(worker_id = %self.worker_id, error = %e, "cleanup_offline_workers failed, retrying next iteration");
            }

            let soft_stopping = self.stop_soft.load(Ordering::SeqCst);

            if !soft_stopping {
                let pending = self
                    .store
                    .pending_frame_count(&self.config.worker.pool_id)
                    .await
                    .unwrap_or(0);
                let target = effective_parallelism(self.config.worker.parallelism, pending, self.config.worker.batch_size);

                while in_flight.len() < target {
                    match self
                        .store
                        .claim_frames(
                            &self.config.worker.pool_id,
                            &self.worker_id,
                            self.config.worker.batch_size,
                            Duration::from_secs(self.config.timeouts.claim_timeout_secs),
                            chrono::Utc::now(),
                        )
                        .await
                    {
                        Ok(Some(range)) => {
                            let Ok(Some(job)) = self.store.get_job(&range.job_id).await else {
                                tracing::warn!(job_id = %range.job_id, "claimed range but job vanished, releasing");
                                let _ = self
                                    .store
                                    .release_frames(&range.job_id, range.start_frame, range.end_frame, range.eye, &self.worker_id)
                                    .await;
                                break;
                            };
                            current_job_id = Some(job.job_id.clone());
                            let store = self.store.clone();
                            let worker_id = self.worker_id.clone();
                            let converter_cfg = self.config.converter.clone();
                            let timeouts = self.config.timeouts;
                            let job_id = job.job_id.clone();
                            in_flight.spawn(async move {
                                let outcome = dispatch::dispatch_range(store, job, range, worker_id, converter_cfg, timeouts).await;
                                (job_id, outcome)
                            });
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(worker_id = %self.worker_id, error = %e, "claim_frames failed, backing off");
                            break;
                        }
                    }
                }
            }

            self.send_heartbeat(&in_flight, current_job_id.as_deref(), frames_completed).await;
            heartbeat_tick.reset();

            if soft_stopping && in_flight.is_empty() {
                tracing::info!(worker_id = %self.worker_id, "soft stop complete, all ranges drained");
                self.mark_offline().await;
                return Ok(());
            }

            if in_flight.is_empty() {
                tokio::time::sleep(Duration::from_secs(self.config.worker.idle_poll_interval_secs)).await;
                continue;
            }

            tokio::select! {
                _ = heartbeat_tick.tick() => {
                    self.send_heartbeat(&in_flight, current_job_id.as_deref(), frames_completed).await;
                }
                joined = in_flight.join_next() => {
                    match joined {
                        Some(Ok((job_id, Ok(DispatchOutcome::Completed { frame_count })))) => {
                            frames_completed += frame_count;
                            tracing::info!(worker_id = %self.worker_id, job_id = %job_id, frame_count, "range reconciled as completed");
                        }
                        Some(Ok((job_id, Ok(DispatchOutcome::Released)))) => {
                            tracing::info!(worker_id = %self.worker_id, job_id = %job_id, "range reconciled as released");
                        }
                        Some(Ok((job_id, Err(e)))) => {
                            tracing::warn!(worker_id = %self.worker_id, job_id = %job_id, error = %e, "dispatch task returned a store error");
                        }
                        Some(Err(e)) => {
                            tracing::warn!(worker_id = %self.worker_id, error = %e, "dispatch task panicked or was cancelled");
                        }
                        None => {}
                    }
                }
            }
        }
    }

    /// Sends one heartbeat reflecting current in-flight state. Called both
    /// from the top of the loop and from the independent heartbeat timer
    /// inside the `select!`, so a worker stuck waiting on one long range
    /// still reports liveness every `heartbeat_interval_secs`.
    async fn send_heartbeat(
        &self,
        in_flight: &JoinSet<(String, FarmResult<DispatchOutcome>)>,
        current_job_id: Option<&str>,
        frames_completed: i64,
    ) {
        let status = if in_flight.is_empty() {
            WorkerStatus::Idle
        } else {
            WorkerStatus::Active
        };
        if let Err(e) = self
            .store
            .update_heartbeat(&self.worker_id, status, current_job_id, frames_completed, chrono::Utc::now())
            .await
        {
            tracing::warn!(worker_id = %self.worker_id, error = %e, "heartbeat failed, retrying next iteration");
        }
    }

    async fn mark_offline(&self) {
        let _ = self
            .store
            .update_heartbeat(&self.worker_id, WorkerStatus::Offline, None, 0, chrono::Utc::now())
            .await;
    }
}

/// Cooperative stop signaling handed to a `ctrl_c`/signal task, per §9's
/// ambient-concurrency note: a flag rather than killing the runtime task
/// directly.
#[derive(Clone)]
pub struct StopHandle {
    soft: Arc<AtomicBool>,
    hard: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_soft_stop(&self) {
        self.soft.store(true, Ordering::SeqCst);
    }

    pub fn request_hard_stop(&self) {
        self.soft.store(true, Ordering::SeqCst);
        self.hard.store(true, Ordering::SeqCst);
    }
}
