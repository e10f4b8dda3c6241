use crate::converter;
use farm_core::config::{ConverterConfig, TimeoutConfig};
use farm_core::error::FarmResult;
use farm_core::output_path::output_file_path;
use farm_core::scheduler::range_timeout;
use farm_core::store::FrameStore;
use farm_core::types::{ClaimedRange, Job};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// Outcome of one claimed range's dispatch, for the worker loop's
/// in-flight-count bookkeeping and completion tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed { frame_count: i64 },
    Released,
}

/// Runs the external converter over one claimed range end to end: creates
/// output directories, spawns the converter, polls the output directory
/// concurrently for progress, and reconciles success/failure back into the
/// store. Never propagates a converter failure — `ConverterFailed` and
/// `ConverterTimedOut` are caught locally and turned into a `release_frames`
/// call, per §7's propagation policy.
pub async fn dispatch_range(
    store: Arc<dyn FrameStore>,
    job: Job,
    range: ClaimedRange,
    worker_id: String,
    converter_cfg: ConverterConfig,
    timeouts: TimeoutConfig,
) -> FarmResult<DispatchOutcome> {
    let frame_count = range.frame_count();

    if let Err(e) = create_output_dirs(&job, &range) {
        tracing::warn!(job_id = %job.job_id, error = %e, "failed to create output directory, releasing range");
        release(&store, &job, &range, &worker_id).await?;
        return Ok(DispatchOutcome::Released);
    }

    let expected_paths = expected_output_paths(&job, &range);
    let timeout = range_timeout(
        Duration::from_secs(timeouts.claim_timeout_secs),
        Duration::from_secs(timeouts.range_timeout_margin_secs),
        Duration::from_secs(timeouts.range_base_secs),
        Duration::from_secs(timeouts.range_per_frame_secs),
        frame_count,
        if range.eye == farm_core::types::Eye::Sbs {
            timeouts.range_sbs_multiplier as u32
        } else {
            1
        },
    );

    let args = converter::build_args(&job, range.start_frame, range.end_frame, range.eye);
    tracing::info!(job_id = %job.job_id, start = range.start_frame, end = range.end_frame, eye = ?range.eye, "dispatching converter");

    let mut child = match Command::new(&converter_cfg.binary_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(job_id = %job.job_id, error = %e, "failed to spawn converter, releasing range");
            release(&store, &job, &range, &worker_id).await?;
            return Ok(DispatchOutcome::Released);
        }
    };

    let poll_interval = Duration::from_secs(timeouts.output_poll_interval_secs);
    let poller = tokio::spawn(poll_output_progress(expected_paths.clone(), poll_interval, job.job_id.clone()));

    let wait_result = tokio::time::timeout(timeout, child.wait()).await;
    poller.abort();

    let success = match wait_result {
        Ok(Ok(status)) => status.success() && expected_paths.first().map(|p| p.exists()).unwrap_or(false),
        Ok(Err(e)) => {
            tracing::warn!(job_id = %job.job_id, error = %e, "converter wait failed");
            false
        }
        Err(_) => {
            tracing::warn!(job_id = %job.job_id, start = range.start_frame, end = range.end_frame, ?timeout, "converter range timed out");
            false
        }
    };

    if success {
        let now = chrono::Utc::now();
        store
            .complete_frames(&job.job_id, range.start_frame, range.end_frame, range.eye, &worker_id, now)
            .await?;
        tracing::info!(job_id = %job.job_id, start = range.start_frame, end = range.end_frame, "range completed");
        Ok(DispatchOutcome::Completed { frame_count })
    } else {
        release(&store, &job, &range, &worker_id).await?;
        Ok(DispatchOutcome::Released)
    }
}

async fn release(store: &Arc<dyn FrameStore>, job: &Job, range: &ClaimedRange, worker_id: &str) -> FarmResult<()> {
    store
        .release_frames(&job.job_id, range.start_frame, range.end_frame, range.eye, worker_id)
        .await
}

fn create_output_dirs(job: &Job, range: &ClaimedRange) -> std::io::Result<()> {
    use farm_core::types::Eye;
    let base = std::path::Path::new(&job.output_dir);
    std::fs::create_dir_all(base)?;
    match range.eye {
        Eye::Sbs => std::fs::create_dir_all(base.join("SBS"))?,
        Eye::Left | Eye::Right if job.separate_folders => {
            std::fs::create_dir_all(base.join(range.eye.letter()))?
        }
        Eye::Left | Eye::Right => {}
    }
    Ok(())
}

fn expected_output_paths(job: &Job, range: &ClaimedRange) -> Vec<PathBuf> {
    (range.start_frame..=range.end_frame)
        .map(|frame_idx| {
            output_file_path(
                &job.output_dir,
                &job.clip_path,
                job.format,
                job.separate_folders,
                frame_idx,
                range.eye,
            )
        })
        .collect()
}

/// Counts how many of the expected output files exist on disk every
/// `poll_interval`, logging `(present, total)` as a progress event.
/// Existence only — no content/size verification, matching the reference
/// poller. Runs until cancelled by the caller once the dispatch task
/// completes.
async fn poll_output_progress(expected_paths: Vec<PathBuf>, poll_interval: Duration, job_id: String) {
    let total = expected_paths.len();
    loop {
        tokio::time::sleep(poll_interval).await;
        let present = expected_paths.iter().filter(|p| p.exists()).count();
        tracing::debug!(job_id = %job_id, present, total, "output progress");
        if present == total {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::store_memory::MemoryStore;
    use farm_core::types::{DEFAULT_POOL_ID, Eye, JobSpec, OutputFormat};
    use std::collections::HashSet;

    fn spec(job_id: &str, start: i64, end: i64, output_dir: &str) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
            pool_id: DEFAULT_POOL_ID.to_string(),
            clip_path: "A.braw".to_string(),
            output_dir: output_dir.to_string(),
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
            priority: 50,
            created_by: "tester".to_string(),
        }
    }

    #[tokio::test]
    async fn missing_converter_binary_releases_the_range() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn FrameStore> = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        let job_spec = spec("j1", 0, 4, dir.path().to_str().unwrap());
        let job = store.submit_job(job_spec, now).await.unwrap();
        let range = store
            .claim_frames(DEFAULT_POOL_ID, "w1", 10, Duration::from_secs(180), now)
            .await
            .unwrap()
            .unwrap();

        let converter_cfg = ConverterConfig {
            binary_path: "/nonexistent/converter-binary-for-test".into(),
        };
        let outcome = dispatch_range(
            store.clone(),
            job,
            range,
            "w1".to_string(),
            converter_cfg,
            TimeoutConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, DispatchOutcome::Released);

        let progress = store.get_job_progress("j1").await.unwrap();
        assert_eq!(progress.pending, 5);
    }

    #[test]
    fn expected_paths_created_under_output_dir() {
        let job_spec = spec("j1", 0, 2, "/out");
        let job = Job::from_spec(job_spec, chrono::Utc::now());
        let range = ClaimedRange {
            job_id: "j1".to_string(),
            start_frame: 0,
            end_frame: 2,
            eye: Eye::Left,
        };
        let paths = expected_output_paths(&job, &range);
        assert_eq!(paths.len(), 3);
        assert!(paths[0].to_string_lossy().contains("A_L_000000.exr"));
    }
}
