use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Epoch milliseconds (UTC). Frames and jobs store timestamps as `DateTime<Utc>`
/// directly; this alias is used only where a bare integer is more convenient
/// (timeout comparisons against the claim clock).
pub type Timestamp = DateTime<Utc>;

// ─── Eye ────────────────────────────────────────────────────────

/// Which eye (or stereo composite) a frame belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Left,
    Right,
    /// Side-by-side composite; always written under a dedicated `SBS/` folder
    /// regardless of `separate_folders` (see `output_path`).
    Sbs,
}

impl Eye {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
            Eye::Sbs => "sbs",
        }
    }

    /// Single uppercase letter used in output filenames (`L`/`R`). Not
    /// meaningful for `Sbs`, which never appears in a filename suffix.
    pub fn letter(&self) -> &'static str {
        match self {
            Eye::Left => "L",
            Eye::Right => "R",
            Eye::Sbs => "SBS",
        }
    }
}

impl std::str::FromStr for Eye {
    type Err = crate::error::FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Eye::Left),
            "right" => Ok(Eye::Right),
            "sbs" => Ok(Eye::Sbs),
            other => Err(crate::error::FarmError::InvalidArgument(format!(
                "unknown eye: {other}"
            ))),
        }
    }
}

// ─── Output format ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Exr,
    Ppm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Exr => ".exr",
            OutputFormat::Ppm => ".ppm",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = crate::error::FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exr" => Ok(OutputFormat::Exr),
            "ppm" => Ok(OutputFormat::Ppm),
            other => Err(crate::error::FarmError::InvalidArgument(format!(
                "unknown output format: {other}"
            ))),
        }
    }
}

// ─── Pool ──────────────────────────────────────────────────────

/// The distinguished pool identifier that always exists and cannot be deleted.
pub const DEFAULT_POOL_ID: &str = "default";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub pool_id: String,
    pub name: String,
    pub description: String,
    /// Coarse ordering among pools for multi-homed workers; [0,100].
    pub priority: i32,
    pub created_at: Timestamp,
}

impl Pool {
    pub fn default_pool(now: Timestamp) -> Self {
        Pool {
            pool_id: DEFAULT_POOL_ID.to_string(),
            name: "Default".to_string(),
            description: "Default work pool".to_string(),
            priority: 50,
            created_at: now,
        }
    }
}

// ─── Job ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Excluded,
    Paused,
    Failed,
}

impl JobStatus {
    /// Only `Pending` and `InProgress` jobs are candidates for the claim
    /// scheduler: terminal statuses (`Completed`, `Failed`) and operator-held
    /// statuses (`Excluded`, `Paused`) are never selected.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Excluded => "excluded",
            JobStatus::Paused => "paused",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "excluded" => Ok(JobStatus::Excluded),
            "paused" => Ok(JobStatus::Paused),
            "failed" => Ok(JobStatus::Failed),
            other => Err(crate::error::FarmError::InvalidArgument(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Parameters for a new job submission. `job_id` is assigned by the caller
/// (the original system uses a human-chosen or derived string id, not a
/// generated UUID) so that re-submission races are a `Conflict`, not silent
/// duplication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: String,
    pub pool_id: String,
    pub clip_path: String,
    pub output_dir: String,
    pub start_frame: i64,
    pub end_frame: i64,
    pub eyes: HashSet<Eye>,
    pub format: OutputFormat,
    pub separate_folders: bool,
    pub use_aces: bool,
    pub color_input_space: String,
    pub color_output_space: String,
    pub use_stmap: bool,
    pub stmap_path: String,
    pub priority: i32,
    pub created_by: String,
}

impl JobSpec {
    /// `(end_frame - start_frame + 1) * |eyes|`.
    pub fn frame_count(&self) -> i64 {
        if self.end_frame < self.start_frame {
            return 0;
        }
        (self.end_frame - self.start_frame + 1) * self.eyes.len() as i64
    }

    pub fn validate(&self) -> Result<(), crate::error::FarmError> {
        if self.start_frame > self.end_frame {
            return Err(crate::error::FarmError::InvalidArgument(format!(
                "start_frame {} > end_frame {}",
                self.start_frame, self.end_frame
            )));
        }
        if self.eyes.is_empty() {
            return Err(crate::error::FarmError::InvalidArgument(
                "job must specify at least one eye".to_string(),
            ));
        }
        if !(0..=100).contains(&self.priority) {
            return Err(crate::error::FarmError::InvalidArgument(format!(
                "priority {} out of range [0,100]",
                self.priority
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub pool_id: String,
    pub clip_path: String,
    pub output_dir: String,
    pub start_frame: i64,
    pub end_frame: i64,
    pub eyes: HashSet<Eye>,
    pub format: OutputFormat,
    pub separate_folders: bool,
    pub use_aces: bool,
    pub color_input_space: String,
    pub color_output_space: String,
    pub use_stmap: bool,
    pub stmap_path: String,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: Timestamp,
    pub created_by: String,
}

impl Job {
    pub fn from_spec(spec: JobSpec, created_at: Timestamp) -> Self {
        Job {
            job_id: spec.job_id,
            pool_id: spec.pool_id,
            clip_path: spec.clip_path,
            output_dir: spec.output_dir,
            start_frame: spec.start_frame,
            end_frame: spec.end_frame,
            eyes: spec.eyes,
            format: spec.format,
            separate_folders: spec.separate_folders,
            use_aces: spec.use_aces,
            color_input_space: spec.color_input_space,
            color_output_space: spec.color_output_space,
            use_stmap: spec.use_stmap,
            stmap_path: spec.stmap_path,
            status: JobStatus::Pending,
            priority: spec.priority,
            created_at,
            created_by: spec.created_by,
        }
    }
}

/// Per-status frame counts for a single job, or for one eye within a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounts {
    pub pending: i64,
    pub claimed: i64,
    pub completed: i64,
    pub failed: i64,
}

impl ProgressCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.claimed + self.completed + self.failed
    }
}

/// The computed status used by list/inspect endpoints, which may diverge
/// from the stored `JobStatus` when frame rows show progress the stored
/// status hasn't caught up with yet. See `FarmControlApi::list_jobs_with_status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputedJobStatus {
    Pending,
    InProgress,
    Completed,
    Excluded,
    Paused,
    Failed,
}

// ─── Frame ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl std::fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FrameStatus::Pending => "pending",
            FrameStatus::Claimed => "claimed",
            FrameStatus::Completed => "completed",
            FrameStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FrameStatus {
    type Err = crate::error::FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FrameStatus::Pending),
            "claimed" => Ok(FrameStatus::Claimed),
            "completed" => Ok(FrameStatus::Completed),
            "failed" => Ok(FrameStatus::Failed),
            other => Err(crate::error::FarmError::InvalidArgument(format!(
                "unknown frame status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub job_id: String,
    pub frame_idx: i64,
    pub eye: Eye,
    pub status: FrameStatus,
    pub worker_id: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub retry_count: i32,
}

/// A contiguous, single-eye, single-job range of frames returned by a
/// successful claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedRange {
    pub job_id: String,
    pub start_frame: i64,
    pub end_frame: i64,
    pub eye: Eye,
}

impl ClaimedRange {
    pub fn frame_count(&self) -> i64 {
        self.end_frame - self.start_frame + 1
    }
}

// ─── Worker ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Active,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Active => "active",
            WorkerStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = crate::error::FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(WorkerStatus::Idle),
            "active" => Ok(WorkerStatus::Active),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(crate::error::FarmError::InvalidArgument(format!(
                "unknown worker status: {other}"
            ))),
        }
    }
}

/// A worker's identifier is `{hostname}_{ip}`, computed once at process
/// start and stable across restarts (re-registration is an upsert).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub pool_id: String,
    pub hostname: String,
    pub ip: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<String>,
    pub frames_completed: i64,
    pub last_heartbeat: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_spec_frame_count() {
        let spec = make_spec(0, 9, [Eye::Left, Eye::Right]);
        assert_eq!(spec.frame_count(), 20);
    }

    #[test]
    fn job_spec_rejects_inverted_range() {
        let spec = make_spec(10, 5, [Eye::Left]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn job_spec_rejects_priority_out_of_range() {
        let mut spec = make_spec(0, 9, [Eye::Left]);
        spec.priority = 101;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn job_status_claimability() {
        assert!(JobStatus::Pending.is_claimable());
        assert!(JobStatus::InProgress.is_claimable());
        assert!(!JobStatus::Excluded.is_claimable());
        assert!(!JobStatus::Paused.is_claimable());
        assert!(!JobStatus::Completed.is_claimable());
        assert!(!JobStatus::Failed.is_claimable());
    }

    fn make_spec(start: i64, end: i64, eyes: impl IntoIterator<Item = Eye>) -> JobSpec {
        JobSpec {
            job_id: "j1".to_string(),
            pool_id: DEFAULT_POOL_ID.to_string(),
            clip_path: "A.braw".to_string(),
            output_dir: "/out".to_string(),
            start_frame: start,
            end_frame: end,
            eyes: eyes.into_iter().collect(),
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
}
