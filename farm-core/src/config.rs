use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process-wide configuration, read once at start and handed down by
/// `Arc` rather than read again from the filesystem — see the
/// global-mutable-state design note: the store is the only thing
/// intentionally shared and mutable across the process lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Path to the shared SQLite database file.
    pub db_path: PathBuf,
    pub timeouts: TimeoutConfig,
    pub worker: WorkerConfig,
    pub converter: ConverterConfig,
    pub checker: CheckerConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Claims older than this are reclaimed by the next `claim_frames` call.
    pub claim_timeout_secs: u64,
    /// Workers silent for longer than this are reported offline.
    pub heartbeat_timeout_secs: u64,
    /// Heartbeat write cadence while the worker loop is running.
    pub heartbeat_interval_secs: u64,
    /// Base term of the per-range timeout formula.
    pub range_base_secs: u64,
    /// Per-frame term of the per-range timeout formula.
    pub range_per_frame_secs: u64,
    /// Multiplier applied to the per-frame term when eye = sbs.
    pub range_sbs_multiplier: u64,
    /// Safety margin added on top of the claim timeout floor.
    pub range_timeout_margin_secs: u64,
    /// Cadence at which the output poller checks for new files on disk.
    pub output_poll_interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            claim_timeout_secs: 180,
            heartbeat_timeout_secs: 300,
            heartbeat_interval_secs: 30,
            range_base_secs: 30,
            range_per_frame_secs: 2,
            range_sbs_multiplier: 2,
            range_timeout_margin_secs: 15,
            output_poll_interval_secs: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_id: String,
    pub batch_size: i64,
    pub parallelism: usize,
    /// Idle-loop poll interval when no ranges are in flight.
    pub idle_poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            pool_id: crate::types::DEFAULT_POOL_ID.to_string(),
            batch_size: 10,
            parallelism: 16,
            idle_poll_interval_secs: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub binary_path: PathBuf,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            binary_path: PathBuf::from("braw_convert"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub binary_path: PathBuf,
    pub auto_scan: bool,
    pub auto_rerender: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        CheckerConfig {
            binary_path: PathBuf::from("seqchecker"),
            auto_scan: false,
            auto_rerender: false,
        }
    }
}

impl Default for FarmConfig {
    fn default() -> Self {
        FarmConfig {
            db_path: PathBuf::from("farm.db"),
            timeouts: TimeoutConfig::default(),
            worker: WorkerConfig::default(),
            converter: ConverterConfig::default(),
            checker: CheckerConfig::default(),
        }
    }
}

impl FarmConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, crate::error::FarmError> {
        toml::from_str(s)
            .map_err(|e| crate::error::FarmError::InvalidArgument(format!("bad config: {e}")))
    }

    pub async fn load(path: &Path) -> Result<Self, crate::error::FarmError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&contents)
    }
}
