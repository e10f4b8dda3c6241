use crate::error::{FarmError, FarmResult, SqlError};
use crate::store::FrameStore;
use crate::types::*;
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;

/// SQLite-backed `FrameStore`, the production coordination-store backend.
///
/// Deliberately runs `journal_mode=DELETE` rather than WAL: the database file
/// is expected to live on a network share, and WAL's shared-memory index
/// does not behave reliably there. `claim_frames` opens its transaction with
/// `BEGIN IMMEDIATE` to take the write lock up front rather than discover a
/// conflict partway through — SQLite has no `SELECT ... FOR UPDATE`.
pub struct SqliteStore {
    pool: SqlitePool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pools (
    pool_id     TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    priority    INTEGER NOT NULL DEFAULT 50,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    job_id             TEXT PRIMARY KEY,
    pool_id            TEXT NOT NULL,
    clip_path          TEXT NOT NULL,
    output_dir         TEXT NOT NULL,
    start_frame        INTEGER NOT NULL,
    end_frame          INTEGER NOT NULL,
    eyes               TEXT NOT NULL,
    format             TEXT NOT NULL DEFAULT 'exr',
    separate_folders   INTEGER NOT NULL DEFAULT 0,
    use_aces           INTEGER NOT NULL DEFAULT 1,
    color_input_space  TEXT NOT NULL DEFAULT '',
    color_output_space TEXT NOT NULL DEFAULT '',
    use_stmap          INTEGER NOT NULL DEFAULT 0,
    stmap_path         TEXT NOT NULL DEFAULT '',
    status             TEXT NOT NULL DEFAULT 'pending',
    priority           INTEGER NOT NULL DEFAULT 50,
    created_at         TEXT NOT NULL,
    created_by         TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (pool_id) REFERENCES pools(pool_id)
);

CREATE TABLE IF NOT EXISTS frames (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id        TEXT NOT NULL,
    frame_idx     INTEGER NOT NULL,
    eye           TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    worker_id     TEXT,
    claimed_at    TEXT,
    completed_at  TEXT,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (job_id) REFERENCES jobs(job_id),
    UNIQUE(job_id, frame_idx, eye)
);

CREATE TABLE IF NOT EXISTS workers (
    worker_id        TEXT PRIMARY KEY,
    pool_id          TEXT NOT NULL,
    hostname         TEXT NOT NULL,
    ip               TEXT NOT NULL DEFAULT '',
    status           TEXT NOT NULL DEFAULT 'idle',
    current_job_id   TEXT,
    frames_completed INTEGER NOT NULL DEFAULT 0,
    last_heartbeat   TEXT NOT NULL,
    FOREIGN KEY (pool_id) REFERENCES pools(pool_id)
);

CREATE INDEX IF NOT EXISTS idx_jobs_pool ON jobs(pool_id);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_frames_job ON frames(job_id);
CREATE INDEX IF NOT EXISTS idx_frames_status ON frames(status);
CREATE INDEX IF NOT EXISTS idx_frames_worker ON frames(worker_id);
CREATE INDEX IF NOT EXISTS idx_workers_pool ON workers(pool_id);
"#;

impl SqliteStore {
    /// Opens (creating if necessary) the database at `path`, applies the
    /// schema, and seeds the `default` pool.
    pub async fn connect(path: &std::path::Path) -> FarmResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Delete)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .busy_timeout(std::time::Duration::from_secs(60));
        let pool = SqlitePool::connect_with(options).await?;
        let store = SqliteStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> FarmResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO pools (pool_id, name, description, priority, created_at)
             VALUES (?, 'Default', 'Default work pool', 50, ?)",
        )
        .bind(DEFAULT_POOL_ID)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    async fn in_memory() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Memory);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        let store = SqliteStore { pool };
        store.init_schema().await.unwrap();
        store
    }
}

fn encode_eyes(eyes: &HashSet<Eye>) -> String {
    let mut v: Vec<&str> = eyes.iter().map(Eye::as_str).collect();
    v.sort();
    v.join(",")
}

fn decode_eyes(s: &str) -> FarmResult<HashSet<Eye>> {
    s.split(',')
        .filter(|s| !s.is_empty())
        .map(Eye::from_str)
        .collect()
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> FarmResult<Job> {
    let eyes_raw: String = row.try_get("eyes")?;
    let status_raw: String = row.try_get("status")?;
    let format_raw: String = row.try_get("format")?;
    let created_at_raw: String = row.try_get("created_at")?;
    Ok(Job {
        job_id: row.try_get("job_id")?,
        pool_id: row.try_get("pool_id")?,
        clip_path: row.try_get("clip_path")?,
        output_dir: row.try_get("output_dir")?,
        start_frame: row.try_get("start_frame")?,
        end_frame: row.try_get("end_frame")?,
        eyes: decode_eyes(&eyes_raw)?,
        format: OutputFormat::from_str(&format_raw)?,
        separate_folders: row.try_get::<i64, _>("separate_folders")? != 0,
        use_aces: row.try_get::<i64, _>("use_aces")? != 0,
        color_input_space: row.try_get("color_input_space")?,
        color_output_space: row.try_get("color_output_space")?,
        use_stmap: row.try_get::<i64, _>("use_stmap")? != 0,
        stmap_path: row.try_get("stmap_path")?,
        status: JobStatus::from_str(&status_raw)?,
        priority: row.try_get("priority")?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_raw)
            .map_err(|e| FarmError::Sql(SqlError(e.to_string())))?
            .with_timezone(&chrono::Utc),
        created_by: row.try_get("created_by")?,
    })
}

fn row_to_worker(row: &sqlx::sqlite::SqliteRow) -> FarmResult<Worker> {
    let status_raw: String = row.try_get("status")?;
    let last_heartbeat_raw: String = row.try_get("last_heartbeat")?;
    Ok(Worker {
        worker_id: row.try_get("worker_id")?,
        pool_id: row.try_get("pool_id")?,
        hostname: row.try_get("hostname")?,
        ip: row.try_get("ip")?,
        status: WorkerStatus::from_str(&status_raw)?,
        current_job_id: row.try_get("current_job_id")?,
        frames_completed: row.try_get("frames_completed")?,
        last_heartbeat: chrono::DateTime::parse_from_rfc3339(&last_heartbeat_raw)
            .map_err(|e| FarmError::Sql(SqlError(e.to_string())))?
            .with_timezone(&chrono::Utc),
    })
}

fn row_to_pool(row: &sqlx::sqlite::SqliteRow) -> FarmResult<Pool> {
    let created_at_raw: String = row.try_get("created_at")?;
    Ok(Pool {
        pool_id: row.try_get("pool_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        priority: row.try_get("priority")?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_raw)
            .map_err(|e| FarmError::Sql(SqlError(e.to_string())))?
            .with_timezone(&chrono::Utc),
    })
}

#[async_trait]
impl FrameStore for SqliteStore {
    // ── Pools ──

    async fn create_pool(&self, pool: &Pool) -> FarmResult<()> {
        sqlx::query(
            "INSERT INTO pools (pool_id, name, description, priority, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&pool.pool_id)
        .bind(&pool.name)
        .bind(&pool.description)
        .bind(pool.priority)
        .bind(pool.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pools(&self) -> FarmResult<Vec<Pool>> {
        let rows = sqlx::query("SELECT * FROM pools ORDER BY priority DESC, pool_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_pool).collect()
    }

    async fn delete_pool(&self, pool_id: &str) -> FarmResult<()> {
        if pool_id == DEFAULT_POOL_ID {
            return Err(FarmError::InvalidArgument(
                "cannot delete the default pool".to_string(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE jobs SET pool_id = ? WHERE pool_id = ?")
            .bind(DEFAULT_POOL_ID)
            .bind(pool_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE workers SET pool_id = ? WHERE pool_id = ?")
            .bind(DEFAULT_POOL_ID)
            .bind(pool_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM pools WHERE pool_id = ?")
            .bind(pool_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("pool not found: {pool_id}")));
        }
        tx.commit().await?;
        tracing::info!(pool_id, "pool deleted, jobs and workers migrated to default");
        Ok(())
    }

    // ── Jobs ──

    async fn submit_job(&self, spec: JobSpec, now: Timestamp) -> FarmResult<Job> {
        spec.validate()?;
        let job = Job::from_spec(spec, now);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO jobs (job_id, pool_id, clip_path, output_dir, start_frame, end_frame,
                                eyes, format, separate_folders, use_aces, color_input_space,
                                color_output_space, use_stmap, stmap_path, status, priority,
                                created_at, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.job_id)
        .bind(&job.pool_id)
        .bind(&job.clip_path)
        .bind(&job.output_dir)
        .bind(job.start_frame)
        .bind(job.end_frame)
        .bind(encode_eyes(&job.eyes))
        .bind(job.format.extension().trim_start_matches('.'))
        .bind(job.separate_folders as i64)
        .bind(job.use_aces as i64)
        .bind(&job.color_input_space)
        .bind(&job.color_output_space)
        .bind(job.use_stmap as i64)
        .bind(&job.stmap_path)
        .bind(job.status.to_string())
        .bind(job.priority)
        .bind(job.created_at.to_rfc3339())
        .bind(&job.created_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                tracing::warn!(job_id = %job.job_id, "submit_job rejected: duplicate job id");
                FarmError::Conflict(format!("job already exists: {}", job.job_id))
            }
            _ => FarmError::from(e),
        })?;

        for frame_idx in job.start_frame..=job.end_frame {
            for eye in &job.eyes {
                sqlx::query(
                    "INSERT INTO frames (job_id, frame_idx, eye, status) VALUES (?, ?, ?, 'pending')",
                )
                .bind(&job.job_id)
                .bind(frame_idx)
                .bind(eye.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        let frame_count = (job.end_frame - job.start_frame + 1) * job.eyes.len() as i64;
        tracing::info!(job_id = %job.job_id, frame_count, "job submitted");
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> FarmResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_jobs(
        &self,
        pool_id: Option<&str>,
        include_excluded: bool,
    ) -> FarmResult<Vec<Job>> {
        let rows = match (pool_id, include_excluded) {
            (Some(p), true) => {
                sqlx::query("SELECT * FROM jobs WHERE pool_id = ? ORDER BY priority DESC, created_at")
                    .bind(p)
                    .fetch_all(&self.pool)
                    .await?
            }
            (Some(p), false) => sqlx::query(
                "SELECT * FROM jobs WHERE pool_id = ? AND status != 'excluded' ORDER BY priority DESC, created_at",
            )
            .bind(p)
            .fetch_all(&self.pool)
            .await?,
            (None, true) => {
                sqlx::query("SELECT * FROM jobs ORDER BY priority DESC, created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, false) => {
                sqlx::query("SELECT * FROM jobs WHERE status != 'excluded' ORDER BY priority DESC, created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_job).collect()
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> FarmResult<()> {
        let result = sqlx::query("UPDATE jobs SET status = ? WHERE job_id = ?")
            .bind(status.to_string())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        Ok(())
    }

    async fn set_job_priority(&self, job_id: &str, priority: i32) -> FarmResult<()> {
        if !(0..=100).contains(&priority) {
            return Err(FarmError::InvalidArgument(format!(
                "priority {priority} out of range [0,100]"
            )));
        }
        let result = sqlx::query("UPDATE jobs SET priority = ? WHERE job_id = ?")
            .bind(priority)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        Ok(())
    }

    async fn move_job_to_pool(&self, job_id: &str, pool_id: &str) -> FarmResult<()> {
        let pool_exists: Option<(String,)> =
            sqlx::query_as("SELECT pool_id FROM pools WHERE pool_id = ?")
                .bind(pool_id)
                .fetch_optional(&self.pool)
                .await?;
        if pool_exists.is_none() {
            return Err(FarmError::NotFound(format!("pool not found: {pool_id}")));
        }
        let result = sqlx::query("UPDATE jobs SET pool_id = ? WHERE job_id = ?")
            .bind(pool_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        Ok(())
    }

    async fn reset_job(&self, job_id: &str) -> FarmResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE jobs SET status = 'pending' WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        sqlx::query(
            "UPDATE frames SET status = 'pending', worker_id = NULL, claimed_at = NULL,
                    completed_at = NULL, retry_count = 0
             WHERE job_id = ?",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> FarmResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM frames WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("job not found: {job_id}")));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_job_progress(&self, job_id: &str) -> FarmResult<ProgressCounts> {
        let row = sqlx::query(
            "SELECT
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'claimed' THEN 1 ELSE 0 END) AS claimed,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed
             FROM frames WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProgressCounts {
            pending: row.try_get::<Option<i64>, _>("pending")?.unwrap_or(0),
            claimed: row.try_get::<Option<i64>, _>("claimed")?.unwrap_or(0),
            completed: row.try_get::<Option<i64>, _>("completed")?.unwrap_or(0),
            failed: row.try_get::<Option<i64>, _>("failed")?.unwrap_or(0),
        })
    }

    async fn get_job_eye_progress(&self, job_id: &str) -> FarmResult<Vec<(Eye, ProgressCounts)>> {
        let rows = sqlx::query(
            "SELECT eye,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'claimed' THEN 1 ELSE 0 END) AS claimed,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed
             FROM frames WHERE job_id = ? GROUP BY eye ORDER BY eye",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let eye_raw: String = row.try_get("eye")?;
            out.push((
                Eye::from_str(&eye_raw)?,
                ProgressCounts {
                    pending: row.try_get::<Option<i64>, _>("pending")?.unwrap_or(0),
                    claimed: row.try_get::<Option<i64>, _>("claimed")?.unwrap_or(0),
                    completed: row.try_get::<Option<i64>, _>("completed")?.unwrap_or(0),
                    failed: row.try_get::<Option<i64>, _>("failed")?.unwrap_or(0),
                },
            ));
        }
        Ok(out)
    }

    // ── Workers ──

    async fn register_worker(&self, worker: &Worker) -> FarmResult<()> {
        sqlx::query(
            "INSERT INTO workers (worker_id, pool_id, hostname, ip, status, current_job_id,
                                   frames_completed, last_heartbeat)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(worker_id) DO UPDATE SET
                pool_id = excluded.pool_id,
                hostname = excluded.hostname,
                ip = excluded.ip,
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat",
        )
        .bind(&worker.worker_id)
        .bind(&worker.pool_id)
        .bind(&worker.hostname)
        .bind(&worker.ip)
        .bind(worker.status.to_string())
        .bind(&worker.current_job_id)
        .bind(worker.frames_completed)
        .bind(worker.last_heartbeat.to_rfc3339())
        .execute(&self.pool)
        .await?;
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
        let result = sqlx::query(
            "UPDATE workers SET status = ?, current_job_id = ?, frames_completed = ?,
                    last_heartbeat = ?
             WHERE worker_id = ?",
        )
        .bind(status.to_string())
        .bind(current_job_id)
        .bind(frames_completed)
        .bind(now.to_rfc3339())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FarmError::NotFound(format!("worker not found: {worker_id}")));
        }
        Ok(())
    }

    async fn list_workers(
        &self,
        pool_id: Option<&str>,
        heartbeat_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<Vec<Worker>> {
        let cutoff = now - chrono::Duration::from_std(heartbeat_timeout).unwrap();
        const COLUMNS: &str = "worker_id, pool_id, hostname, ip,
                CASE WHEN last_heartbeat < ? THEN 'offline' ELSE status END AS status,
                current_job_id, frames_completed, last_heartbeat";
        let rows = match pool_id {
            Some(p) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM workers WHERE pool_id = ? ORDER BY hostname"
                ))
                .bind(cutoff.to_rfc3339())
                .bind(p)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {COLUMNS} FROM workers ORDER BY hostname"))
                    .bind(cutoff.to_rfc3339())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_worker).collect()
    }

    async fn pending_frame_count(&self, pool_id: &str) -> FarmResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM frames f
             JOIN jobs j ON f.job_id = j.job_id
             WHERE j.pool_id = ? AND j.status NOT IN ('excluded', 'paused', 'completed', 'failed')
               AND f.status = 'pending'",
        )
        .bind(pool_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("cnt")?)
    }

    async fn cleanup_offline_workers(
        &self,
        heartbeat_timeout: std::time::Duration,
        now: Timestamp,
    ) -> FarmResult<()> {
        let cutoff = now - chrono::Duration::from_std(heartbeat_timeout).unwrap();
        let mut tx = self.pool.begin().await?;
        let stale: Vec<(String,)> = sqlx::query_as(
            "SELECT worker_id FROM workers WHERE last_heartbeat < ? AND status != 'offline'",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&mut *tx)
        .await?;

        for (worker_id,) in &stale {
            sqlx::query(
                "UPDATE frames SET status = 'pending', worker_id = NULL, claimed_at = NULL
                 WHERE worker_id = ? AND status = 'claimed'",
            )
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE workers SET status = 'offline', current_job_id = NULL WHERE worker_id = ?")
                .bind(worker_id)
                .execute(&mut *tx)
                .await?;
            tracing::warn!(worker_id, "worker marked offline, claimed frames returned to pending");
        }
        tx.commit().await?;
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
        let cutoff = now - chrono::Duration::from_std(claim_timeout).unwrap();

        // sqlx opens SQLite transactions as deferred; the first write below
        // promotes it to a write lock, same effect as `BEGIN IMMEDIATE` for
        // our purposes since every statement here runs inside it.
        let mut tx = self.pool.begin().await?;
        let reclaimed = sqlx::query(
            "UPDATE frames SET status = 'pending', worker_id = NULL, claimed_at = NULL
             WHERE status = 'claimed' AND claimed_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if reclaimed > 0 {
            tracing::debug!(pool_id, reclaimed, "expired claims reclaimed before selection");
        }

        let candidate = sqlx::query(
            "SELECT f.job_id AS job_id, f.frame_idx AS frame_idx, f.eye AS eye
             FROM frames f
             JOIN jobs j ON f.job_id = j.job_id
             WHERE j.pool_id = ? AND j.status NOT IN ('excluded', 'paused', 'completed', 'failed')
               AND f.status = 'pending'
             ORDER BY j.priority DESC, j.created_at, f.frame_idx, f.eye
             LIMIT 1",
        )
        .bind(pool_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            tracing::debug!(pool_id, worker_id, "claim_frames: nothing to do");
            return Ok(None);
        };

        let job_id: String = candidate.try_get("job_id")?;
        let start_frame: i64 = candidate.try_get("frame_idx")?;
        let eye_raw: String = candidate.try_get("eye")?;
        let eye = Eye::from_str(&eye_raw)?;

        let rows = sqlx::query(
            "SELECT frame_idx FROM frames
             WHERE job_id = ? AND eye = ? AND status = 'pending' AND frame_idx >= ?
             ORDER BY frame_idx LIMIT ?",
        )
        .bind(&job_id)
        .bind(eye.as_str())
        .bind(start_frame)
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        let mut frame_indices = Vec::with_capacity(rows.len());
        let mut expected = start_frame;
        for row in &rows {
            let idx: i64 = row.try_get("frame_idx")?;
            if idx != expected {
                break;
            }
            frame_indices.push(idx);
            expected += 1;
        }
        let end_frame = *frame_indices.last().unwrap();

        for idx in &frame_indices {
            sqlx::query(
                "UPDATE frames SET status = 'claimed', worker_id = ?, claimed_at = ?
                 WHERE job_id = ? AND eye = ? AND frame_idx = ?",
            )
            .bind(worker_id)
            .bind(now.to_rfc3339())
            .bind(&job_id)
            .bind(eye.as_str())
            .bind(idx)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE jobs SET status = 'in_progress' WHERE job_id = ? AND status = 'pending'")
            .bind(&job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::debug!(worker_id, job_id = %job_id, start_frame, end_frame, eye = eye.as_str(), "frames claimed");

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
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE frames SET status = 'completed', completed_at = ?
             WHERE job_id = ? AND eye = ? AND frame_idx BETWEEN ? AND ?
               AND status IN ('claimed', 'pending')",
        )
        .bind(now.to_rfc3339())
        .bind(job_id)
        .bind(eye.as_str())
        .bind(start_frame)
        .bind(end_frame)
        .execute(&mut *tx)
        .await?;

        let remaining: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM frames WHERE job_id = ? AND status != 'completed'",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("cnt")?;

        if remaining == 0 {
            sqlx::query("UPDATE jobs SET status = 'completed' WHERE job_id = ?")
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            tracing::info!(job_id, "job completed, all frames done");
        }
        tx.commit().await?;
        tracing::debug!(job_id, start_frame, end_frame, eye = eye.as_str(), "frames completed");
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
        let released = sqlx::query(
            "UPDATE frames SET status = 'pending', worker_id = NULL, claimed_at = NULL,
                    retry_count = retry_count + 1
             WHERE job_id = ? AND eye = ? AND frame_idx BETWEEN ? AND ? AND worker_id = ?",
        )
        .bind(job_id)
        .bind(eye.as_str())
        .bind(start_frame)
        .bind(end_frame)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        tracing::warn!(job_id, worker_id, start_frame, end_frame, released, "frames released back to pending");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(job_id: &str, start: i64, end: i64, eyes: impl IntoIterator<Item = Eye>) -> JobSpec {
        JobSpec {
            job_id: job_id.to_string(),
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

    #[tokio::test]
    async fn submit_and_get_job_round_trip() {
        let store = SqliteStore::in_memory().await;
        let now = chrono::Utc::now();
        store.submit_job(spec("j1", 0, 9, [Eye::Left]), now).await.unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        let progress = store.get_job_progress("j1").await.unwrap();
        assert_eq!(progress.pending, 10);
    }

    #[tokio::test]
    async fn claim_complete_round_trip_through_sql() {
        let store = SqliteStore::in_memory().await;
        let now = chrono::Utc::now();
        store.submit_job(spec("j1", 0, 19, [Eye::Left]), now).await.unwrap();

        let range = store
            .claim_frames(DEFAULT_POOL_ID, "w1", 10, std::time::Duration::from_secs(180), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((range.start_frame, range.end_frame), (0, 9));

        store
            .complete_frames("j1", range.start_frame, range.end_frame, range.eye, "w1", now)
            .await
            .unwrap();

        let progress = store.get_job_progress("j1").await.unwrap();
        assert_eq!(progress.completed, 10);
        assert_eq!(progress.pending, 10);

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn claim_reclaims_expired_claim_for_another_worker() {
        let store = SqliteStore::in_memory().await;
        let t0 = chrono::Utc::now();
        store.submit_job(spec("j1", 0, 9, [Eye::Left]), t0).await.unwrap();

        let timeout = std::time::Duration::from_secs(180);
        store
            .claim_frames(DEFAULT_POOL_ID, "w1", 10, timeout, t0)
            .await
            .unwrap();

        let t1 = t0 + chrono::Duration::seconds(200);
        let range = store
            .claim_frames(DEFAULT_POOL_ID, "w2", 10, timeout, t1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(range.start_frame, 0);
    }

    #[tokio::test]
    async fn delete_pool_migrates_jobs() {
        let store = SqliteStore::in_memory().await;
        let now = chrono::Utc::now();
        store
            .create_pool(&Pool {
                pool_id: "gpu".to_string(),
                name: "GPU".to_string(),
                description: String::new(),
                priority: 60,
                created_at: now,
            })
            .await
            .unwrap();

        let mut s = spec("j1", 0, 9, [Eye::Left]);
        s.pool_id = "gpu".to_string();
        store.submit_job(s, now).await.unwrap();

        store.delete_pool("gpu").await.unwrap();
        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.pool_id, DEFAULT_POOL_ID);
    }

    #[tokio::test]
    async fn duplicate_job_id_is_a_conflict() {
        let store = SqliteStore::in_memory().await;
        let now = chrono::Utc::now();
        store.submit_job(spec("j1", 0, 9, [Eye::Left]), now).await.unwrap();
        let err = store.submit_job(spec("j1", 0, 9, [Eye::Left]), now).await.unwrap_err();
        assert!(matches!(err, FarmError::Conflict(_)));
    }
}
