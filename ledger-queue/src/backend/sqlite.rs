use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::{
    QueueResult, JobId, FailedJobId, NewJob, JobRecord, FailedJobRecord,
    backend::{LedgerBackend, payload_uuid, DEFAULT_CLAIM_ATTEMPTS},
    types::time,
};

const JOB_COLUMNS: &str = "id, queue, payload, attempts, available_at, reserved_at, created_at";

const FAILED_COLUMNS: &str = "id, job_id, uuid, queue, payload, attempts, error, failed_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    queue: String,
    payload: Vec<u8>,
    attempts: i64,
    available_at: i64,
    reserved_at: Option<i64>,
    created_at: i64,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        Self {
            id: JobId(row.id),
            queue: row.queue,
            payload: row.payload,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            available_at: time::from_millis(row.available_at),
            reserved_at: row.reserved_at.map(time::from_millis),
            created_at: time::from_millis(row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FailedRow {
    id: i64,
    job_id: i64,
    uuid: Option<String>,
    queue: String,
    payload: Vec<u8>,
    attempts: i64,
    error: String,
    failed_at: i64,
}

impl From<FailedRow> for FailedJobRecord {
    fn from(row: FailedRow) -> Self {
        Self {
            id: FailedJobId(row.id),
            job_id: JobId(row.job_id),
            uuid: row.uuid,
            queue: row.queue,
            payload: row.payload,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            error: row.error,
            failed_at: time::from_millis(row.failed_at),
        }
    }
}

/// Ledger stored in SQLite tables `jobs` and `failed_jobs`.
///
/// Timestamps are unix milliseconds. Every transition is a single
/// conditional statement or a short transaction, so several worker processes
/// may share one database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    claim_attempts: u32,
}

impl SqliteBackend {
    /// Wrap an existing pool; call [`SqliteBackend::migrate`] before use
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            claim_attempts: DEFAULT_CLAIM_ATTEMPTS,
        }
    }

    /// Open (creating if missing) the database at `url`
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await?;

        info!("Connected to SQLite ledger at {}", url);
        Ok(Self::new(pool))
    }

    /// Private in-memory database on a single connection.
    ///
    /// The connection is never recycled: closing it would drop the database.
    pub async fn in_memory() -> QueueResult<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let backend = Self::new(pool);
        backend.migrate().await?;
        Ok(backend)
    }

    /// Bound on select/update rounds per `claim_next` call
    pub fn with_claim_attempts(mut self, attempts: u32) -> Self {
        self.claim_attempts = attempts.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the ledger tables and claim index if they do not exist
    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                queue        TEXT    NOT NULL,
                payload      BLOB    NOT NULL,
                attempts     INTEGER NOT NULL DEFAULT 0,
                available_at INTEGER NOT NULL,
                reserved_at  INTEGER NULL,
                created_at   INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS jobs_queue_reserved_at_available_at_index \
             ON jobs (queue, reserved_at, available_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS failed_jobs (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id    INTEGER NOT NULL,
                uuid      TEXT    NULL,
                queue     TEXT    NOT NULL,
                payload   BLOB    NOT NULL,
                attempts  INTEGER NOT NULL,
                error     TEXT    NOT NULL,
                failed_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite ledger schema is up to date");
        Ok(())
    }

    async fn select_candidate(&self, queue: &str, now: i64, expired_before: i64) -> QueueResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM jobs \
             WHERE queue = ?1 AND available_at <= ?2 \
               AND (reserved_at IS NULL OR reserved_at <= ?3) \
             ORDER BY created_at, id \
             LIMIT 1",
        )
        .bind(queue)
        .bind(now)
        .bind(expired_before)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn reserve(&self, id: i64, queue: &str, now: i64, expired_before: i64) -> QueueResult<Option<JobRecord>> {
        let sql = format!(
            "UPDATE jobs SET reserved_at = ?1, attempts = attempts + 1 \
             WHERE id = ?2 AND queue = ?3 AND available_at <= ?1 \
               AND (reserved_at IS NULL OR reserved_at <= ?4) \
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .bind(id)
            .bind(queue)
            .bind(expired_before)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(JobRecord::from))
    }
}

#[async_trait]
impl LedgerBackend for SqliteBackend {
    async fn insert(&self, job: NewJob) -> QueueResult<JobId> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO jobs (queue, payload, attempts, available_at, reserved_at, created_at) \
             VALUES (?1, ?2, 0, ?3, NULL, ?4) \
             RETURNING id",
        )
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(time::to_millis(job.available_at))
        .bind(time::to_millis(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(JobId(id))
    }

    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> QueueResult<Option<JobRecord>> {
        let now_ms = time::to_millis(now);
        let expired_before = time::to_millis(time::before(now, lease));

        for round in 1..=self.claim_attempts {
            let Some(id) = self.select_candidate(queue, now_ms, expired_before).await? else {
                return Ok(None);
            };

            if let Some(record) = self.reserve(id, queue, now_ms, expired_before).await? {
                return Ok(Some(record));
            }

            debug!(job_id = id, round, "Lost claim race, selecting again");
        }

        Ok(None)
    }

    async fn mark_succeeded(&self, claim: &JobRecord) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1 AND reserved_at = ?2")
            .bind(claim.id.as_i64())
            .bind(claim.reserved_at.map(time::to_millis))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, claim: &JobRecord, available_at: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET reserved_at = NULL, available_at = ?1 \
             WHERE id = ?2 AND reserved_at = ?3",
        )
        .bind(time::to_millis(available_at))
        .bind(claim.id.as_i64())
        .bind(claim.reserved_at.map(time::to_millis))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed_permanently(&self, claim: &JobRecord, error: &str) -> QueueResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Write first: a deferred transaction that reads before writing
        // cannot wait out a concurrent writer and fails with SQLITE_BUSY.
        let sql = format!("DELETE FROM jobs WHERE id = ?1 AND reserved_at = ?2 RETURNING {JOB_COLUMNS}");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(claim.id.as_i64())
            .bind(claim.reserved_at.map(time::to_millis))
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(
            "INSERT INTO failed_jobs (job_id, uuid, queue, payload, attempts, error, failed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(row.id)
        .bind(payload_uuid(&row.payload))
        .bind(&row.queue)
        .bind(&row.payload)
        .bind(row.attempts)
        .bind(error)
        .bind(time::to_millis(Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn reclaim_expired(&self, lease: Duration, now: DateTime<Utc>) -> QueueResult<u64> {
        let expired_before = time::to_millis(time::before(now, lease));

        let result = sqlx::query(
            "UPDATE jobs SET reserved_at = NULL \
             WHERE reserved_at IS NOT NULL AND reserved_at <= ?1",
        )
        .bind(expired_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(JobRecord::from))
    }

    async fn size(&self, queue: &str) -> QueueResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE queue = ?1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn clear(&self, queue: &str) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE queue = ?1")
            .bind(queue)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn failed_jobs(&self, limit: usize) -> QueueResult<Vec<FailedJobRecord>> {
        let sql = format!("SELECT {FAILED_COLUMNS} FROM failed_jobs ORDER BY id DESC LIMIT ?1");
        let rows = sqlx::query_as::<_, FailedRow>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(FailedJobRecord::from).collect())
    }

    async fn retry_failed(&self, id: FailedJobId) -> QueueResult<Option<JobId>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("DELETE FROM failed_jobs WHERE id = ?1 RETURNING {FAILED_COLUMNS}");
        let row = sqlx::query_as::<_, FailedRow>(&sql)
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let now = time::to_millis(Utc::now());
        let job_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO jobs (queue, payload, attempts, available_at, reserved_at, created_at) \
             VALUES (?1, ?2, 0, ?3, NULL, ?3) \
             RETURNING id",
        )
        .bind(&row.queue)
        .bind(&row.payload)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(JobId(job_id)))
    }

    async fn forget_failed(&self, id: FailedJobId) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM failed_jobs WHERE id = ?1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn flush_failed(&self) -> QueueResult<u64> {
        let result = sqlx::query("DELETE FROM failed_jobs")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
