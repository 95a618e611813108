//! SQLite job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dockhand_core::store::{JobLogger, JobStore};
use dockhand_core::{Job, JobId};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::repo::logs::SqliteJobLogger;
use crate::{DbError, DbResult, create_memory_pool, create_pool, run_migrations};

/// A job record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: i64,
    owner: String,
    repo: String,
    branch: String,
    number: i64,
    sha: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    success: bool,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: Some(JobId::new(row.id as u64)),
            number: Some(row.number as u64),
            owner: row.owner,
            repo: row.repo,
            branch: row.branch,
            sha: row.sha,
            started_at: row.started_at,
            ended_at: row.ended_at,
            success: row.success,
        }
    }
}

/// Durable job store on SQLite.
///
/// All writes (saves and log appends) go through one lock so each runs as the
/// only write transaction in flight. Reads are not serialized.
pub struct SqliteJobStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteJobStore {
    /// Wrap a pool whose migrations have already been run.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open (or create) the database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> DbResult<Self> {
        let pool = create_pool(path).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// A store over a fresh in-memory database.
    pub async fn in_memory() -> DbResult<Self> {
        let pool = create_memory_pool().await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Concrete logger for a saved job.
    pub fn sqlite_logger(&self, job: &Job) -> dockhand_core::Result<SqliteJobLogger> {
        let locator = job.require_locator()?;
        Ok(SqliteJobLogger::new(
            self.pool.clone(),
            self.write_lock.clone(),
            locator,
        ))
    }

    async fn insert(&self, job: &mut Job) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        // The counter row and the job row commit together, so a failed insert
        // leaves no gap in the numbering.
        let number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO job_sequences (owner, repo, branch, last_number)
            VALUES (?, ?, ?, 1)
            ON CONFLICT (owner, repo, branch)
            DO UPDATE SET last_number = job_sequences.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(&job.owner)
        .bind(&job.repo)
        .bind(&job.branch)
        .fetch_one(&mut *tx)
        .await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (owner, repo, branch, number, sha, started_at, ended_at, success)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&job.owner)
        .bind(&job.repo)
        .bind(&job.branch)
        .bind(number)
        .bind(&job.sha)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(job.success)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        job.id = Some(JobId::new(id as u64));
        job.number = Some(number as u64);
        debug!(id, number, owner = %job.owner, repo = %job.repo, branch = %job.branch, "Numbered job");
        Ok(())
    }

    async fn update(&self, id: JobId, job: &Job) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET sha = ?, ended_at = ?, success = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.sha)
        .bind(job.ended_at)
        .bind(job.success)
        .bind(id.get() as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("job {}", id)));
        }
        Ok(())
    }

    async fn distinct(&self, sql: &str, binds: &[&str]) -> DbResult<Vec<String>> {
        let mut query = sqlx::query_scalar::<_, String>(sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &mut Job) -> dockhand_core::Result<()> {
        let _guard = self.write_lock.lock().await;
        match job.id {
            Some(id) => self.update(id, job).await?,
            None => self.insert(job).await?,
        }
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> dockhand_core::Result<Job> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id.get() as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        Ok(row.into())
    }

    async fn get_by_number(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        number: u64,
    ) -> dockhand_core::Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE owner = ? AND repo = ? AND branch = ? AND number = ?
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(branch)
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| {
            DbError::NotFound(format!("job {}/{}@{}#{}", owner, repo, branch, number))
        })?;
        Ok(row.into())
    }

    async fn list(&self, owner: &str, repo: &str, branch: &str) -> dockhand_core::Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE owner = ? AND repo = ? AND branch = ?
            ORDER BY number DESC
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(branch)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        if rows.is_empty() {
            return Err(DbError::NotFound(format!("jobs for {}/{}@{}", owner, repo, branch)).into());
        }
        Ok(rows.into_iter().map(Job::from).collect())
    }

    async fn list_owners(&self) -> dockhand_core::Result<Vec<String>> {
        Ok(self
            .distinct("SELECT DISTINCT owner FROM jobs ORDER BY owner", &[])
            .await?)
    }

    async fn list_repos(&self, owner: &str) -> dockhand_core::Result<Vec<String>> {
        Ok(self
            .distinct(
                "SELECT DISTINCT repo FROM jobs WHERE owner = ? ORDER BY repo",
                &[owner],
            )
            .await?)
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> dockhand_core::Result<Vec<String>> {
        Ok(self
            .distinct(
                "SELECT DISTINCT branch FROM jobs WHERE owner = ? AND repo = ? ORDER BY branch",
                &[owner, repo],
            )
            .await?)
    }

    fn logger(&self, job: &Job) -> dockhand_core::Result<Arc<dyn JobLogger>> {
        Ok(Arc::new(self.sqlite_logger(job)?))
    }
}
