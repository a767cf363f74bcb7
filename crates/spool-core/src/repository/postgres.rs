//! PostgreSQL execution repository
//!
//! Schema lives in the workspace `migrations/` directory. Identity
//! uniqueness is enforced by `UNIQUE (job_name, job_key)`; `create` locks
//! the matching row (or races on the insert) inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{decide_launch, ensure_running, JobRepository, LaunchDecision};
use crate::error::{BatchError, BatchResult};
use crate::model::{BatchStatus, JobExecution, JobParameters, ParameterValue, StepExecution};

/// Embedded schema migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, sqlx::FromRow)]
struct JobExecutionRow {
    id: Uuid,
    job_name: String,
    job_key: String,
    status: String,
    attempt: i32,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    exit_message: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ParameterRow {
    name: String,
    param_type: String,
    value: String,
    identifying: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct StepExecutionRow {
    id: Uuid,
    job_execution_id: Uuid,
    step_name: String,
    status: String,
    read_count: i64,
    write_count: i64,
    commit_count: i64,
    skip_count: i64,
    rollback_count: i64,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    exit_message: Option<String>,
}

impl StepExecutionRow {
    fn into_step(self) -> BatchResult<StepExecution> {
        Ok(StepExecution {
            id: self.id,
            job_execution_id: self.job_execution_id,
            step_name: self.step_name,
            status: parse_status(&self.status)?,
            read_count: from_db_count(self.read_count),
            write_count: from_db_count(self.write_count),
            commit_count: from_db_count(self.commit_count),
            skip_count: from_db_count(self.skip_count),
            rollback_count: from_db_count(self.rollback_count),
            start_time: self.start_time,
            end_time: self.end_time,
            last_updated: self.last_updated,
            exit_message: self.exit_message,
        })
    }
}

fn parse_status(raw: &str) -> BatchResult<BatchStatus> {
    BatchStatus::from_str(raw).map_err(BatchError::Repository)
}

fn from_db_count(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

const SELECT_JOB_EXECUTION: &str = r#"
    SELECT id, job_name, job_key, status, attempt, created_at,
           start_time, end_time, last_updated, exit_message
    FROM batch_job_executions
"#;

/// Execution repository backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> BatchResult<()> {
        info!("Running execution repository migrations");
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    async fn lock_by_identity(
        conn: &mut PgConnection,
        job_name: &str,
        job_key: &str,
    ) -> BatchResult<Option<JobExecutionRow>> {
        let sql = format!("{} WHERE job_name = $1 AND job_key = $2 FOR UPDATE", SELECT_JOB_EXECUTION);
        let row = sqlx::query_as::<_, JobExecutionRow>(&sql)
            .bind(job_name)
            .bind(job_key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Insert unless the identity already exists; false on conflict
    async fn try_insert(conn: &mut PgConnection, execution: &JobExecution) -> BatchResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO batch_job_executions (
                id, job_name, job_key, status, attempt, created_at, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_name, job_key) DO NOTHING
            "#,
        )
        .bind(execution.id)
        .bind(&execution.job_name)
        .bind(&execution.job_key)
        .bind(execution.status.as_str())
        .bind(execution.attempt as i32)
        .bind(execution.created_at)
        .bind(execution.last_updated)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(false);
        }

        for (name, param) in execution.parameters.iter() {
            sqlx::query(
                r#"
                INSERT INTO batch_job_execution_params (
                    job_execution_id, name, param_type, value, identifying
                )
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(execution.id)
            .bind(name)
            .bind(param.value.type_name())
            .bind(param.value.canonical())
            .bind(param.identifying)
            .execute(&mut *conn)
            .await?;
        }

        Ok(true)
    }

    async fn load_parameters(conn: &mut PgConnection, id: Uuid) -> BatchResult<JobParameters> {
        let rows = sqlx::query_as::<_, ParameterRow>(
            r#"
            SELECT name, param_type, value, identifying
            FROM batch_job_execution_params
            WHERE job_execution_id = $1
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        let mut parameters = JobParameters::new();
        for row in rows {
            let value = ParameterValue::parse(&row.param_type, &row.value).map_err(|e| {
                BatchError::repository(format!(
                    "stored parameter '{}' of execution {} is unreadable: {}",
                    row.name, id, e
                ))
            })?;
            parameters.insert(row.name, value, row.identifying);
        }
        Ok(parameters)
    }

    async fn load_steps(conn: &mut PgConnection, id: Uuid) -> BatchResult<Vec<StepExecution>> {
        let rows = sqlx::query_as::<_, StepExecutionRow>(
            r#"
            SELECT id, job_execution_id, step_name, status,
                   read_count, write_count, commit_count, skip_count, rollback_count,
                   start_time, end_time, last_updated, exit_message
            FROM batch_step_executions
            WHERE job_execution_id = $1
            ORDER BY created_at, step_name
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(StepExecutionRow::into_step).collect()
    }

    async fn hydrate(conn: &mut PgConnection, row: JobExecutionRow) -> BatchResult<JobExecution> {
        let parameters = Self::load_parameters(conn, row.id).await?;
        let step_executions = Self::load_steps(conn, row.id).await?;

        Ok(JobExecution {
            id: row.id,
            job_name: row.job_name,
            job_key: row.job_key,
            parameters,
            status: parse_status(&row.status)?,
            attempt: u32::try_from(row.attempt).unwrap_or(1),
            created_at: row.created_at,
            start_time: row.start_time,
            end_time: row.end_time,
            last_updated: row.last_updated,
            exit_message: row.exit_message,
            step_executions,
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn find_latest(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobExecution>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "{} WHERE job_name = $1 AND job_key = $2 ORDER BY created_at DESC LIMIT 1",
            SELECT_JOB_EXECUTION
        );
        let row = sqlx::query_as::<_, JobExecutionRow>(&sql)
            .bind(job_name)
            .bind(parameters.job_key())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn create(&self, job_name: &str, parameters: &JobParameters) -> BatchResult<JobExecution> {
        let job_key = parameters.job_key();
        let mut tx = self.pool.begin().await?;

        let mut prior = Self::lock_by_identity(&mut tx, job_name, &job_key).await?;
        if prior.is_none() {
            let fresh = JobExecution::new(job_name, parameters.clone());
            if Self::try_insert(&mut tx, &fresh).await? {
                tx.commit().await?;
                debug!(job_execution_id = %fresh.id, job_name, "Created job execution");
                return Ok(fresh);
            }
            // A concurrent launch inserted the identity first
            prior = Self::lock_by_identity(&mut tx, job_name, &job_key).await?;
        }

        let prior = match prior {
            Some(row) => Some(Self::hydrate(&mut tx, row).await?),
            None => None,
        };

        let execution = match decide_launch(job_name, parameters, prior)? {
            LaunchDecision::Create => {
                return Err(BatchError::repository(format!(
                    "identity of job '{}' vanished during launch",
                    job_name
                )))
            },
            LaunchDecision::Resume(resumed) => *resumed,
        };

        sqlx::query(
            r#"
            UPDATE batch_job_executions
            SET status = $1, attempt = $2, end_time = NULL, exit_message = NULL,
                last_updated = $3
            WHERE id = $4
            "#,
        )
        .bind(execution.status.as_str())
        .bind(execution.attempt as i32)
        .bind(execution.last_updated)
        .bind(execution.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            job_execution_id = %execution.id,
            job_name,
            attempt = execution.attempt,
            "Resuming job execution"
        );
        Ok(execution)
    }

    async fn add_step_execution(
        &self,
        job_execution_id: Uuid,
        step_name: &str,
    ) -> BatchResult<StepExecution> {
        let step = StepExecution::new(job_execution_id, step_name);

        sqlx::query(
            r#"
            INSERT INTO batch_step_executions (
                id, job_execution_id, step_name, status, last_updated
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(step.id)
        .bind(step.job_execution_id)
        .bind(&step.step_name)
        .bind(step.status.as_str())
        .bind(step.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(step)
    }

    async fn save_job_execution(&self, execution: &JobExecution) -> BatchResult<()> {
        let mut conn = self.pool.acquire().await?;
        update_job_execution(&mut conn, execution).await
    }

    async fn save_step_execution(&self, step: &StepExecution) -> BatchResult<()> {
        let mut conn = self.pool.acquire().await?;
        update_step_execution(&mut conn, step).await
    }

    async fn get_job_execution(&self, id: Uuid) -> BatchResult<Option<JobExecution>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("{} WHERE id = $1", SELECT_JOB_EXECUTION);
        let row = sqlx::query_as::<_, JobExecutionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn list_job_executions(&self, job_name: &str) -> BatchResult<Vec<JobExecution>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("{} WHERE job_name = $1 ORDER BY created_at DESC", SELECT_JOB_EXECUTION);
        let rows = sqlx::query_as::<_, JobExecutionRow>(&sql)
            .bind(job_name)
            .fetch_all(&mut *conn)
            .await?;

        let mut executions = Vec::with_capacity(rows.len());
        for row in rows {
            executions.push(Self::hydrate(&mut conn, row).await?);
        }
        Ok(executions)
    }

    async fn abandon(&self, id: Uuid, reason: &str) -> BatchResult<Option<JobExecution>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("{} WHERE id = $1 FOR UPDATE", SELECT_JOB_EXECUTION);
        let row = sqlx::query_as::<_, JobExecutionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut execution = Self::hydrate(&mut tx, row).await?;
        ensure_running(&execution)?;
        let running: Vec<Uuid> = execution
            .step_executions
            .iter()
            .filter(|s| s.status.is_running())
            .map(|s| s.id)
            .collect();

        execution.abandon(reason);
        for step in execution.step_executions.iter().filter(|s| running.contains(&s.id)) {
            update_step_execution(&mut tx, step).await?;
        }
        update_job_execution(&mut tx, &execution).await?;
        tx.commit().await?;

        info!(
            job_execution_id = %execution.id,
            job_name = %execution.job_name,
            steps = running.len(),
            "Abandoned job execution"
        );
        Ok(Some(execution))
    }

    fn database(&self) -> Option<&PgPool> {
        Some(&self.pool)
    }
}

async fn update_job_execution(conn: &mut PgConnection, execution: &JobExecution) -> BatchResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE batch_job_executions
        SET status = $1, attempt = $2, start_time = $3, end_time = $4,
            exit_message = $5, last_updated = NOW()
        WHERE id = $6
        "#,
    )
    .bind(execution.status.as_str())
    .bind(execution.attempt as i32)
    .bind(execution.start_time)
    .bind(execution.end_time)
    .bind(&execution.exit_message)
    .bind(execution.id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(BatchError::repository(format!(
            "job execution {} not found",
            execution.id
        )));
    }
    Ok(())
}

/// Write a step's status and counters on `conn`
///
/// Runs inside the caller's transaction when `conn` is one; the chunk
/// executor uses this to commit counters together with sink rows.
pub async fn update_step_execution(conn: &mut PgConnection, step: &StepExecution) -> BatchResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE batch_step_executions
        SET status = $1, read_count = $2, write_count = $3, commit_count = $4,
            skip_count = $5, rollback_count = $6, start_time = $7, end_time = $8,
            exit_message = $9, last_updated = NOW()
        WHERE id = $10
        "#,
    )
    .bind(step.status.as_str())
    .bind(to_db_count(step.read_count))
    .bind(to_db_count(step.write_count))
    .bind(to_db_count(step.commit_count))
    .bind(to_db_count(step.skip_count))
    .bind(to_db_count(step.rollback_count))
    .bind(step.start_time)
    .bind(step.end_time)
    .bind(&step.exit_message)
    .bind(step.id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(BatchError::repository(format!(
            "step execution {} not found",
            step.id
        )));
    }
    Ok(())
}

/// Whether two pools connect to the same database
pub fn same_database(a: &PgPool, b: &PgPool) -> bool {
    let (a, b) = (a.connect_options(), b.connect_options());
    a.get_host() == b.get_host()
        && a.get_port() == b.get_port()
        && a.get_database() == b.get_database()
}
