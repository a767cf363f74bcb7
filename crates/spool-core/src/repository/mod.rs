//! Execution repository
//!
//! Durable store of job and step executions, their parameters and counters.
//! It is the source of truth for whether an identifying parameter set has
//! already completed.
//!
//! There is at most one [`JobExecution`] per `(job_name, job_key)`: a retry
//! resumes the failed execution in place (same id, next attempt) instead of
//! creating a sibling. Implementations enforce that uniqueness atomically,
//! which serializes concurrent launches of the same logical request.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BatchError, BatchResult};
use crate::model::{BatchStatus, JobExecution, JobParameters, StepExecution};

pub use memory::InMemoryJobRepository;
pub use postgres::PgJobRepository;

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Most recent execution of `job_name` whose identifying parameters equal
    /// the identifying subset of `parameters`
    async fn find_latest(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobExecution>>;

    /// Apply the launch policy and return the execution to run
    ///
    /// - no prior execution: a new one in `STARTING`
    /// - prior `FAILED`/`STOPPED`: the same execution, reset to `STARTING`
    ///   with the next attempt number and its original parameters
    /// - prior `COMPLETED`: [`BatchError::DuplicateExecution`]
    /// - prior still running: [`BatchError::ExecutionAlreadyRunning`]
    ///
    /// The lookup and the insert/update happen under one lock or transaction.
    async fn create(&self, job_name: &str, parameters: &JobParameters) -> BatchResult<JobExecution>;

    /// Register a new step execution under `job_execution_id`
    async fn add_step_execution(
        &self,
        job_execution_id: Uuid,
        step_name: &str,
    ) -> BatchResult<StepExecution>;

    /// Persist the job-level fields (status, times, attempt, exit message)
    async fn save_job_execution(&self, execution: &JobExecution) -> BatchResult<()>;

    /// Persist a step's status and counters
    async fn save_step_execution(&self, step: &StepExecution) -> BatchResult<()>;

    /// Execution with its parameters and step executions
    async fn get_job_execution(&self, id: Uuid) -> BatchResult<Option<JobExecution>>;

    /// Executions of `job_name`, newest first
    async fn list_job_executions(&self, job_name: &str) -> BatchResult<Vec<JobExecution>>;

    /// Mark a STARTING/STARTED execution and its running steps FAILED
    ///
    /// For executions left running by a process that died: afterwards the
    /// same identifying parameters resume from the last committed chunk.
    /// Counters are untouched. `None` if there is no such execution;
    /// [`BatchError::NotRunning`] if it already ended.
    async fn abandon(&self, id: Uuid, reason: &str) -> BatchResult<Option<JobExecution>>;

    /// PostgreSQL pool holding the execution tables, if this repository has one
    ///
    /// Chunk commits use it to put sink rows and step counters in one
    /// transaction.
    fn database(&self) -> Option<&PgPool> {
        None
    }
}

/// Default exit message of an abandoned execution
pub const ABANDONED: &str = "Abandoned while running; marked failed";

fn ensure_running(execution: &JobExecution) -> BatchResult<()> {
    if execution.status.is_running() {
        Ok(())
    } else {
        Err(BatchError::NotRunning {
            job_execution_id: execution.id,
            status: execution.status,
        })
    }
}

/// What a launch request turns into, given the prior execution (if any)
#[derive(Debug)]
pub enum LaunchDecision {
    Create,
    Resume(Box<JobExecution>),
}

/// Launch policy shared by all repository implementations
pub fn decide_launch(
    job_name: &str,
    parameters: &JobParameters,
    prior: Option<JobExecution>,
) -> BatchResult<LaunchDecision> {
    let Some(prior) = prior else {
        return Ok(LaunchDecision::Create);
    };

    match prior.status {
        BatchStatus::Completed => Err(BatchError::DuplicateExecution {
            job_name: job_name.to_string(),
            identity: parameters.identity_string(),
            job_execution_id: prior.id,
        }),
        BatchStatus::Starting | BatchStatus::Started => Err(BatchError::ExecutionAlreadyRunning {
            job_name: job_name.to_string(),
            job_execution_id: prior.id,
        }),
        BatchStatus::Failed | BatchStatus::Stopped => {
            let mut resumed = prior;
            resumed.prepare_restart();
            Ok(LaunchDecision::Resume(Box::new(resumed)))
        },
    }
}
