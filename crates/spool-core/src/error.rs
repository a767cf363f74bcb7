//! Engine error taxonomy
//!
//! Collaborators (sources, transforms, sinks, tasklets) report failures as
//! `anyhow::Error`; the engine wraps them in the variant matching the
//! component that raised them.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type BatchResult<T> = std::result::Result<T, BatchError>;

#[derive(Error, Debug)]
pub enum BatchError {
    /// Identifying parameters match an execution that already completed
    #[error(
        "Job '{job_name}' already completed for identifying parameters [{identity}] \
         (execution {job_execution_id}); supply new identifying parameters to run it again"
    )]
    DuplicateExecution {
        job_name: String,
        identity: String,
        job_execution_id: Uuid,
    },

    #[error("Job '{job_name}' is already running for these identifying parameters (execution {job_execution_id})")]
    ExecutionAlreadyRunning {
        job_name: String,
        job_execution_id: Uuid,
    },

    /// Only STARTING/STARTED executions can be abandoned
    #[error("Job execution {job_execution_id} is {status}, not running")]
    NotRunning {
        job_execution_id: Uuid,
        status: crate::model::BatchStatus,
    },

    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid job definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to read item {ordinal} in step '{step}': {source:#}")]
    SourceRead {
        step: String,
        ordinal: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to transform item {ordinal} in step '{step}': {source:#}")]
    Transform {
        step: String,
        ordinal: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write chunk {chunk} ({items} items) in step '{step}': {source:#}")]
    SinkWrite {
        step: String,
        chunk: u64,
        items: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The transaction holding a chunk's rows and counters did not commit
    #[error("Failed to commit chunk {chunk} in step '{step}': {source:#}")]
    ChunkCommit {
        step: String,
        chunk: u64,
        #[source]
        source: anyhow::Error,
    },

    /// Step-level failure outside the read/transform/write loop
    /// (component construction, tasklet body)
    #[error("Step '{step}' failed: {source:#}")]
    Step {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Execution repository error: {0}")]
    Repository(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] spool_common::SpoolError),
}

impl BatchError {
    pub fn repository(message: impl Into<String>) -> Self {
        BatchError::Repository(message.into())
    }

    /// True when the execution state store itself failed
    pub fn is_repository_failure(&self) -> bool {
        matches!(
            self,
            BatchError::Repository(_) | BatchError::Database(_) | BatchError::Migration(_)
        )
    }

    /// True for failures raised by a step's collaborators; these end up in
    /// the step's exit message rather than crossing the launcher boundary
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            BatchError::SourceRead { .. }
                | BatchError::Transform { .. }
                | BatchError::SinkWrite { .. }
                | BatchError::ChunkCommit { .. }
                | BatchError::Step { .. }
        )
    }
}
