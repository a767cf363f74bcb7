//! Error types for the spool CLI
//!
//! Messages are user-facing and say what to do next where there is an
//! obvious next step.

use spool_common::SpoolError;
use spool_core::{BatchError, BatchStatus};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Batch(#[from] BatchError),

    #[error("{0}")]
    Common(#[from] SpoolError),

    #[error("Invalid argument {flag}: {message}")]
    InvalidArgument { flag: &'static str, message: String },

    #[error("Job execution {0} not found. Run 'spool list JOB_NAME' to see known executions.")]
    ExecutionNotFound(Uuid),

    /// The job ran but did not complete; the summary has already been printed
    #[error("Job execution {job_execution_id} ended {status}")]
    Unsuccessful {
        job_execution_id: Uuid,
        status: BatchStatus,
    },

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit status: 2 for bad arguments, like clap's usage errors
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument { .. } => 2,
            _ => 1,
        }
    }

    pub fn invalid_argument(flag: &'static str, message: impl Into<String>) -> Self {
        CliError::InvalidArgument {
            flag,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_errors_exit_with_usage_status() {
        assert_eq!(CliError::invalid_argument("--param", "bad").exit_code(), 2);
        assert_eq!(CliError::ExecutionNotFound(Uuid::nil()).exit_code(), 1);
        assert_eq!(
            CliError::Unsuccessful {
                job_execution_id: Uuid::nil(),
                status: BatchStatus::Failed,
            }
            .exit_code(),
            1
        );
    }
}
