//! Execution query result

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::{JobExecution, StepExecution};
use super::status::BatchStatus;

/// Externally visible snapshot of a job execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub job_execution_id: Uuid,
    pub job_name: String,
    pub status: BatchStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_message: Option<String>,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub step_name: String,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub skip_count: u64,
    pub status: BatchStatus,
}

impl From<&StepExecution> for StepSummary {
    fn from(step: &StepExecution) -> Self {
        Self {
            step_name: step.step_name.clone(),
            read_count: step.read_count,
            write_count: step.write_count,
            commit_count: step.commit_count,
            skip_count: step.skip_count,
            status: step.status,
        }
    }
}

impl From<&JobExecution> for ExecutionSummary {
    fn from(execution: &JobExecution) -> Self {
        Self {
            job_execution_id: execution.id,
            job_name: execution.job_name.clone(),
            status: execution.status,
            attempt: execution.attempt,
            exit_message: execution.exit_message.clone(),
            steps: execution.step_executions.iter().map(StepSummary::from).collect(),
        }
    }
}
