//! `spool abandon` command implementation
//!
//! Clears a run left STARTED by a process that died, so the same import can
//! be relaunched and resume from its last committed chunk.

use spool_core::repository::ABANDONED;
use spool_core::{ExecutionSummary, JobRepository};
use tracing::info;
use uuid::Uuid;

use crate::error::{CliError, Result};

/// Mark a running execution FAILED and print it as JSON
pub async fn run(database_url: Option<&str>, execution_id: Uuid, reason: Option<&str>) -> Result<()> {
    let (_, repository) = super::connect(database_url).await?;
    let execution = repository
        .abandon(execution_id, reason.unwrap_or(ABANDONED))
        .await?
        .ok_or(CliError::ExecutionNotFound(execution_id))?;

    info!(
        job_execution_id = %execution.id,
        job_name = %execution.job_name,
        "Execution marked failed; relaunch with the same --param values to resume"
    );
    let summary = ExecutionSummary::from(&execution);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
