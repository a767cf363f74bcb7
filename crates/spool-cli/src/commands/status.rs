//! `spool status` command implementation

use spool_core::{ExecutionSummary, JobRepository};
use uuid::Uuid;

use crate::error::{CliError, Result};

/// Print one execution and its steps as JSON
pub async fn run(database_url: Option<&str>, execution_id: Uuid) -> Result<()> {
    let (_, repository) = super::connect(database_url).await?;
    let execution = repository
        .get_job_execution(execution_id)
        .await?
        .ok_or(CliError::ExecutionNotFound(execution_id))?;

    let summary = ExecutionSummary::from(&execution);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
