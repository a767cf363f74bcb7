//! `spool list` command implementation
//!
//! Shows every execution of a job, newest first, one row per execution.

use spool_core::{JobExecution, JobRepository};

use crate::error::Result;

/// List executions of `job_name`
pub async fn run(database_url: Option<&str>, job_name: &str) -> Result<()> {
    let (_, repository) = super::connect(database_url).await?;
    let executions = repository.list_job_executions(job_name).await?;

    if executions.is_empty() {
        println!("No executions found for job '{}'.", job_name);
        return Ok(());
    }

    print!("{}", format_as_table(&executions));
    Ok(())
}

fn format_as_table(executions: &[JobExecution]) -> String {
    use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Execution", "Status", "Attempt", "Started", "Ended", "Read", "Written", "Skipped",
            "Parameters",
        ]);

    for execution in executions {
        let (read, written, skipped) = execution.step_executions.iter().fold(
            (0u64, 0u64, 0u64),
            |(r, w, s), step| (r + step.read_count, w + step.write_count, s + step.skip_count),
        );
        let parameters = execution
            .parameters
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(name, p)| format!("{}={}", name, p.value))
            .collect::<Vec<_>>()
            .join(" ");

        table.add_row(vec![
            execution.id.to_string(),
            execution.status.to_string(),
            execution.attempt.to_string(),
            format_time(execution.start_time),
            format_time(execution.end_time),
            read.to_string(),
            written.to_string(),
            skipped.to_string(),
            parameters,
        ]);
    }

    format!("{}\n", table)
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_core::{BatchStatus, JobParameters, StepExecution};

    #[test]
    fn test_table_lists_identifying_parameters_and_totals() {
        let params = JobParameters::builder()
            .add_string("inputFile", "customers.csv", true)
            .add_string("requestedBy", "ops", false)
            .build();
        let mut execution = JobExecution::new("importJob", params);
        let mut step = StepExecution::new(execution.id, "import");
        step.read_count = 250;
        step.write_count = 240;
        step.skip_count = 10;
        execution.record_step(step);
        execution.mark_started();
        execution.finish(BatchStatus::Completed, None);

        let rendered = format_as_table(&[execution]);
        assert!(rendered.contains("COMPLETED"));
        assert!(rendered.contains("inputFile=customers.csv"));
        assert!(!rendered.contains("requestedBy"));
        assert!(rendered.contains("240"));
    }
}
