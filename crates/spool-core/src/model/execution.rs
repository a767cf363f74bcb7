//! Job and step execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parameters::JobParameters;
use super::status::BatchStatus;

/// One attempt (or series of resumed attempts) to run a job for a given
/// identifying parameter set
///
/// Resuming a failed or stopped execution keeps its id and bumps `attempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_name: String,
    /// Digest of the identifying parameters, see [`JobParameters::job_key`]
    pub job_key: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub exit_message: Option<String>,
    /// Step executions in the order they were first started
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(job_name: impl Into<String>, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            job_key: parameters.job_key(),
            parameters,
            status: BatchStatus::Starting,
            attempt: 1,
            created_at: now,
            start_time: None,
            end_time: None,
            last_updated: now,
            exit_message: None,
            step_executions: Vec::new(),
        }
    }

    pub fn step(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.step_name == step_name)
    }

    /// Replace the stored copy of a step execution, or append it
    pub fn record_step(&mut self, step: StepExecution) {
        match self.step_executions.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step,
            None => self.step_executions.push(step),
        }
    }

    /// Reset for another attempt; step executions and their counters are kept
    pub fn prepare_restart(&mut self) {
        self.attempt += 1;
        self.status = BatchStatus::Starting;
        self.end_time = None;
        self.exit_message = None;
        self.last_updated = Utc::now();
    }

    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.status = BatchStatus::Started;
        self.start_time = Some(now);
        self.end_time = None;
        self.last_updated = now;
    }

    pub fn finish(&mut self, status: BatchStatus, exit_message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.last_updated = now;
        self.exit_message = exit_message;
    }

    /// Mark a running execution whose process died as FAILED
    ///
    /// Running steps fail with it; their counters still describe the last
    /// committed chunk, which is where a relaunch picks up.
    pub fn abandon(&mut self, reason: &str) {
        for step in self.step_executions.iter_mut().filter(|s| s.status.is_running()) {
            step.finish(BatchStatus::Failed, Some(reason.to_string()));
        }
        self.finish(BatchStatus::Failed, Some(reason.to_string()));
    }

    /// Sum of write counts across all steps
    pub fn total_written(&self) -> u64 {
        self.step_executions.iter().map(|s| s.write_count).sum()
    }
}

/// A single step's run within a [`JobExecution`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    /// Owning job execution (back-reference only)
    pub job_execution_id: Uuid,
    pub step_name: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub skip_count: u64,
    /// Chunks abandoned after a transform or sink failure
    pub rollback_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub exit_message: Option<String>,
}

impl StepExecution {
    pub fn new(job_execution_id: Uuid, step_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            skip_count: 0,
            rollback_count: 0,
            start_time: None,
            end_time: None,
            last_updated: Utc::now(),
            exit_message: None,
        }
    }

    /// Counters are kept: a resumed step continues from its last commit
    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.status = BatchStatus::Started;
        self.start_time = Some(now);
        self.end_time = None;
        self.exit_message = None;
        self.last_updated = now;
    }

    pub fn finish(&mut self, status: BatchStatus, exit_message: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.last_updated = now;
        self.exit_message = exit_message;
    }

    /// `write + skip == read`
    pub fn is_balanced(&self) -> bool {
        self.write_count + self.skip_count == self.read_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_execution_is_starting_with_identity_key() {
        let params = JobParameters::builder()
            .add_string("runDate", "2025-02-05", true)
            .build();
        let execution = JobExecution::new("customerImportJob", params.clone());

        assert_eq!(execution.status, BatchStatus::Starting);
        assert_eq!(execution.attempt, 1);
        assert_eq!(execution.job_key, params.job_key());
        assert!(execution.start_time.is_none());
    }

    #[test]
    fn test_restart_keeps_id_and_steps() {
        let mut execution = JobExecution::new("job", JobParameters::new());
        let mut step = StepExecution::new(execution.id, "load");
        step.read_count = 200;
        step.write_count = 200;
        step.commit_count = 2;
        step.finish(BatchStatus::Failed, Some("boom".to_string()));
        execution.record_step(step);
        execution.finish(BatchStatus::Failed, Some("boom".to_string()));

        let id = execution.id;
        execution.prepare_restart();

        assert_eq!(execution.id, id);
        assert_eq!(execution.attempt, 2);
        assert_eq!(execution.status, BatchStatus::Starting);
        assert!(execution.exit_message.is_none());
        assert_eq!(execution.step("load").map(|s| s.commit_count), Some(2));
    }

    #[test]
    fn test_abandon_fails_running_steps_only() {
        let mut execution = JobExecution::new("job", JobParameters::new());
        let mut done = StepExecution::new(execution.id, "extract");
        done.finish(BatchStatus::Completed, None);
        let mut running = StepExecution::new(execution.id, "load");
        running.mark_started();
        running.read_count = 30;
        running.write_count = 30;
        execution.record_step(done);
        execution.record_step(running);
        execution.mark_started();

        execution.abandon("worker lost");

        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.step("extract").unwrap().status, BatchStatus::Completed);
        let load = execution.step("load").unwrap();
        assert_eq!(load.status, BatchStatus::Failed);
        assert_eq!(load.read_count, 30);
        assert_eq!(load.exit_message.as_deref(), Some("worker lost"));
    }

    #[test]
    fn test_record_step_replaces_by_id() {
        let mut execution = JobExecution::new("job", JobParameters::new());
        let mut step = StepExecution::new(execution.id, "load");
        execution.record_step(step.clone());
        step.read_count = 10;
        step.write_count = 10;
        execution.record_step(step);

        assert_eq!(execution.step_executions.len(), 1);
        assert_eq!(execution.total_written(), 10);
    }

    #[test]
    fn test_step_restart_keeps_counters() {
        let mut step = StepExecution::new(Uuid::new_v4(), "load");
        step.read_count = 7;
        step.skip_count = 2;
        step.write_count = 5;
        step.finish(BatchStatus::Failed, Some("sink down".to_string()));

        step.mark_started();

        assert_eq!(step.status, BatchStatus::Started);
        assert_eq!(step.read_count, 7);
        assert!(step.is_balanced());
        assert!(step.exit_message.is_none());
    }
}
