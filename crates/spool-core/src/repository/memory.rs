//! In-memory execution repository
//!
//! Suitable for tests and single-process runs where durability across
//! restarts is not needed. A single mutex guards all state, so `create` is
//! serialized per repository.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{decide_launch, ensure_running, JobRepository, LaunchDecision};
use crate::error::{BatchError, BatchResult};
use crate::model::{JobExecution, JobParameters, StepExecution};

#[derive(Default)]
struct State {
    executions: HashMap<Uuid, JobExecution>,
    /// (job_name, job_key) -> execution id
    identities: HashMap<(String, String), Uuid>,
}

impl State {
    fn by_identity(&self, job_name: &str, job_key: &str) -> Option<&JobExecution> {
        self.identities
            .get(&(job_name.to_string(), job_key.to_string()))
            .and_then(|id| self.executions.get(id))
    }
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<State>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_latest(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<Option<JobExecution>> {
        let state = self.state.lock().await;
        Ok(state.by_identity(job_name, &parameters.job_key()).cloned())
    }

    async fn create(&self, job_name: &str, parameters: &JobParameters) -> BatchResult<JobExecution> {
        let mut state = self.state.lock().await;
        let job_key = parameters.job_key();
        let prior = state.by_identity(job_name, &job_key).cloned();

        let execution = match decide_launch(job_name, parameters, prior)? {
            LaunchDecision::Create => JobExecution::new(job_name, parameters.clone()),
            LaunchDecision::Resume(resumed) => *resumed,
        };

        state
            .identities
            .insert((job_name.to_string(), job_key), execution.id);
        state.executions.insert(execution.id, execution.clone());

        Ok(execution)
    }

    async fn add_step_execution(
        &self,
        job_execution_id: Uuid,
        step_name: &str,
    ) -> BatchResult<StepExecution> {
        let mut state = self.state.lock().await;
        let execution = state.executions.get_mut(&job_execution_id).ok_or_else(|| {
            BatchError::repository(format!("job execution {} not found", job_execution_id))
        })?;

        if execution.step(step_name).is_some() {
            return Err(BatchError::repository(format!(
                "step '{}' already registered for job execution {}",
                step_name, job_execution_id
            )));
        }

        let step = StepExecution::new(job_execution_id, step_name);
        execution.step_executions.push(step.clone());
        Ok(step)
    }

    async fn save_job_execution(&self, execution: &JobExecution) -> BatchResult<()> {
        let mut state = self.state.lock().await;
        let stored = state.executions.get_mut(&execution.id).ok_or_else(|| {
            BatchError::repository(format!("job execution {} not found", execution.id))
        })?;

        stored.status = execution.status;
        stored.attempt = execution.attempt;
        stored.start_time = execution.start_time;
        stored.end_time = execution.end_time;
        stored.exit_message = execution.exit_message.clone();
        stored.last_updated = Utc::now();
        Ok(())
    }

    async fn save_step_execution(&self, step: &StepExecution) -> BatchResult<()> {
        let mut state = self.state.lock().await;
        let execution = state
            .executions
            .get_mut(&step.job_execution_id)
            .ok_or_else(|| {
                BatchError::repository(format!(
                    "job execution {} not found",
                    step.job_execution_id
                ))
            })?;

        let stored = execution
            .step_executions
            .iter_mut()
            .find(|s| s.id == step.id)
            .ok_or_else(|| BatchError::repository(format!("step execution {} not found", step.id)))?;

        *stored = step.clone();
        stored.last_updated = Utc::now();
        Ok(())
    }

    async fn get_job_execution(&self, id: Uuid) -> BatchResult<Option<JobExecution>> {
        let state = self.state.lock().await;
        Ok(state.executions.get(&id).cloned())
    }

    async fn list_job_executions(&self, job_name: &str) -> BatchResult<Vec<JobExecution>> {
        let state = self.state.lock().await;
        let mut executions: Vec<JobExecution> = state
            .executions
            .values()
            .filter(|e| e.job_name == job_name)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn abandon(&self, id: Uuid, reason: &str) -> BatchResult<Option<JobExecution>> {
        let mut state = self.state.lock().await;
        let Some(execution) = state.executions.get_mut(&id) else {
            return Ok(None);
        };

        ensure_running(execution)?;
        execution.abandon(reason);
        Ok(Some(execution.clone()))
    }
}
