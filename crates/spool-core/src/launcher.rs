//! Job launcher
//!
//! Turns a [`JobDefinition`] plus launch parameters into a [`JobExecution`]
//! and drives it to a terminal status:
//! 1. Validate the definition and required parameters
//! 2. Create or resume the execution through the repository (duplicate and
//!    concurrent launches are rejected here, before anything runs)
//! 3. Run steps in order; completed steps of a resumed execution are
//!    skipped, failed or stopped ones continue from their committed counters
//! 4. Stop at the first step that does not complete
//!
//! Every status transition is persisted before the next one starts.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::BatchResult;
use crate::events::{ExecutionEvent, ExecutionListener, TracingListener};
use crate::job::JobDefinition;
use crate::model::{BatchStatus, JobExecution, JobParameters};
use crate::repository::JobRepository;
use crate::step::{StepContext, StopSignal};

pub struct JobLauncher {
    repository: Arc<dyn JobRepository>,
    listener: Arc<dyn ExecutionListener>,
}

impl JobLauncher {
    /// Launcher reporting events through `tracing`
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self {
            repository,
            listener: Arc::new(TracingListener),
        }
    }

    /// Replace the event listener
    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Run `job` to completion
    ///
    /// Step failures are reported through the returned execution's status
    /// and exit message. `Err` is returned when the launch is rejected
    /// (duplicate, already running, invalid parameters) or the repository
    /// fails.
    pub async fn launch(
        &self,
        job: &JobDefinition,
        parameters: JobParameters,
    ) -> BatchResult<JobExecution> {
        self.launch_with_signal(job, parameters, StopSignal::new())
            .await
    }

    /// Like [`JobLauncher::launch`], honoring `stop` at chunk boundaries
    pub async fn launch_with_signal(
        &self,
        job: &JobDefinition,
        parameters: JobParameters,
        stop: StopSignal,
    ) -> BatchResult<JobExecution> {
        job.validate()?;
        job.check_parameters(&parameters)?;

        let mut execution = self.repository.create(job.name(), &parameters).await?;
        if execution.attempt > 1 {
            info!(
                job_execution_id = %execution.id,
                job_name = %execution.job_name,
                attempt = execution.attempt,
                "Restarting job execution"
            );
        }

        execution.mark_started();
        self.repository.save_job_execution(&execution).await?;
        self.listener.on_event(&ExecutionEvent::job_started(&execution));

        if let Err(e) = self.run_steps(job, &mut execution, stop).await {
            error!(
                job_execution_id = %execution.id,
                job_name = %execution.job_name,
                error = %e,
                "Job aborted"
            );
            execution.finish(BatchStatus::Failed, Some(e.to_string()));
            if let Err(save_error) = self.repository.save_job_execution(&execution).await {
                error!(
                    job_execution_id = %execution.id,
                    error = %save_error,
                    "Failed to record aborted job"
                );
            }
            self.listener.on_event(&ExecutionEvent::job_finished(&execution));
            return Err(e);
        }

        Ok(execution)
    }

    async fn run_steps(
        &self,
        job: &JobDefinition,
        execution: &mut JobExecution,
        stop: StopSignal,
    ) -> BatchResult<()> {
        let ctx = StepContext {
            job_execution_id: execution.id,
            job_name: execution.job_name.clone(),
            parameters: execution.parameters.clone(),
            repository: self.repository.clone(),
            listener: self.listener.clone(),
            stop,
        };

        let mut status = BatchStatus::Completed;
        let mut exit_message = None;

        for step in job.steps() {
            if ctx.stop.is_stopped() {
                status = BatchStatus::Stopped;
                exit_message = Some(format!("Stop requested before step '{}'", step.name()));
                break;
            }

            let mut step_execution = match execution.step(step.name()) {
                Some(prior) if prior.status == BatchStatus::Completed => {
                    debug!(step_name = %step.name(), "Step already completed, skipping");
                    continue;
                },
                Some(prior) => prior.clone(),
                None => {
                    self.repository
                        .add_step_execution(execution.id, step.name())
                        .await?
                },
            };

            step_execution.mark_started();
            self.repository.save_step_execution(&step_execution).await?;
            execution.record_step(step_execution.clone());
            ctx.emit(ExecutionEvent::step_started(&step_execution));

            let outcome = step.execute(&ctx, &mut step_execution).await;
            execution.record_step(step_execution.clone());
            let step_status = outcome?;
            ctx.emit(ExecutionEvent::step_finished(&step_execution));

            if step_status != BatchStatus::Completed {
                status = step_status;
                exit_message = step_execution.exit_message.clone();
                break;
            }
        }

        execution.finish(status, exit_message);
        self.repository.save_job_execution(execution).await?;
        self.listener.on_event(&ExecutionEvent::job_finished(execution));
        Ok(())
    }
}
