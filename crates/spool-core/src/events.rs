//! Structured execution events
//!
//! Emitted at every status transition (job start/end, step start/end) and
//! at each chunk boundary. [`TracingListener`] turns them into `tracing`
//! events; other listeners can forward them to metrics or audit sinks.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::model::{BatchStatus, JobExecution, StepExecution};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    JobStarted {
        job_execution_id: Uuid,
        job_name: String,
        attempt: u32,
    },
    JobFinished {
        job_execution_id: Uuid,
        job_name: String,
        status: BatchStatus,
        exit_message: Option<String>,
    },
    StepStarted {
        job_execution_id: Uuid,
        step_execution_id: Uuid,
        step_name: String,
        /// Committed read count the step resumes from
        resume_from: u64,
    },
    StepFinished {
        job_execution_id: Uuid,
        step_execution_id: Uuid,
        step_name: String,
        status: BatchStatus,
        read_count: u64,
        write_count: u64,
        commit_count: u64,
        skip_count: u64,
        exit_message: Option<String>,
    },
    ChunkCommitted {
        step_execution_id: Uuid,
        step_name: String,
        chunk: u64,
        items_written: usize,
        read_count: u64,
        write_count: u64,
        commit_count: u64,
        skip_count: u64,
    },
    ChunkRolledBack {
        step_execution_id: Uuid,
        step_name: String,
        chunk: u64,
        reason: String,
    },
}

impl ExecutionEvent {
    pub fn job_started(execution: &JobExecution) -> Self {
        ExecutionEvent::JobStarted {
            job_execution_id: execution.id,
            job_name: execution.job_name.clone(),
            attempt: execution.attempt,
        }
    }

    pub fn job_finished(execution: &JobExecution) -> Self {
        ExecutionEvent::JobFinished {
            job_execution_id: execution.id,
            job_name: execution.job_name.clone(),
            status: execution.status,
            exit_message: execution.exit_message.clone(),
        }
    }

    pub fn step_started(step: &StepExecution) -> Self {
        ExecutionEvent::StepStarted {
            job_execution_id: step.job_execution_id,
            step_execution_id: step.id,
            step_name: step.step_name.clone(),
            resume_from: step.read_count,
        }
    }

    pub fn step_finished(step: &StepExecution) -> Self {
        ExecutionEvent::StepFinished {
            job_execution_id: step.job_execution_id,
            step_execution_id: step.id,
            step_name: step.step_name.clone(),
            status: step.status,
            read_count: step.read_count,
            write_count: step.write_count,
            commit_count: step.commit_count,
            skip_count: step.skip_count,
            exit_message: step.exit_message.clone(),
        }
    }

    pub fn chunk_committed(step: &StepExecution, chunk: u64, items_written: usize) -> Self {
        ExecutionEvent::ChunkCommitted {
            step_execution_id: step.id,
            step_name: step.step_name.clone(),
            chunk,
            items_written,
            read_count: step.read_count,
            write_count: step.write_count,
            commit_count: step.commit_count,
            skip_count: step.skip_count,
        }
    }

    pub fn chunk_rolled_back(step: &StepExecution, chunk: u64, reason: impl Into<String>) -> Self {
        ExecutionEvent::ChunkRolledBack {
            step_execution_id: step.id,
            step_name: step.step_name.clone(),
            chunk,
            reason: reason.into(),
        }
    }
}

/// Observer of execution events
///
/// Called synchronously on the executing task; keep implementations cheap.
pub trait ExecutionListener: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl ExecutionListener for TracingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::JobStarted {
                job_execution_id,
                job_name,
                attempt,
            } => {
                info!(job_execution_id = %job_execution_id, job_name = %job_name, attempt, "Job started");
            },
            ExecutionEvent::JobFinished {
                job_execution_id,
                job_name,
                status,
                exit_message,
            } => {
                if *status == BatchStatus::Completed {
                    info!(job_execution_id = %job_execution_id, job_name = %job_name, status = %status, "Job finished");
                } else {
                    error!(
                        job_execution_id = %job_execution_id,
                        job_name = %job_name,
                        status = %status,
                        exit_message = exit_message.as_deref().unwrap_or(""),
                        "Job finished"
                    );
                }
            },
            ExecutionEvent::StepStarted {
                step_execution_id,
                step_name,
                resume_from,
                ..
            } => {
                info!(step_execution_id = %step_execution_id, step_name = %step_name, resume_from, "Step started");
            },
            ExecutionEvent::StepFinished {
                step_execution_id,
                step_name,
                status,
                read_count,
                write_count,
                commit_count,
                skip_count,
                exit_message,
                ..
            } => {
                info!(
                    step_execution_id = %step_execution_id,
                    step_name = %step_name,
                    status = %status,
                    read_count,
                    write_count,
                    commit_count,
                    skip_count,
                    exit_message = exit_message.as_deref().unwrap_or(""),
                    "Step finished"
                );
            },
            ExecutionEvent::ChunkCommitted {
                step_name,
                chunk,
                items_written,
                read_count,
                commit_count,
                ..
            } => {
                info!(step_name = %step_name, chunk, items_written, read_count, commit_count, "Chunk committed");
            },
            ExecutionEvent::ChunkRolledBack {
                step_name,
                chunk,
                reason,
                ..
            } => {
                warn!(step_name = %step_name, chunk, reason = %reason, "Chunk rolled back");
            },
        }
    }
}

/// Fans events out to several listeners in order
#[derive(Default, Clone)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl CompositeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl ExecutionListener for CompositeListener {
    fn on_event(&self, event: &ExecutionEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::JobParameters;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counting(Mutex<usize>);

    impl ExecutionListener for Counting {
        fn on_event(&self, _event: &ExecutionEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_composite_forwards_to_all() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let composite = CompositeListener::new()
            .with(a.clone())
            .with(b.clone())
            .with(Arc::new(TracingListener));

        let execution = JobExecution::new("job", JobParameters::new());
        composite.on_event(&ExecutionEvent::job_started(&execution));
        composite.on_event(&ExecutionEvent::job_finished(&execution));

        assert_eq!(*a.0.lock().unwrap(), 2);
        assert_eq!(*b.0.lock().unwrap(), 2);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let execution = JobExecution::new("job", JobParameters::new());
        let step = StepExecution::new(execution.id, "load");
        let json = serde_json::to_value(ExecutionEvent::chunk_committed(&step, 1, 100)).unwrap();
        assert_eq!(json["event"], "chunk_committed");
        assert_eq!(json["items_written"], 100);
    }
}
