//! Steps
//!
//! A [`Step`] is one unit of a job's linear sequence. [`ChunkStep`] runs the
//! read/transform/write loop through the [`ChunkExecutor`]; [`TaskletStep`]
//! runs a single action once. Both build their collaborators late, from the
//! resolved [`JobParameters`] of the execution being run.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::chunk::ChunkExecutor;
use crate::error::{BatchError, BatchResult};
use crate::events::{ExecutionEvent, ExecutionListener};
use crate::item::{ItemSink, ItemSource, ItemTransform};
use crate::model::{BatchStatus, JobParameters, StepExecution};
use crate::repository::JobRepository;

/// Cooperative stop request, honored at chunk boundaries
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a step needs from the running job
#[derive(Clone)]
pub struct StepContext {
    pub job_execution_id: Uuid,
    pub job_name: String,
    pub parameters: JobParameters,
    pub repository: Arc<dyn JobRepository>,
    pub listener: Arc<dyn ExecutionListener>,
    pub stop: StopSignal,
}

impl StepContext {
    pub fn emit(&self, event: ExecutionEvent) {
        self.listener.on_event(&event);
    }

    /// End the step FAILED with `error` as exit message and persist it
    pub(crate) async fn fail_step(
        &self,
        execution: &mut StepExecution,
        error: BatchError,
    ) -> BatchResult<BatchStatus> {
        warn!(
            step_name = %execution.step_name,
            error = %error,
            "Step failed"
        );
        execution.finish(BatchStatus::Failed, Some(error.to_string()));
        self.repository.save_step_execution(execution).await?;
        Ok(BatchStatus::Failed)
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Run the step to a terminal status
    ///
    /// The step finalizes and persists `execution` itself. Collaborator
    /// failures end in `Ok(BatchStatus::Failed)`; `Err` means the repository
    /// could not record progress.
    async fn execute(
        &self,
        ctx: &StepContext,
        execution: &mut StepExecution,
    ) -> BatchResult<BatchStatus>;
}

type SourceFactory<I> =
    Box<dyn Fn(&JobParameters) -> anyhow::Result<Box<dyn ItemSource<I>>> + Send + Sync>;
type TransformFactory<I, O> =
    Box<dyn Fn(&JobParameters) -> anyhow::Result<Arc<dyn ItemTransform<I, O>>> + Send + Sync>;
type SinkFactory<O> =
    Box<dyn Fn(&JobParameters) -> anyhow::Result<Box<dyn ItemSink<O>>> + Send + Sync>;

/// Chunk-oriented step: source → transform → sink in commit units
pub struct ChunkStep<I, O> {
    name: String,
    chunk_size: usize,
    source: SourceFactory<I>,
    transform: TransformFactory<I, O>,
    sink: SinkFactory<O>,
}

impl<I, O> ChunkStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>) -> ChunkStepBuilder<I, O> {
        ChunkStepBuilder {
            name: name.into(),
            chunk_size: None,
            source: None,
            transform: None,
            sink: None,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[allow(clippy::type_complexity)]
    fn components(
        &self,
        parameters: &JobParameters,
    ) -> anyhow::Result<(
        Box<dyn ItemSource<I>>,
        Arc<dyn ItemTransform<I, O>>,
        Box<dyn ItemSink<O>>,
    )> {
        Ok((
            (self.source)(parameters)?,
            (self.transform)(parameters)?,
            (self.sink)(parameters)?,
        ))
    }
}

#[async_trait]
impl<I, O> Step for ChunkStep<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        execution: &mut StepExecution,
    ) -> BatchResult<BatchStatus> {
        let (mut source, transform, mut sink) = match self.components(&ctx.parameters) {
            Ok(components) => components,
            Err(source) => {
                let error = BatchError::Step {
                    step: self.name.clone(),
                    source,
                };
                return ctx.fail_step(execution, error).await;
            },
        };

        ChunkExecutor::new(self.chunk_size, ctx)
            .run(source.as_mut(), transform.as_ref(), sink.as_mut(), execution)
            .await
    }
}

/// Builder for [`ChunkStep`]
///
/// Source and sink are stateful, so they are produced per execution by
/// factories receiving the job parameters.
pub struct ChunkStepBuilder<I, O> {
    name: String,
    chunk_size: Option<usize>,
    source: Option<SourceFactory<I>>,
    transform: Option<TransformFactory<I, O>>,
    sink: Option<SinkFactory<O>>,
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Send + 'static,
    O: Send + Sync + 'static,
{
    /// Records per commit; must be positive
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn source<S, F>(mut self, factory: F) -> Self
    where
        S: ItemSource<I> + 'static,
        F: Fn(&JobParameters) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.source = Some(Box::new(move |params: &JobParameters| {
            Ok(Box::new(factory(params)?) as Box<dyn ItemSource<I>>)
        }));
        self
    }

    /// Parameter-independent transform shared by every execution
    pub fn transform<T>(mut self, transform: T) -> Self
    where
        T: ItemTransform<I, O> + 'static,
    {
        let shared: Arc<dyn ItemTransform<I, O>> = Arc::new(transform);
        self.transform = Some(Box::new(move |_: &JobParameters| Ok(shared.clone())));
        self
    }

    /// Transform built from the job parameters of each execution
    pub fn transform_factory<T, F>(mut self, factory: F) -> Self
    where
        T: ItemTransform<I, O> + 'static,
        F: Fn(&JobParameters) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.transform = Some(Box::new(move |params: &JobParameters| {
            Ok(Arc::new(factory(params)?) as Arc<dyn ItemTransform<I, O>>)
        }));
        self
    }

    pub fn sink<S, F>(mut self, factory: F) -> Self
    where
        S: ItemSink<O> + 'static,
        F: Fn(&JobParameters) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        self.sink = Some(Box::new(move |params: &JobParameters| {
            Ok(Box::new(factory(params)?) as Box<dyn ItemSink<O>>)
        }));
        self
    }

    pub fn build(self) -> BatchResult<ChunkStep<I, O>> {
        let missing = |what: &str| {
            BatchError::InvalidDefinition(format!("step '{}' has no {}", self.name, what))
        };

        let chunk_size = match self.chunk_size {
            Some(0) => {
                return Err(BatchError::InvalidDefinition(format!(
                    "step '{}' chunk size must be positive",
                    self.name
                )))
            },
            Some(size) => size,
            None => return Err(missing("chunk size")),
        };
        let source = self.source.ok_or_else(|| missing("source"))?;
        let transform = self.transform.ok_or_else(|| missing("transform"))?;
        let sink = self.sink.ok_or_else(|| missing("sink"))?;

        Ok(ChunkStep {
            name: self.name,
            chunk_size,
            source,
            transform,
            sink,
        })
    }
}

/// Single-shot unit of work
#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn run(&self, parameters: &JobParameters) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> Tasklet for F
where
    F: Fn(&JobParameters) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, parameters: &JobParameters) -> anyhow::Result<()> {
        self(parameters)
    }
}

/// Runs a [`Tasklet`] once; a successful run counts as one commit
pub struct TaskletStep {
    name: String,
    tasklet: Arc<dyn Tasklet>,
}

impl TaskletStep {
    pub fn new(name: impl Into<String>, tasklet: impl Tasklet + 'static) -> Self {
        Self {
            name: name.into(),
            tasklet: Arc::new(tasklet),
        }
    }
}

#[async_trait]
impl Step for TaskletStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &StepContext,
        execution: &mut StepExecution,
    ) -> BatchResult<BatchStatus> {
        if let Err(source) = self.tasklet.run(&ctx.parameters).await {
            execution.rollback_count += 1;
            let error = BatchError::Step {
                step: self.name.clone(),
                source,
            };
            return ctx.fail_step(execution, error).await;
        }

        execution.commit_count += 1;
        execution.finish(BatchStatus::Completed, None);
        ctx.repository.save_step_execution(execution).await?;
        Ok(BatchStatus::Completed)
    }
}
