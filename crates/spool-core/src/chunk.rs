//! Chunk executor
//!
//! Drives the read → transform → write loop of one step. Records are grouped
//! into chunks of at most `chunk_size` items read; each chunk is staged in a
//! [`ChunkTransaction`] and either committed as a whole or dropped without
//! touching the step's counters.
//!
//! A commit writes the staged items and persists the folded counters. When
//! the sink is transactional and writes to the repository's database, both
//! happen in one PostgreSQL transaction, so a crash or error can never leave
//! rows without counters. Other sinks commit on their own first and the
//! counters follow: a failure between the two means the chunk is delivered
//! again on resume.
//!
//! Counters in the repository therefore always describe the last committed
//! chunk, which is also where a resumed step picks up: the source is opened
//! at the committed read count.

use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::{BatchError, BatchResult};
use crate::events::ExecutionEvent;
use crate::item::{ItemSink, ItemSource, ItemTransform, TransactionalSink, Transformed};
use crate::model::{BatchStatus, StepExecution};
use crate::repository::postgres::{same_database, update_step_execution};
use crate::step::StepContext;

/// Records staged for one commit
///
/// Dropping the transaction without committing it discards the staged
/// items; the step counters are only touched on commit.
#[derive(Debug)]
pub struct ChunkTransaction<O> {
    chunk: u64,
    items: Vec<O>,
    read: u64,
    skipped: u64,
}

impl<O: Send + Sync> ChunkTransaction<O> {
    fn begin(chunk: u64, capacity: usize) -> Self {
        Self {
            chunk,
            items: Vec::with_capacity(capacity),
            read: 0,
            skipped: 0,
        }
    }

    /// Records pulled from the source so far
    pub fn read(&self) -> u64 {
        self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == 0
    }

    fn stage(&mut self, outcome: Transformed<O>) {
        self.read += 1;
        match outcome {
            Transformed::Item(item) => self.items.push(item),
            Transformed::Skip => self.skipped += 1,
        }
    }

    /// `execution` as it stands once this chunk is committed
    ///
    /// A chunk whose records were all skipped writes nothing and does not
    /// count as a commit, but still advances read and skip counts.
    fn fold_into(&self, execution: &StepExecution) -> StepExecution {
        let mut next = execution.clone();
        if !self.items.is_empty() {
            next.commit_count += 1;
        }
        next.read_count += self.read;
        next.write_count += self.items.len() as u64;
        next.skip_count += self.skipped;
        next
    }
}

/// Why a chunk did not commit
enum CommitError {
    /// Nothing from the chunk became durable
    RolledBack(BatchError),
    /// The sink committed but the counters could not be recorded
    Repository(BatchError),
}

/// Runs one chunk-oriented step execution to a terminal status
pub struct ChunkExecutor<'a> {
    chunk_size: usize,
    ctx: &'a StepContext,
}

impl<'a> ChunkExecutor<'a> {
    pub fn new(chunk_size: usize, ctx: &'a StepContext) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ctx,
        }
    }

    /// Process the whole source
    ///
    /// Returns the step's terminal status. Source, transform and sink
    /// failures end the step FAILED with the counters of the chunks already
    /// committed; only repository failures are returned as `Err`.
    pub async fn run<I, O>(
        &self,
        source: &mut dyn ItemSource<I>,
        transform: &dyn ItemTransform<I, O>,
        sink: &mut dyn ItemSink<O>,
        execution: &mut StepExecution,
    ) -> BatchResult<BatchStatus>
    where
        I: Send,
        O: Send + Sync,
    {
        let step = execution.step_name.clone();
        let resume_from = execution.read_count;

        if let Err(source_error) = source.open(resume_from).await {
            let error = BatchError::SourceRead {
                step,
                ordinal: resume_from + 1,
                source: source_error,
            };
            return self.ctx.fail_step(execution, error).await;
        }

        if resume_from > 0 {
            debug!(step_name = %step, resume_from, "Resuming step after committed records");
        }

        let mut chunk = execution.commit_count;
        loop {
            if self.ctx.stop.is_stopped() {
                close_quietly(source, &step).await;
                let message = format!("Stop requested after {} records", execution.read_count);
                execution.finish(BatchStatus::Stopped, Some(message));
                self.ctx.repository.save_step_execution(execution).await?;
                return Ok(BatchStatus::Stopped);
            }

            let mut tx = ChunkTransaction::begin(chunk + 1, self.chunk_size);
            let mut exhausted = false;

            while tx.read() < self.chunk_size as u64 {
                let ordinal = execution.read_count + tx.read() + 1;
                let item = match source.read().await {
                    Ok(Some(item)) => item,
                    Ok(None) => {
                        exhausted = true;
                        break;
                    },
                    Err(e) => {
                        let error = BatchError::SourceRead {
                            step: step.clone(),
                            ordinal,
                            source: e,
                        };
                        return self.roll_back(tx, source, execution, error).await;
                    },
                };

                match transform.transform(item) {
                    Ok(outcome) => tx.stage(outcome),
                    Err(e) => {
                        let error = BatchError::Transform {
                            step: step.clone(),
                            ordinal,
                            source: e,
                        };
                        return self.roll_back(tx, source, execution, error).await;
                    },
                }
            }

            if tx.is_empty() {
                // Source ran dry exactly on a chunk boundary
                break;
            }

            let written = tx.items.len();
            match self.commit(&tx, sink, execution).await {
                Ok(()) if written > 0 => {
                    chunk += 1;
                    self.ctx
                        .emit(ExecutionEvent::chunk_committed(execution, chunk, written));
                },
                Ok(()) => {
                    debug!(step_name = %step, skipped = tx.skipped, "Chunk fully skipped");
                },
                Err(CommitError::RolledBack(error)) => {
                    return self.roll_back(tx, source, execution, error).await;
                },
                Err(CommitError::Repository(error)) => {
                    close_quietly(source, &step).await;
                    return Err(error);
                },
            }

            if exhausted {
                break;
            }
        }

        close_quietly(source, &step).await;

        execution.finish(BatchStatus::Completed, None);
        self.ctx.repository.save_step_execution(execution).await?;
        Ok(BatchStatus::Completed)
    }

    /// Make the chunk durable and fold it into `execution`
    async fn commit<O: Send + Sync>(
        &self,
        tx: &ChunkTransaction<O>,
        sink: &mut dyn ItemSink<O>,
        execution: &mut StepExecution,
    ) -> Result<(), CommitError> {
        let next = tx.fold_into(execution);

        if let Some(pool) = self.ctx.repository.database() {
            if let Some(joined) = sink.transactional() {
                if same_database(pool, joined.pool()) {
                    self.commit_shared(pool, joined, tx, &next).await?;
                    *execution = next;
                    return Ok(());
                }
            }
        }

        if !tx.items.is_empty() {
            if let Err(e) = sink.write(&tx.items).await {
                return Err(CommitError::RolledBack(self.sink_error(execution, tx, e)));
            }
        }
        self.ctx
            .repository
            .save_step_execution(&next)
            .await
            .map_err(CommitError::Repository)?;
        *execution = next;
        Ok(())
    }

    /// Sink rows and step counters in one PostgreSQL transaction
    async fn commit_shared<O: Send + Sync>(
        &self,
        pool: &PgPool,
        sink: &mut dyn TransactionalSink<O>,
        tx: &ChunkTransaction<O>,
        next: &StepExecution,
    ) -> Result<(), CommitError> {
        let mut db = pool
            .begin()
            .await
            .map_err(|e| CommitError::Repository(e.into()))?;

        if !tx.items.is_empty() {
            if let Err(e) = sink.write_in(&mut db, &tx.items).await {
                return Err(CommitError::RolledBack(self.sink_error(next, tx, e)));
            }
        }

        let committed = match update_step_execution(&mut db, next).await {
            Ok(()) => db.commit().await.map_err(BatchError::from),
            Err(e) => Err(e),
        };
        committed.map_err(|e| {
            CommitError::RolledBack(BatchError::ChunkCommit {
                step: next.step_name.clone(),
                chunk: tx.chunk,
                source: e.into(),
            })
        })
    }

    fn sink_error<O>(
        &self,
        execution: &StepExecution,
        tx: &ChunkTransaction<O>,
        source: anyhow::Error,
    ) -> BatchError {
        BatchError::SinkWrite {
            step: execution.step_name.clone(),
            chunk: tx.chunk,
            items: tx.items.len(),
            source,
        }
    }

    /// Abandon the in-flight chunk and fail the step
    async fn roll_back<I: Send, O: Send + Sync>(
        &self,
        tx: ChunkTransaction<O>,
        source: &mut dyn ItemSource<I>,
        execution: &mut StepExecution,
        error: BatchError,
    ) -> BatchResult<BatchStatus> {
        let discarded = tx.items.len();
        let chunk = tx.chunk;
        drop(tx);

        execution.rollback_count += 1;
        debug!(
            step_name = %execution.step_name,
            chunk,
            discarded,
            "Discarded staged chunk"
        );
        self.ctx
            .emit(ExecutionEvent::chunk_rolled_back(execution, chunk, error.to_string()));

        close_quietly(source, &execution.step_name).await;
        self.ctx.fail_step(execution, error).await
    }
}

async fn close_quietly<I: Send>(source: &mut dyn ItemSource<I>, step: &str) {
    if let Err(e) = source.close().await {
        warn!(step_name = %step, error = %e, "Failed to close source");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::ExecutionListener;
    use crate::io::{IterSource, VecSink};
    use crate::item::identity;
    use crate::model::JobParameters;
    use crate::repository::{InMemoryJobRepository, JobRepository};
    use crate::step::StopSignal;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ExecutionEvent>>);

    impl ExecutionListener for Recorder {
        fn on_event(&self, event: &ExecutionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    /// Sink that fails on its n-th write call
    struct FailOn {
        call: usize,
        calls: usize,
        inner: VecSink<u32>,
    }

    #[async_trait]
    impl ItemSink<u32> for FailOn {
        async fn write(&mut self, items: &[u32]) -> anyhow::Result<()> {
            self.calls += 1;
            if self.calls == self.call {
                anyhow::bail!("constraint violation");
            }
            self.inner.write(items).await
        }
    }

    struct Harness {
        ctx: StepContext,
        execution: StepExecution,
        events: Arc<Recorder>,
        repository: Arc<InMemoryJobRepository>,
    }

    async fn harness() -> Harness {
        let repository = Arc::new(InMemoryJobRepository::new());
        let job = repository.create("job", &JobParameters::new()).await.unwrap();
        let execution = repository.add_step_execution(job.id, "load").await.unwrap();
        let events = Arc::new(Recorder::default());
        let ctx = StepContext {
            job_execution_id: job.id,
            job_name: "job".to_string(),
            parameters: JobParameters::new(),
            repository: repository.clone(),
            listener: events.clone(),
            stop: StopSignal::new(),
        };
        Harness {
            ctx,
            execution,
            events,
            repository,
        }
    }

    fn numbers(n: u32) -> IterSource<u32> {
        IterSource::new((1..=n).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_partial_final_chunk_counts_as_commit() {
        let mut h = harness().await;
        let sink = VecSink::<u32>::new();
        let mut writer = sink.clone();

        let status = ChunkExecutor::new(100, &h.ctx)
            .run::<u32, u32>(&mut numbers(250), &identity::<u32>, &mut writer, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(status, BatchStatus::Completed);
        assert_eq!(h.execution.read_count, 250);
        assert_eq!(h.execution.write_count, 250);
        assert_eq!(h.execution.commit_count, 3);
        assert_eq!(sink.batch_sizes().await, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_commit() {
        let mut h = harness().await;
        let mut sink = VecSink::<u32>::new();

        ChunkExecutor::new(100, &h.ctx)
            .run::<u32, u32>(&mut numbers(200), &identity::<u32>, &mut sink, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(h.execution.commit_count, 2);
        let committed = h
            .events
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::ChunkCommitted { .. }))
            .count();
        assert_eq!(committed, 2);
    }

    #[tokio::test]
    async fn test_all_skipped_writes_nothing() {
        let mut h = harness().await;
        let sink = VecSink::<u32>::new();
        let mut writer = sink.clone();
        let drop_all = |_: u32| -> anyhow::Result<Transformed<u32>> { Ok(Transformed::Skip) };

        ChunkExecutor::new(10, &h.ctx)
            .run::<u32, u32>(&mut numbers(25), &drop_all, &mut writer, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(h.execution.read_count, 25);
        assert_eq!(h.execution.skip_count, 25);
        assert_eq!(h.execution.write_count, 0);
        assert_eq!(h.execution.commit_count, 0);
        assert!(sink.items().await.is_empty());
        let committed = h
            .events
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::ChunkCommitted { .. }))
            .count();
        assert_eq!(committed, 0);
    }

    #[tokio::test]
    async fn test_chunk_numbers_follow_commits() {
        let mut h = harness().await;
        let mut sink = VecSink::<u32>::new();
        // Chunk of 1..=10 is dropped entirely
        let drop_first_ten = |n: u32| -> anyhow::Result<Transformed<u32>> {
            Ok(if n <= 10 { Transformed::Skip } else { Transformed::Item(n) })
        };

        ChunkExecutor::new(10, &h.ctx)
            .run::<u32, u32>(&mut numbers(30), &drop_first_ten, &mut sink, &mut h.execution)
            .await
            .unwrap();

        let chunks: Vec<u64> = h
            .events
            .0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::ChunkCommitted { chunk, .. } => Some(*chunk),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec![1, 2]);
        assert_eq!(h.execution.commit_count, 2);
        assert_eq!(h.execution.skip_count, 10);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_prior_chunks_only() {
        let mut h = harness().await;
        let written = VecSink::<u32>::new();
        let mut sink = FailOn {
            call: 3,
            calls: 0,
            inner: written.clone(),
        };

        let status = ChunkExecutor::new(10, &h.ctx)
            .run::<u32, u32>(&mut numbers(50), &identity::<u32>, &mut sink, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(status, BatchStatus::Failed);
        assert_eq!(written.items().await.len(), 20);
        assert_eq!(h.execution.read_count, 20);
        assert_eq!(h.execution.write_count, 20);
        assert_eq!(h.execution.commit_count, 2);
        assert_eq!(h.execution.rollback_count, 1);
        assert!(h
            .execution
            .exit_message
            .as_deref()
            .unwrap()
            .contains("constraint violation"));

        let stored = h
            .repository
            .get_job_execution(h.ctx.job_execution_id)
            .await
            .unwrap()
            .unwrap();
        let stored = stored.step("load").unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.write_count, 20);
    }

    #[tokio::test]
    async fn test_transform_failure_discards_chunk() {
        let mut h = harness().await;
        let mut sink = VecSink::<u32>::new();
        let fail_on_15 = |n: u32| -> anyhow::Result<Transformed<u32>> {
            if n == 15 {
                anyhow::bail!("bad record {}", n);
            }
            Ok(Transformed::Item(n))
        };

        let status = ChunkExecutor::new(10, &h.ctx)
            .run::<u32, u32>(&mut numbers(30), &fail_on_15, &mut sink, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(status, BatchStatus::Failed);
        assert_eq!(h.execution.read_count, 10);
        assert_eq!(h.execution.commit_count, 1);
        let message = h.execution.exit_message.unwrap();
        assert!(message.contains("item 15"), "{}", message);
    }

    #[tokio::test]
    async fn test_resume_opens_source_at_committed_count() {
        let mut h = harness().await;
        h.execution.read_count = 20;
        h.execution.write_count = 20;
        h.execution.commit_count = 2;
        let sink = VecSink::<u32>::new();
        let mut writer = sink.clone();

        ChunkExecutor::new(10, &h.ctx)
            .run::<u32, u32>(&mut numbers(35), &identity::<u32>, &mut writer, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(sink.items().await.first(), Some(&21));
        assert_eq!(h.execution.read_count, 35);
        assert_eq!(h.execution.commit_count, 4);
    }

    #[tokio::test]
    async fn test_stop_before_first_chunk() {
        let mut h = harness().await;
        h.ctx.stop.stop();
        let mut sink = VecSink::<u32>::new();

        let status = ChunkExecutor::new(10, &h.ctx)
            .run::<u32, u32>(&mut numbers(30), &identity::<u32>, &mut sink, &mut h.execution)
            .await
            .unwrap();

        assert_eq!(status, BatchStatus::Stopped);
        assert_eq!(h.execution.read_count, 0);
        assert!(h.execution.status.is_restartable());
    }
}
