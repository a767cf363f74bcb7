//! Spool Core
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Chunk-oriented batch processing engine. A job is a linear sequence of
//! steps; a chunk step reads records from an [`ItemSource`], maps them with
//! an [`ItemTransform`] and writes them to an [`ItemSink`] in fixed-size
//! commit units. Progress is recorded in a [`JobRepository`] so that runs
//! are idempotent per identifying parameters and restartable after failure.
//!
//! - **Model**: [`JobParameters`], [`JobExecution`], [`StepExecution`], [`BatchStatus`]
//! - **Engine**: [`ChunkExecutor`], [`ChunkStep`], [`TaskletStep`], [`JobLauncher`]
//! - **Repository**: [`InMemoryJobRepository`], [`PgJobRepository`]
//! - **Adapters**: [`io`] (CSV source, PostgreSQL table sink, in-memory helpers)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spool_core::io::{IterSource, VecSink};
//! use spool_core::item::identity;
//! use spool_core::{ChunkStep, InMemoryJobRepository, JobDefinition, JobLauncher, JobParameters};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let sink = VecSink::<u32>::new();
//! let handle = sink.clone();
//! let step = ChunkStep::<u32, u32>::builder("load")
//!     .chunk_size(100)
//!     .source(|_| Ok(IterSource::new(1..=250u32)))
//!     .transform(identity::<u32>)
//!     .sink(move |_| Ok(handle.clone()))
//!     .build()?;
//!
//! let job = JobDefinition::new("numbersJob").step(step);
//! let launcher = JobLauncher::new(Arc::new(InMemoryJobRepository::new()));
//! let params = JobParameters::builder().add_string("runDate", "2025-02-05", true).build();
//! let execution = launcher.launch(&job, params).await?;
//! assert_eq!(execution.total_written(), 250);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod config;
pub mod error;
pub mod events;
pub mod io;
pub mod item;
pub mod job;
pub mod launcher;
pub mod model;
pub mod repository;
pub mod step;

pub use chunk::{ChunkExecutor, ChunkTransaction};
pub use config::Config;
pub use error::{BatchError, BatchResult};
pub use events::{CompositeListener, ExecutionEvent, ExecutionListener, TracingListener};
pub use item::{ItemSink, ItemSource, ItemTransform, TransactionalSink, Transformed};
pub use job::JobDefinition;
pub use launcher::JobLauncher;
pub use model::{
    BatchStatus, ExecutionSummary, JobExecution, JobParameters, ParameterValue, StepExecution,
    StepSummary,
};
pub use repository::{InMemoryJobRepository, JobRepository, PgJobRepository};
pub use step::{ChunkStep, Step, StepContext, StopSignal, Tasklet, TaskletStep};
