//! Shared helpers for spool-core integration tests
//!
//! - [`RecordingListener`] captures execution events for assertions
//! - [`FailingSink`] / [`FailingSource`] inject collaborator failures
//! - [`StoppingSink`] requests a stop from inside a chunk write
//! - [`TestPostgres`] starts a migrated PostgreSQL container (requires Docker)

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use spool_core::io::{IterSource, VecSink};
use spool_core::item::identity;
use spool_core::repository::postgres::MIGRATOR;
use spool_core::{
    ChunkStep, ExecutionEvent, ExecutionListener, ItemSink, ItemSource, JobDefinition,
    JobParameters, StopSignal, Transformed,
};

/// Initialize tracing for tests
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,spool_core=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Listeners
// ============================================================================

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, matches: impl Fn(&ExecutionEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }
}

impl ExecutionListener for RecordingListener {
    fn on_event(&self, event: &ExecutionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// Failure injection
// ============================================================================

/// Sink that forwards to a [`VecSink`] but fails the n-th write (1-based)
#[derive(Clone)]
pub struct FailingSink<T> {
    inner: VecSink<T>,
    fail_on_write: usize,
    writes: Arc<Mutex<usize>>,
}

impl<T: Clone + Send + Sync> FailingSink<T> {
    pub fn new(inner: VecSink<T>, fail_on_write: usize) -> Self {
        Self {
            inner,
            fail_on_write,
            writes: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> ItemSink<T> for FailingSink<T> {
    async fn write(&mut self, items: &[T]) -> Result<()> {
        let attempt = {
            let mut writes = self
                .writes
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?;
            *writes += 1;
            *writes
        };
        if attempt == self.fail_on_write {
            anyhow::bail!("duplicate key value violates unique constraint");
        }
        self.inner.write(items).await
    }
}

/// Sink that raises `stop` while writing its n-th chunk (1-based)
///
/// The write itself goes through, like an operator interrupt arriving
/// mid-commit.
#[derive(Clone)]
pub struct StoppingSink<T> {
    inner: VecSink<T>,
    stop_on_write: usize,
    writes: Arc<Mutex<usize>>,
    stop: StopSignal,
}

impl<T: Clone + Send + Sync> StoppingSink<T> {
    pub fn new(inner: VecSink<T>, stop_on_write: usize, stop: StopSignal) -> Self {
        Self {
            inner,
            stop_on_write,
            writes: Arc::new(Mutex::new(0)),
            stop,
        }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> ItemSink<T> for StoppingSink<T> {
    async fn write(&mut self, items: &[T]) -> Result<()> {
        let attempt = {
            let mut writes = self
                .writes
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?;
            *writes += 1;
            *writes
        };
        if attempt == self.stop_on_write {
            self.stop.stop();
        }
        self.inner.write(items).await
    }
}

/// Source over `1..=total` that fails when reading `fail_at` (1-based ordinal)
pub struct FailingSource {
    inner: IterSource<u32>,
    position: u64,
    fail_at: Option<u64>,
}

impl FailingSource {
    pub fn new(total: u32, fail_at: Option<u64>) -> Self {
        Self {
            inner: IterSource::new(1..=total),
            position: 0,
            fail_at,
        }
    }
}

#[async_trait]
impl ItemSource<u32> for FailingSource {
    async fn open(&mut self, start_at: u64) -> Result<()> {
        self.position = start_at;
        self.inner.open(start_at).await
    }

    async fn read(&mut self) -> Result<Option<u32>> {
        self.position += 1;
        if Some(self.position) == self.fail_at {
            anyhow::bail!("connection reset while reading record {}", self.position);
        }
        self.inner.read().await
    }
}

// ============================================================================
// Job fixtures
// ============================================================================

pub fn run_params(run_date: &str) -> JobParameters {
    JobParameters::builder()
        .add_string("inputFile", "input/customers_20250205.csv", true)
        .add_string("runDate", run_date, true)
        .build()
}

/// One-step job over `1..=total` writing into `sink`
pub fn numbers_job(total: u32, chunk_size: usize, sink: VecSink<u32>) -> JobDefinition {
    let step = ChunkStep::<u32, u32>::builder("load")
        .chunk_size(chunk_size)
        .source(move |_: &JobParameters| Ok(IterSource::new(1..=total)))
        .transform(identity::<u32>)
        .sink(move |_: &JobParameters| Ok(sink.clone()))
        .build()
        .unwrap_or_else(|e| panic!("invalid step: {}", e));
    JobDefinition::new("numbersJob").step(step)
}

/// Drops every `n`-th record
pub fn skip_every(n: u32) -> impl Fn(u32) -> Result<Transformed<u32>> + Send + Sync {
    move |item| {
        if item % n == 0 {
            Ok(Transformed::Skip)
        } else {
            Ok(Transformed::Item(item))
        }
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the execution repository schema applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        MIGRATOR
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}
