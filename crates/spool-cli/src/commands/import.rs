//! `spool import` command implementation
//!
//! Builds a one-step job (CSV file → stamp → PostgreSQL table) from the
//! command line and launches it. The execution summary is printed as JSON
//! on stdout whatever the outcome; Ctrl-C requests a stop at the next chunk
//! boundary.

use std::sync::Arc;

use spool_core::io::{
    ColumnMapping, CsvItemSource, CsvSourceConfig, JsonRecord, PgTableSink, StampTransform,
    TextRecord,
};
use spool_core::{
    BatchStatus, ChunkStep, ExecutionSummary, JobDefinition, JobLauncher, JobParameters,
    StopSignal,
};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};
use crate::params;
use crate::ImportArgs;

/// Name of the single step of an import job
pub const IMPORT_STEP: &str = "import";

/// Launch (or resume) the import described by `args`
pub async fn run(database_url: Option<&str>, args: &ImportArgs) -> Result<()> {
    // Argument errors are reported before connecting
    let parameters = params::job_parameters(
        &args.input.display().to_string(),
        &args.params,
        &args.meta_params,
    )?;
    let layout = ImportLayout::parse(args)?;

    let (config, repository) = super::connect(database_url).await?;
    let pool = repository.pool().clone();

    let chunk_size = args.chunk_size.unwrap_or(config.engine.chunk_size);
    let job = build_job(args, layout, chunk_size, pool)?;

    let stop = StopSignal::new();
    let on_interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            on_interrupt.stop();
        }
    });

    info!(
        job_name = %args.job_name,
        input = %args.input.display(),
        table = %args.table,
        chunk_size,
        "Launching import"
    );
    let launcher = JobLauncher::new(Arc::new(repository));
    let execution = launcher.launch_with_signal(&job, parameters, stop).await?;

    let summary = ExecutionSummary::from(&execution);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if execution.status == BatchStatus::Completed {
        Ok(())
    } else {
        Err(CliError::Unsuccessful {
            job_execution_id: execution.id,
            status: execution.status,
        })
    }
}

/// File layout and column mapping taken from the import flags
#[derive(Debug, Clone)]
pub struct ImportLayout {
    stamps: Vec<(String, String)>,
    mappings: Vec<ColumnMapping>,
    source: CsvSourceConfig,
}

impl ImportLayout {
    pub fn parse(args: &ImportArgs) -> Result<Self> {
        let stamps = params::stamps(&args.stamp)?;
        let mappings = params::column_mappings(&args.fields, &args.columns, &args.cast, &stamps)?;
        let source = CsvSourceConfig::new(args.input.clone(), args.fields.clone())
            .skip_lines(args.skip_lines)
            .delimiter(params::delimiter(&args.delimiter)?)
            .encoding(params::encoding(&args.encoding)?);

        Ok(Self {
            stamps,
            mappings,
            source,
        })
    }
}

/// The import job; source, transform and sink are built per launch from the
/// job parameters
pub fn build_job(
    args: &ImportArgs,
    layout: ImportLayout,
    chunk_size: usize,
    pool: PgPool,
) -> Result<JobDefinition> {
    let ImportLayout {
        stamps,
        mappings,
        source: source_config,
    } = layout;

    debug!(table = %args.table, columns = %describe_mappings(&mappings), "Column mappings");

    // Fail before touching the repository if the table or a cast is unusable
    PgTableSink::<JsonRecord>::new(pool.clone(), args.table.clone(), mappings.clone())?;

    let required: Vec<String> = stamps.iter().map(|(_, parameter)| parameter.clone()).collect();
    let skip_blank = args.skip_blank.clone();
    let table = args.table.clone();

    let step = ChunkStep::<TextRecord, JsonRecord>::builder(IMPORT_STEP)
        .chunk_size(chunk_size)
        .source(move |_: &JobParameters| {
            Ok(CsvItemSource::<TextRecord>::new(source_config.clone()))
        })
        .transform_factory(move |params: &JobParameters| {
            let transform = StampTransform::resolve(params, stamps.as_slice())?;
            Ok(match &skip_blank {
                Some(field) => transform.skip_blank(field.clone()),
                None => transform,
            })
        })
        .sink(move |_: &JobParameters| {
            Ok(PgTableSink::<JsonRecord>::new(
                pool.clone(),
                table.clone(),
                mappings.clone(),
            )?)
        })
        .build()?;

    Ok(JobDefinition::new(args.job_name.clone())
        .step(step)
        .with_required_parameters(std::iter::once("inputFile".to_string()).chain(required)))
}

fn describe_mappings(mappings: &[ColumnMapping]) -> String {
    mappings
        .iter()
        .map(|m| match &m.cast {
            Some(cast) if m.field != m.column => format!("{}->{}::{}", m.field, m.column, cast),
            Some(cast) => format!("{}::{}", m.column, cast),
            None if m.field != m.column => format!("{}->{}", m.field, m.column),
            None => m.column.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
