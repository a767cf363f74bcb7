//! Spool CLI Library
//!
//! Command-line front end for the spool batch engine.
//!
//! - **Schema**: apply the execution repository migrations (`spool migrate`)
//! - **Import**: load a delimited file into a PostgreSQL table (`spool import`)
//! - **Inspection**: show one execution or list a job's history
//!   (`spool status`, `spool list`)
//! - **Recovery**: mark a run orphaned by a crash as failed so it can be
//!   resumed (`spool abandon`)

pub mod commands;
pub mod error;
pub mod params;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Spool - chunk-oriented batch loader
#[derive(Parser, Debug)]
#[command(name = "spool")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// PostgreSQL connection string for the execution repository
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or upgrade the execution repository tables
    Migrate,

    /// Import a delimited file into a table
    Import(ImportArgs),

    /// Show one job execution as JSON
    Status {
        /// Job execution id
        execution_id: Uuid,
    },

    /// List executions of a job, newest first
    List {
        /// Job name
        job_name: String,
    },

    /// Mark a running execution whose process died as FAILED
    ///
    /// Relaunching with the same identifying parameters then resumes it from
    /// the last committed chunk.
    Abandon {
        /// Job execution id
        execution_id: Uuid,

        /// Exit message recorded on the execution
        #[arg(long)]
        reason: Option<String>,
    },
}

/// Arguments of `spool import`
#[derive(clap::Args, Debug, Clone)]
pub struct ImportArgs {
    /// Input file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Target table, optionally schema-qualified
    #[arg(short, long)]
    pub table: String,

    /// Field names in file column order (comma separated)
    #[arg(long, value_delimiter = ',', required = true)]
    pub fields: Vec<String>,

    /// Field to column renames, e.g. `cust_id=customer_id`
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// Server-side casts by column, e.g. `run_date=date`
    #[arg(long, value_delimiter = ',')]
    pub cast: Vec<String>,

    /// Leading lines to skip
    #[arg(long, default_value_t = 1)]
    pub skip_lines: usize,

    /// Field delimiter (single byte)
    #[arg(long, default_value = ",")]
    pub delimiter: String,

    /// File encoding (utf-8, latin-1)
    #[arg(long, default_value = "utf-8")]
    pub encoding: String,

    /// Extra field filled from a job parameter, e.g. `run_date=runDate`
    #[arg(long, value_delimiter = ',')]
    pub stamp: Vec<String>,

    /// Skip records whose field is blank
    #[arg(long)]
    pub skip_blank: Option<String>,

    /// Identifying job parameter: `name=value` or `name(type)=value`
    #[arg(short, long = "param")]
    pub params: Vec<String>,

    /// Non-identifying job parameter, same syntax as `--param`
    #[arg(long = "meta-param")]
    pub meta_params: Vec<String>,

    /// Records per chunk (defaults to SPOOL_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Job name recorded in the repository
    #[arg(long, default_value = "importJob")]
    pub job_name: String,
}
