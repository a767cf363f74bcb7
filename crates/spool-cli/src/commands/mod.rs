//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod abandon;
pub mod import;
pub mod list;
pub mod migrate;
pub mod status;

use spool_core::{Config, PgJobRepository};
use tracing::debug;

use crate::error::Result;

/// Load configuration, apply the `--database-url` override and connect
pub(crate) async fn connect(database_url: Option<&str>) -> Result<(Config, PgJobRepository)> {
    let mut config = Config::load()?;
    if let Some(url) = database_url {
        config.database.url = url.to_string();
    }
    config.validate()?;
    debug!(chunk_size = config.engine.chunk_size, "Loaded configuration");

    let pool = config.database.connect().await?;
    Ok((config, PgJobRepository::new(pool)))
}
