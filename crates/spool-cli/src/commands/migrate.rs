//! `spool migrate` command implementation

use crate::error::Result;

/// Create or upgrade the execution repository tables
pub async fn run(database_url: Option<&str>) -> Result<()> {
    let (_, repository) = super::connect(database_url).await?;
    repository.migrate().await?;
    println!("Execution repository is up to date.");
    Ok(())
}
