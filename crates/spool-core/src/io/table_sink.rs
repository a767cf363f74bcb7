//! PostgreSQL table sink
//!
//! Serializes each record with serde, maps its fields onto table columns and
//! inserts a whole chunk inside one transaction. Values are bound as text;
//! a per-column cast (e.g. `date`, `bigint`) converts them server-side.
//!
//! The sink is transactional: when it shares a database with the execution
//! repository, the chunk executor runs its inserts in the same transaction
//! as the step counter update.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::marker::PhantomData;
use tracing::debug;

use crate::error::{BatchError, BatchResult};
use crate::item::{ItemSink, TransactionalSink};
use spool_common::SpoolError;

/// PostgreSQL limit on bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Record field → table column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub field: String,
    pub column: String,
    /// SQL type the bound text is cast to
    pub cast: Option<String>,
}

impl ColumnMapping {
    pub fn new(field: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            column: column.into(),
            cast: None,
        }
    }

    /// Field and column share a name
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), name)
    }

    pub fn cast(mut self, sql_type: impl Into<String>) -> Self {
        self.cast = Some(sql_type.into());
        self
    }
}

/// Inserts each chunk into `table` in a single transaction
pub struct PgTableSink<T> {
    pool: PgPool,
    table: String,
    mappings: Vec<ColumnMapping>,
    _record: PhantomData<fn(&T)>,
}

impl<T: Serialize + Send + Sync> PgTableSink<T> {
    /// Validates the table, column and cast names up front; they are
    /// interpolated into SQL
    pub fn new(
        pool: PgPool,
        table: impl Into<String>,
        mappings: Vec<ColumnMapping>,
    ) -> BatchResult<Self> {
        let table = table.into();
        if mappings.is_empty() {
            return Err(BatchError::Config(format!(
                "no column mappings for table '{}'",
                table
            )));
        }

        let identifier = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$")
            .map_err(|e| BatchError::Config(e.to_string()))?;
        let sql_type = Regex::new(r"^[A-Za-z_][A-Za-z0-9_ ]*(\(\d+(,\s*\d+)?\))?(\[\])?$")
            .map_err(|e| BatchError::Config(e.to_string()))?;

        let table_parts: Vec<&str> = table.split('.').collect();
        if table_parts.len() > 2 || !table_parts.iter().all(|p| identifier.is_match(p)) {
            return Err(SpoolError::InvalidIdentifier(table).into());
        }
        for mapping in &mappings {
            if !identifier.is_match(&mapping.column) {
                return Err(SpoolError::InvalidIdentifier(mapping.column.clone()).into());
            }
            if let Some(cast) = &mapping.cast {
                if !sql_type.is_match(cast) {
                    return Err(SpoolError::InvalidIdentifier(cast.clone()).into());
                }
            }
        }

        Ok(Self {
            pool,
            table,
            mappings,
            _record: PhantomData,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column values of one record, in mapping order
    fn row(&self, item: &T) -> Result<Vec<Option<String>>> {
        let value = serde_json::to_value(item).context("Failed to serialize record")?;
        let Value::Object(fields) = value else {
            return Err(anyhow!("record does not serialize to an object"));
        };

        Ok(self
            .mappings
            .iter()
            .map(|m| fields.get(&m.field).and_then(as_text))
            .collect())
    }

    fn insert_prefix(&self) -> String {
        let columns: Vec<&str> = self.mappings.iter().map(|m| m.column.as_str()).collect();
        format!("INSERT INTO {} ({}) ", self.table, columns.join(", "))
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl<T: Serialize + Send + Sync> PgTableSink<T> {
    /// Insert `items` on `conn`, splitting statements at the bind limit
    async fn insert(&self, conn: &mut PgConnection, items: &[T]) -> Result<usize> {
        let rows = items
            .iter()
            .map(|item| self.row(item))
            .collect::<Result<Vec<_>>>()?;

        let rows_per_statement = (MAX_BIND_PARAMS / self.mappings.len()).max(1);
        for batch in rows.chunks(rows_per_statement) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(self.insert_prefix());
            query_builder.push_values(batch.iter(), |mut b, row| {
                for (value, mapping) in row.iter().zip(&self.mappings) {
                    b.push_bind(value.clone());
                    if let Some(cast) = &mapping.cast {
                        b.push_unseparated(format!("::{}", cast));
                    }
                }
            });

            query_builder
                .build()
                .execute(&mut *conn)
                .await
                .with_context(|| format!("Failed to insert into {}", self.table))?;
        }
        Ok(rows.len())
    }
}

#[async_trait]
impl<T: Serialize + Send + Sync> ItemSink<T> for PgTableSink<T> {
    async fn write(&mut self, items: &[T]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin chunk transaction")?;

        let rows = self.insert(&mut tx, items).await?;

        tx.commit()
            .await
            .context("Failed to commit chunk transaction")?;

        debug!(table = %self.table, rows, "Inserted chunk");
        Ok(())
    }

    fn transactional(&mut self) -> Option<&mut dyn TransactionalSink<T>> {
        Some(self)
    }
}

#[async_trait]
impl<T: Serialize + Send + Sync> TransactionalSink<T> for PgTableSink<T> {
    fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_in(&mut self, conn: &mut PgConnection, items: &[T]) -> Result<()> {
        let rows = self.insert(conn, items).await?;
        debug!(table = %self.table, rows, "Staged chunk rows");
        Ok(())
    }
}
