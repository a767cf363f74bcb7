//! Item source / transform / sink contracts
//!
//! Implement these for any record type. The chunk executor drives them and
//! maps their `anyhow` errors onto the engine taxonomy.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

/// Lazy, finite, forward-only producer of input records
#[async_trait]
pub trait ItemSource<T: Send>: Send {
    /// Position the source before reading
    ///
    /// # Arguments
    /// * `start_at` - Ordinal of the first record to return. Zero on a fresh
    ///   run; the committed read count when a step is resumed.
    async fn open(&mut self, start_at: u64) -> Result<()>;

    /// Next record, or `None` once the source is exhausted
    async fn read(&mut self) -> Result<Option<T>>;

    /// Release underlying resources
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Outcome of transforming one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed<O> {
    Item(O),
    /// Drop the record from the output without failing the step
    Skip,
}

/// Pure mapping from one input record to zero or one output record
///
/// Closures `Fn(I) -> anyhow::Result<Transformed<O>>` implement this trait.
pub trait ItemTransform<I, O>: Send + Sync {
    fn transform(&self, item: I) -> Result<Transformed<O>>;
}

impl<I, O, F> ItemTransform<I, O> for F
where
    F: Fn(I) -> Result<Transformed<O>> + Send + Sync,
{
    fn transform(&self, item: I) -> Result<Transformed<O>> {
        self(item)
    }
}

/// Transform that forwards every record unchanged
pub fn identity<T>(item: T) -> Result<Transformed<T>> {
    Ok(Transformed::Item(item))
}

/// Consumer of output records
#[async_trait]
pub trait ItemSink<T: Send + Sync>: Send {
    /// Persist a non-empty, ordered batch as one atomic unit
    ///
    /// Either every item becomes durable or none does; a single bad record
    /// fails the whole batch.
    async fn write(&mut self, items: &[T]) -> Result<()>;

    /// The sink's transactional side, if it has one
    ///
    /// When it writes to the database holding the execution repository, the
    /// executor uses it instead of [`ItemSink::write`] so that a chunk's rows
    /// and its step counters commit together.
    fn transactional(&mut self) -> Option<&mut dyn TransactionalSink<T>> {
        None
    }
}

/// Sink able to write a chunk inside a transaction it does not own
#[async_trait]
pub trait TransactionalSink<T: Send + Sync>: Send {
    /// Database the rows go to
    fn pool(&self) -> &PgPool;

    /// Stage `items` on `conn`; the caller commits or rolls back
    async fn write_in(&mut self, conn: &mut PgConnection, items: &[T]) -> Result<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn drop_odd(n: u32) -> Result<Transformed<u32>> {
        if n % 2 == 1 {
            Ok(Transformed::Skip)
        } else {
            Ok(Transformed::Item(n * 10))
        }
    }

    #[test]
    fn test_functions_are_transforms() {
        let transform: &dyn ItemTransform<u32, u32> = &drop_odd;
        assert_eq!(transform.transform(2).unwrap(), Transformed::Item(20));
        assert_eq!(transform.transform(3).unwrap(), Transformed::Skip);

        let passthrough: &dyn ItemTransform<&str, &str> = &identity::<&str>;
        assert_eq!(passthrough.transform("x").unwrap(), Transformed::Item("x"));
    }

    #[test]
    fn test_closure_capturing_state() {
        let suffix = String::from("-stg");
        let transform = move |s: String| -> Result<Transformed<String>> {
            Ok(Transformed::Item(format!("{}{}", s, suffix)))
        };
        assert_eq!(
            transform.transform("c1".to_string()).unwrap(),
            Transformed::Item("c1-stg".to_string())
        );
    }
}
