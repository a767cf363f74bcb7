//! In-memory source and sink

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::item::{ItemSink, ItemSource};

/// Source over an owned collection
///
/// `open(n)` repositions to the n-th record, so the same source can be
/// reopened after a failure.
pub struct IterSource<T> {
    items: Vec<T>,
    position: usize,
}

impl<T: Clone + Send> IterSource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            position: 0,
        }
    }
}

#[async_trait]
impl<T: Clone + Send> ItemSource<T> for IterSource<T> {
    async fn open(&mut self, start_at: u64) -> Result<()> {
        self.position = usize::try_from(start_at)
            .unwrap_or(usize::MAX)
            .min(self.items.len());
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<T>> {
        let item = self.items.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }
}

#[derive(Debug)]
struct Written<T> {
    items: Vec<T>,
    batches: Vec<usize>,
}

/// Sink collecting written items in memory
///
/// Clones share the same buffer, so a test can keep one handle while the
/// step owns another.
#[derive(Debug)]
pub struct VecSink<T> {
    written: Arc<Mutex<Written<T>>>,
}

impl<T> Clone for VecSink<T> {
    fn clone(&self) -> Self {
        Self {
            written: self.written.clone(),
        }
    }
}

impl<T> Default for VecSink<T> {
    fn default() -> Self {
        Self {
            written: Arc::new(Mutex::new(Written {
                items: Vec::new(),
                batches: Vec::new(),
            })),
        }
    }
}

impl<T: Clone> VecSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in write order
    pub async fn items(&self) -> Vec<T> {
        self.written.lock().await.items.clone()
    }

    /// Size of every successful `write` call
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.written.lock().await.batches.clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> ItemSink<T> for VecSink<T> {
    async fn write(&mut self, items: &[T]) -> Result<()> {
        let mut written = self.written.lock().await;
        written.items.extend_from_slice(items);
        written.batches.push(items.len());
        Ok(())
    }
}
