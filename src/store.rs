use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::CallContext;
use crate::error::StoreError;
use crate::model::{Filter, Laptop};

/// Receives the matches of a search, one at a time.
///
/// Returning an error stops the scan; the error reaches the caller of
/// [`LaptopStore::search`] unchanged.
#[async_trait]
pub trait LaptopSink: Send {
    async fn found(&mut self, laptop: Laptop) -> Result<(), StoreError>;
}

#[async_trait]
impl LaptopSink for Vec<Laptop> {
    async fn found(&mut self, laptop: Laptop) -> Result<(), StoreError> {
        self.push(laptop);
        Ok(())
    }
}

#[async_trait]
pub trait LaptopStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] instead of overwriting.
    async fn save(&self, laptop: &Laptop) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Laptop, StoreError>;

    /// Streams every stored laptop that satisfies `filter` into `sink`.
    async fn search(
        &self,
        filter: &Filter,
        ctx: &CallContext,
        sink: &mut dyn LaptopSink,
    ) -> Result<(), StoreError>;

    async fn count(&self) -> usize;
}

/// Process-local laptop map behind a reader/writer lock.
#[derive(Default)]
pub struct InMemoryLaptopStore {
    data: RwLock<HashMap<String, Laptop>>,
}

impl InMemoryLaptopStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryLaptopStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.data.try_read().map(|data| data.len()).ok();
        f.debug_struct("InMemoryLaptopStore")
        .field("laptop_count", &count)
        .finish()
    }
}

#[async_trait]
impl LaptopStore for InMemoryLaptopStore {
    async fn save(&self, laptop: &Laptop) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if data.contains_key(&laptop.id) {
            return Err(StoreError::AlreadyExists);
        }
        data.insert(laptop.id.clone(), laptop.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Laptop, StoreError> {
        let data = self.data.read().await;
        data.get(id)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn search(
        &self,
        filter: &Filter,
        ctx: &CallContext,
        sink: &mut dyn LaptopSink,
    ) -> Result<(), StoreError> {
        // Held for the whole scan so the caller sees one consistent snapshot.
        let data = self.data.read().await;

        for laptop in data.values() {
            if let Err(e) = ctx.check() {
                debug!("search aborted: {}", e);
                return Err(e.into());
            }
            if filter.matches(laptop) {
                sink.found(laptop.clone()).await?;
            }
        }
        Ok(())
    }

    async fn count(&self) -> usize {
        self.data.read().await.len()
    }
}
