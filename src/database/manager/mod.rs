//! Registry of named vector stores.
//!
//! The manager owns one [`VectorStore`] per configured name and answers two
//! questions: which store a given piece of content belongs to (delegated to a
//! [`StoreRouter`]) and which handle serves a given name. Unknown names fall
//! back to the default store with a warning instead of failing.

#[cfg(test)]
mod tests;

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::retry::RetryPolicy;
use super::vector_store::{StoreStats, VectorStore};
use super::{StoreError, StoreName};
use crate::config::Config;

/// Decides which store a document line belongs to
pub trait StoreRouter: Send + Sync {
    fn route(&self, content: &str, filename: Option<&str>) -> StoreName;
}

/// Routes everything to one store
#[derive(Debug, Clone)]
pub struct SingleStoreRouter {
    target: StoreName,
}

impl SingleStoreRouter {
    #[inline]
    pub fn new(target: StoreName) -> Self {
        Self { target }
    }
}

impl StoreRouter for SingleStoreRouter {
    fn route(&self, _content: &str, _filename: Option<&str>) -> StoreName {
        self.target.clone()
    }
}

/// Per-store result of [`StoreManager::initialize_all`]
#[derive(Debug)]
pub struct InitReport {
    pub name: StoreName,
    pub result: Result<(), StoreError>,
}

pub struct StoreManager {
    stores: HashMap<StoreName, Arc<VectorStore>>,
    order: Vec<StoreName>,
    default_store: Arc<VectorStore>,
    router: Box<dyn StoreRouter>,
    startup_retry: RetryPolicy,
}

impl StoreManager {
    /// Build handles for every configured store; pools connect on first use
    #[inline]
    pub fn connect(config: &Config) -> Result<Self, StoreError> {
        let mut stores = Vec::with_capacity(config.stores.names.len());
        for name in &config.stores.names {
            let name = StoreName::parse(name)?;
            stores.push(VectorStore::connect_lazy(name, config)?);
        }
        let default = StoreName::parse(&config.stores.default)?;
        Self::from_stores(stores, &default)
    }

    /// Assemble a manager from already constructed stores; `default` must be among them
    #[inline]
    pub fn from_stores(stores: Vec<VectorStore>, default: &StoreName) -> Result<Self, StoreError> {
        let mut by_name = HashMap::with_capacity(stores.len());
        let mut order = Vec::with_capacity(stores.len());
        for store in stores {
            let name = store.name().clone();
            if by_name.insert(name.clone(), Arc::new(store)).is_none() {
                order.push(name);
            }
        }

        let default_store = by_name
            .get(default)
            .cloned()
            .ok_or_else(|| StoreError::InvalidStoreName(format!("default store '{default}' is not configured")))?;

        Ok(Self {
            stores: by_name,
            order,
            default_store,
            router: Box::new(SingleStoreRouter::new(default.clone())),
            startup_retry: RetryPolicy::startup(),
        })
    }

    #[inline]
    pub fn with_router(mut self, router: impl StoreRouter + 'static) -> Self {
        self.router = Box::new(router);
        self
    }

    #[inline]
    pub fn with_startup_retry(mut self, policy: RetryPolicy) -> Self {
        self.startup_retry = policy;
        self
    }

    /// Name of the store the router picks for this content; no I/O
    #[inline]
    pub fn resolve_store(&self, content: &str, filename: Option<&str>) -> StoreName {
        self.router.route(content, filename)
    }

    /// Handle for `name`, or the default store if `name` is unknown
    #[inline]
    pub fn get_store(&self, name: &str) -> Arc<VectorStore> {
        match self.stores.get(name) {
            Some(store) => Arc::clone(store),
            None => {
                warn!(
                    "Unknown store '{}', falling back to '{}'",
                    name,
                    self.default_store.name()
                );
                Arc::clone(&self.default_store)
            }
        }
    }

    #[inline]
    pub fn route_and_get(&self, content: &str, filename: Option<&str>) -> Arc<VectorStore> {
        let name = self.resolve_store(content, filename);
        self.get_store(name.as_str())
    }

    #[inline]
    pub fn default_store(&self) -> Arc<VectorStore> {
        Arc::clone(&self.default_store)
    }

    #[inline]
    pub fn store_names(&self) -> &[StoreName] {
        &self.order
    }

    /// Create every store's schema, retrying each with the startup policy
    #[inline]
    pub async fn initialize_all(&self) -> Vec<InitReport> {
        let policy = self.startup_retry;
        let tasks = self.order.iter().map(|name| {
            let store = self.get_store(name.as_str());
            async move {
                let operation = format!("initialize store {}", store.name());
                let result = policy.run(&operation, || store.ensure_schema()).await;
                match &result {
                    Ok(()) => info!("Store {} initialized", store.name()),
                    Err(e) => warn!("Store {} failed to initialize: {}", store.name(), e),
                }
                InitReport {
                    name: store.name().clone(),
                    result,
                }
            }
        });
        join_all(tasks).await
    }

    #[inline]
    pub async fn stats_all(&self) -> Vec<(StoreName, Result<StoreStats, StoreError>)> {
        let tasks = self.order.iter().map(|name| {
            let store = self.get_store(name.as_str());
            async move { (store.name().clone(), store.stats().await) }
        });
        join_all(tasks).await
    }

    /// Close every pool; stores that never connected are fine
    #[inline]
    pub async fn close_all(&self) {
        join_all(self.stores.values().map(|store| store.close())).await;
        info!("Closed {} store pools", self.stores.len());
    }
}
