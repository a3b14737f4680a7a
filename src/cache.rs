//! Named response stores used by the offline layer.
//!
//! A store maps a request identity (method + URL) to a stored response. The
//! [`CacheStorage`] trait mirrors the browser's `CacheStorage`: stores are
//! opened (and created) by name, listed, and deleted wholesale.
//!
//! # Store names
//! - `primary@<version>`: the application's own precached assets
//! - `external@<version>`: third-party assets picked up along the way

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::error::CacheError;
use crate::net::{RequestKey, ResourceRequest, ResourceResponse};

/// Store name for `prefix` at `version`, e.g. `primary@v1`.
pub fn store_name(prefix: &str, version: &str) -> String {
    format!("{}@{}", prefix, version)
}

#[allow(async_fn_in_trait)]
pub trait CacheStore {
    async fn lookup(
        &self,
        request: &ResourceRequest,
    ) -> Result<Option<ResourceResponse>, CacheError>;

    /// Store a response, replacing any previous entry for the same request.
    async fn put(
        &self,
        request: &ResourceRequest,
        response: &ResourceResponse,
    ) -> Result<(), CacheError>;
}

#[allow(async_fn_in_trait)]
pub trait CacheStorage {
    type Store: CacheStore;

    /// Open the named store, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<Self::Store, CacheError>;

    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Returns whether a store by that name existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;
}

type Entries = HashMap<RequestKey, ResourceResponse>;

/// In-memory store handle. Cloning shares the same entries.
///
/// A handle keeps its entries alive after the store is deleted from its
/// [`MemoryCacheStorage`], so a read already holding it still completes.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Rc<RefCell<Entries>>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn contains(&self, request: &ResourceRequest) -> bool {
        self.entries.borrow().contains_key(&request.key())
    }
}

impl CacheStore for MemoryCache {
    async fn lookup(
        &self,
        request: &ResourceRequest,
    ) -> Result<Option<ResourceResponse>, CacheError> {
        Ok(self.entries.borrow().get(&request.key()).cloned())
    }

    async fn put(
        &self,
        request: &ResourceRequest,
        response: &ResourceResponse,
    ) -> Result<(), CacheError> {
        self.entries
            .borrow_mut()
            .insert(request.key(), response.clone());
        Ok(())
    }
}

/// Single-threaded, in-memory [`CacheStorage`]. Cloning shares the same stores.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    stores: Rc<RefCell<BTreeMap<String, MemoryCache>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.stores.borrow().contains_key(name)
    }

    /// Handle to an existing store without creating it.
    pub fn store(&self, name: &str) -> Option<MemoryCache> {
        self.stores.borrow().get(name).cloned()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.borrow().keys().cloned().collect()
    }
}

impl CacheStorage for MemoryCacheStorage {
    type Store = MemoryCache;

    async fn open(&self, name: &str) -> Result<MemoryCache, CacheError> {
        Ok(self
            .stores
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .clone())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.store_names())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.stores.borrow_mut().remove(name).is_some())
    }
}
