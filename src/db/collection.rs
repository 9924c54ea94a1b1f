//! Typed collections over the document cache

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::cache::{DocumentCache, JsonCollection};
use super::query::{Filter, FindOptions};
use crate::types::Result;

/// Trait for schemas stored in the document cache
///
/// Each schema names its collection, exposes its id and declares the
/// indexes it needs. The indexes are applied when the typed collection is
/// first opened.
pub trait CachedDocument: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    /// Stable document id
    fn doc_id(&self) -> String;

    /// Index definitions (field lists)
    fn indices() -> Vec<Vec<&'static str>> {
        Vec::new()
    }
}

/// Typed collection with automatic indexing
#[derive(Clone)]
pub struct Collection<T> {
    inner: JsonCollection,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CachedDocument> Collection<T> {
    /// Open the collection and apply schema-defined indexes
    pub fn open(cache: &DocumentCache) -> Result<Self> {
        for fields in T::indices() {
            if cache.ensure_index(T::COLLECTION, fields.iter().copied())? {
                debug!(collection = T::COLLECTION, fields = ?fields, "Schema index applied");
            }
        }

        Ok(Self {
            inner: cache.collection(T::COLLECTION)?,
            _marker: PhantomData,
        })
    }

    /// Insert or replace by [`CachedDocument::doc_id`]
    pub fn upsert(&self, item: &T) -> Result<()> {
        let doc = serde_json::to_value(item)?;
        self.inner.upsert(&item.doc_id(), doc)
    }

    pub fn get(&self, id: &str) -> Result<Option<T>> {
        match self.inner.get(id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Vec<T>> {
        self.inner.find(filter, options)?.deserialize()
    }

    pub fn count(&self, filter: &Filter) -> Result<usize> {
        self.inner.count(filter)
    }

    /// Get the untyped collection for raw access
    pub fn inner(&self) -> &JsonCollection {
        &self.inner
    }
}
