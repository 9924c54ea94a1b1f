//! Document cache backed by sled
//!
//! Each collection is a sled tree (`c:<name>`) mapping document id to the
//! JSON document. Secondary indexes live in their own trees (see
//! [`super::index`]) and their declarations are persisted so they survive a
//! restart.
//!
//! Durability is delegated to sled: every write lands in sled's log before
//! the call returns, and the log is fsynced by sled's background flusher
//! every `flush_every_ms`. [`DocumentCache::flush`] forces it (used at
//! shutdown).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use super::index::{
    id_from_entry_key, plan, IndexSpec, COLLECTION_TREE_PREFIX, INDEX_REGISTRY_TREE,
};
use super::query::{paginate, Cursor, Filter, FindOptions};
use crate::types::{Result, WatchError};

/// Reserved field holding the document id
pub const ID_FIELD: &str = "_id";

/// Reserved field stamped on every upsert
pub const CACHED_AT_FIELD: &str = "_cachedAt";

/// Number of striped write locks (same id always maps to the same stripe)
const WRITE_STRIPES: usize = 32;

/// Document cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Path to the sled database
    pub path: PathBuf,
    /// Background flush interval (None disables the idle flusher)
    pub flush_every_ms: Option<u64>,
    /// Page cache size in bytes
    pub cache_capacity: u64,
    /// Throw the database away on drop (tests)
    pub temporary: bool,
    /// Deadline for a single async cache call
    pub io_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/watchtower.sled"),
            flush_every_ms: Some(1000),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            temporary: false,
            io_timeout: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    /// Config for a throwaway database
    pub fn temporary() -> Self {
        Self {
            temporary: true,
            ..Default::default()
        }
    }

    /// Config for a database at a specific path
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

struct CacheInner {
    db: sled::Db,
    registry: sled::Tree,
    /// Declared indexes by collection name
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
    write_locks: Vec<Mutex<()>>,
    config: CacheConfig,
}

/// Persistent document cache
///
/// Cheap to clone; all clones share the same database.
#[derive(Clone)]
pub struct DocumentCache {
    inner: Arc<CacheInner>,
}

impl DocumentCache {
    /// Open (or create) the cache
    ///
    /// Fails with [`WatchError::StorageUnavailable`] if the database cannot be
    /// opened, e.g. the path is not writable or another process holds it.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let mut sled_config = sled::Config::new()
            .cache_capacity(config.cache_capacity)
            .flush_every_ms(config.flush_every_ms)
            .mode(sled::Mode::HighThroughput);

        sled_config = if config.temporary {
            sled_config.temporary(true)
        } else {
            sled_config.path(&config.path)
        };

        let db = sled_config.open().map_err(|e| {
            WatchError::StorageUnavailable(format!(
                "cannot open cache at {}: {}",
                config.path.display(),
                e
            ))
        })?;

        let registry = db
            .open_tree(INDEX_REGISTRY_TREE)
            .map_err(|e| WatchError::StorageUnavailable(e.to_string()))?;

        let mut indexes: HashMap<String, Vec<IndexSpec>> = HashMap::new();
        for item in registry.iter() {
            let (_, value) = item.map_err(|e| WatchError::StorageUnavailable(e.to_string()))?;
            match serde_json::from_slice::<IndexSpec>(&value) {
                Ok(spec) => indexes.entry(spec.collection.clone()).or_default().push(spec),
                Err(e) => warn!(error = %e, "Skipping unreadable index declaration"),
            }
        }

        if config.temporary {
            info!("DocumentCache opened (temporary)");
        } else {
            info!(
                path = %config.path.display(),
                indexes = indexes.values().map(Vec::len).sum::<usize>(),
                "DocumentCache opened"
            );
        }

        Ok(Self {
            inner: Arc::new(CacheInner {
                db,
                registry,
                indexes: RwLock::new(indexes),
                write_locks: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a handle to a collection, creating it on first use
    pub fn collection(&self, name: &str) -> Result<JsonCollection> {
        let tree = self.tree(name)?;
        Ok(JsonCollection {
            name: name.to_string(),
            tree,
            cache: self.clone(),
        })
    }

    /// Names of all collections that currently exist
    pub fn collection_names(&self) -> Vec<String> {
        self.inner
            .db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                let name = String::from_utf8(name.to_vec()).ok()?;
                name.strip_prefix(COLLECTION_TREE_PREFIX).map(String::from)
            })
            .collect()
    }

    /// Insert or replace a document by id
    pub fn upsert(&self, collection: &str, id: &str, doc: JsonValue) -> Result<()> {
        self.collection(collection)?.upsert(id, doc)
    }

    /// Point lookup; `Ok(None)` when the document does not exist
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<JsonValue>> {
        self.collection(collection)?.get(id)
    }

    /// Filtered, sorted, paginated query
    pub fn find(&self, collection: &str, filter: &Filter, options: &FindOptions) -> Result<Cursor> {
        self.collection(collection)?.find(filter, options)
    }

    /// Count documents matching a filter
    pub fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        self.collection(collection)?.count(filter)
    }

    /// Delete every document of a collection
    ///
    /// Index declarations are kept, so the collection stays indexed when it
    /// is written again.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let existed = self.inner.db.drop_tree(tree_name(name))?;
        for spec in self.indexes(name) {
            self.inner.db.drop_tree(spec.tree_name())?;
        }
        info!(collection = name, existed = existed, "Collection dropped");
        Ok(existed)
    }

    /// Declare an index; re-declaring an existing index is a no-op
    ///
    /// Returns `true` if the index was created (and backfilled).
    pub fn ensure_index<I, S>(&self, collection: &str, fields: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = IndexSpec::new(collection, fields);
        if spec.fields.is_empty() {
            return Err(WatchError::BadRequest("index needs at least one field".into()));
        }

        let mut indexes = self
            .inner
            .indexes
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let declared = indexes.entry(collection.to_string()).or_default();
        if declared.contains(&spec) {
            return Ok(false);
        }

        // Backfill from existing documents before the index becomes visible
        let tree = self.tree(collection)?;
        let index_tree = self.inner.db.open_tree(spec.tree_name())?;
        let mut backfilled = 0usize;
        for item in tree.iter() {
            let (key, value) = item?;
            let doc: JsonValue = serde_json::from_slice(&value)?;
            let id = String::from_utf8_lossy(&key);
            index_tree.insert(spec.entry_key(&doc, &id), &[])?;
            backfilled += 1;
        }

        self.inner
            .registry
            .insert(spec.name().as_bytes(), serde_json::to_vec(&spec)?)?;
        declared.push(spec.clone());

        info!(index = %spec.name(), backfilled = backfilled, "Index created");
        Ok(true)
    }

    /// Indexes declared on a collection
    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.inner
            .indexes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Force everything written so far to disk
    pub async fn flush(&self) -> Result<usize> {
        let bytes = self.inner.db.flush_async().await?;
        debug!(bytes = bytes, "DocumentCache flushed");
        Ok(bytes)
    }

    fn tree(&self, collection: &str) -> Result<sled::Tree> {
        if collection.is_empty() {
            return Err(WatchError::BadRequest("collection name is empty".into()));
        }
        Ok(self.inner.db.open_tree(tree_name(collection))?)
    }

    fn write_lock(&self, collection: &str, id: &str) -> std::sync::MutexGuard<'_, ()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        collection.hash(&mut hasher);
        id.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.inner.write_locks.len();
        self.inner.write_locks[stripe]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Run a blocking cache call off the async runtime, under the I/O deadline
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(DocumentCache) -> Result<T> + Send + 'static,
    {
        let cache = self.clone();
        let deadline = self.inner.config.io_timeout;
        let task = tokio::task::spawn_blocking(move || f(cache));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(WatchError::Internal(format!("cache task failed: {}", join))),
            Err(_) => Err(WatchError::Timeout(format!(
                "cache call exceeded {:?}",
                deadline
            ))),
        }
    }
}

fn tree_name(collection: &str) -> String {
    format!("{}{}", COLLECTION_TREE_PREFIX, collection)
}

/// Untyped handle to one collection
#[derive(Clone)]
pub struct JsonCollection {
    name: String,
    tree: sled::Tree,
    cache: DocumentCache,
}

impl JsonCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace a document by id
    ///
    /// The document must be a JSON object. `_id` and `_cachedAt` are set by
    /// the cache. Index entries for the new version are written before the
    /// document and stale entries are removed after it.
    pub fn upsert(&self, id: &str, doc: JsonValue) -> Result<()> {
        let JsonValue::Object(mut map) = doc else {
            return Err(WatchError::BadRequest(format!(
                "document '{}' in '{}' is not an object",
                id, self.name
            )));
        };
        if id.is_empty() {
            return Err(WatchError::BadRequest(format!(
                "document in '{}' has an empty id",
                self.name
            )));
        }

        map.insert(ID_FIELD.to_string(), JsonValue::String(id.to_string()));
        map.insert(
            CACHED_AT_FIELD.to_string(),
            JsonValue::String(Utc::now().to_rfc3339()),
        );
        let doc = JsonValue::Object(map);
        let bytes = serde_json::to_vec(&doc)?;

        let _guard = self.cache.write_lock(&self.name, id);
        // Held until the document is written: an index created meanwhile
        // either backfills this document or is seen here
        let registry = self
            .cache
            .inner
            .indexes
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let indexes: &[IndexSpec] = registry.get(&self.name).map_or(&[], Vec::as_slice);

        let previous: Option<JsonValue> = if indexes.is_empty() {
            None
        } else {
            match self.tree.get(id.as_bytes())? {
                Some(old) => serde_json::from_slice(&old).ok(),
                None => None,
            }
        };

        let mut index_trees = Vec::with_capacity(indexes.len());
        for spec in indexes {
            let index_tree = self.cache.inner.db.open_tree(spec.tree_name())?;
            index_tree.insert(spec.entry_key(&doc, id), &[])?;
            index_trees.push(index_tree);
        }

        self.tree.insert(id.as_bytes(), bytes)?;

        if let Some(ref old) = previous {
            for (spec, index_tree) in indexes.iter().zip(&index_trees) {
                let old_key = spec.entry_key(old, id);
                if old_key != spec.entry_key(&doc, id) {
                    index_tree.remove(old_key)?;
                }
            }
        }

        debug!(collection = %self.name, id = id, "Document upserted");
        Ok(())
    }

    /// Point lookup
    pub fn get(&self, id: &str) -> Result<Option<JsonValue>> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Filtered, sorted, paginated query
    pub fn find(&self, filter: &Filter, options: &FindOptions) -> Result<Cursor> {
        let matched = self.matching(filter)?;
        Ok(paginate(matched, options))
    }

    /// Count documents matching a filter
    pub fn count(&self, filter: &Filter) -> Result<usize> {
        if filter.is_empty() {
            return Ok(self.tree.len());
        }
        Ok(self.matching(filter)?.len())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// All documents matching the filter, unordered
    fn matching(&self, filter: &Filter) -> Result<Vec<JsonValue>> {
        let indexes = self.cache.indexes(&self.name);

        let probes = plan(&indexes, filter).and_then(|spec| {
            spec.probe_prefixes(filter).map(|prefixes| (spec.clone(), prefixes))
        });

        let Some((spec, prefixes)) = probes else {
            let mut docs = Vec::new();
            for item in self.tree.iter() {
                let (_, value) = item?;
                let doc: JsonValue = serde_json::from_slice(&value)?;
                if filter.matches(&doc) {
                    docs.push(doc);
                }
            }
            return Ok(docs);
        };

        let index_tree = self.cache.inner.db.open_tree(spec.tree_name())?;
        let mut seen = std::collections::HashSet::new();
        let mut docs = Vec::new();
        for prefix in prefixes {
            for item in index_tree.scan_prefix(prefix) {
                let (key, _) = item?;
                let Some(id) = id_from_entry_key(&key) else {
                    continue;
                };
                if !seen.insert(id.to_string()) {
                    continue;
                }
                // Stale entries are filtered here
                if let Some(doc) = self.get(id)? {
                    if filter.matches(&doc) {
                        docs.push(doc);
                    }
                }
            }
        }

        debug!(
            collection = %self.name,
            index = %spec.name(),
            matched = docs.len(),
            "Index scan"
        );
        Ok(docs)
    }
}

/// Document store capability consumed by the reconciliation loop
///
/// Calls carry the cache's I/O deadline so a wedged disk cannot stall a pass
/// forever.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document by id
    async fn upsert_doc(&self, collection: &str, id: &str, doc: JsonValue) -> Result<()>;
}

#[async_trait]
impl DocumentStore for DocumentCache {
    async fn upsert_doc(&self, collection: &str, id: &str, doc: JsonValue) -> Result<()> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.blocking(move |cache| cache.upsert(&collection, &id, doc))
            .await
    }
}
