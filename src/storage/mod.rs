//! Storage engine abstraction for variant data.
//!
//! Each storage engine (HBase, MongoDB, in-memory, ...) is a plugin registered
//! by name in an [`EngineRegistry`]. An engine hands out [`VariantDbAdaptor`]
//! connections to one of its databases; adaptors implement the query
//! primitives and know nothing about users or permissions.
//!
//! # Implementations
//!
//! - [`MemoryEngine`] - in-process engine keeping encoded rows in memory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use varstore::storage::{EngineRegistry, MemoryEngine};
//!
//! let registry = EngineRegistry::new().with_engine(Arc::new(MemoryEngine::new()));
//! assert!(registry.contains("memory"));
//! ```

mod iterator;
mod memory;

pub use iterator::{
    Closeable, IteratorState, JsonRowConverter, RawCursor, RowConverter, VariantResultIterator,
};
pub use memory::{MEMORY_ENGINE, MemoryEngine};

use crate::{
    Error, Result,
    query::{Query, QueryOptions},
    study_configuration::StudyConfiguration,
    types::{FrequencyBin, GroupCount, QueryResult, Region, Variant, VariantAnnotation, VariantStats},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::Arc;

/// Connection to one database of a storage engine.
#[async_trait]
pub trait VariantDbAdaptor: Send + Sync {
    async fn get(&self, query: &Query, options: &QueryOptions) -> Result<QueryResult<Variant>>;

    async fn count(&self, query: &Query) -> Result<QueryResult<u64>>;

    async fn group_by(
        &self,
        query: &Query,
        field: &str,
        options: &QueryOptions,
    ) -> Result<QueryResult<GroupCount>>;

    async fn rank(
        &self,
        query: &Query,
        field: &str,
        limit: usize,
        ascending: bool,
    ) -> Result<QueryResult<GroupCount>>;

    async fn distinct(&self, query: &Query, field: &str) -> Result<QueryResult<String>>;

    /// Open a streaming scan. The returned iterator owns the scan, not the adaptor.
    async fn iterator(&self, query: &Query, options: &QueryOptions)
    -> Result<VariantResultIterator>;

    /// Requested returned samples grouped by owning study id.
    async fn returned_samples(
        &self,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<BTreeMap<i64, Vec<i64>>>;

    /// Study ids a query returns data for.
    async fn returned_studies(&self, query: &Query, options: &QueryOptions) -> Result<Vec<i64>>;

    /// Variants within `window` bases phased together with `variant` for a sample.
    async fn phased(
        &self,
        variant: &Variant,
        study_id: i64,
        sample_id: i64,
        options: &QueryOptions,
        window: u64,
    ) -> Result<QueryResult<Variant>>;

    /// Histogram of matching variants over a region.
    async fn frequency(
        &self,
        query: &Query,
        region: &Region,
        interval: u64,
    ) -> Result<QueryResult<FrequencyBin>>;

    async fn study_configuration(&self, study_id: i64) -> Result<Option<StudyConfiguration>>;

    async fn store_study_configuration(&self, configuration: &StudyConfiguration) -> Result<()>;

    /// Merge variants of one file into the store, returning the number written.
    async fn load_variants(&self, study_id: i64, file_id: i64, variants: Vec<Variant>)
    -> Result<u64>;

    /// Attach annotations keyed by `chr:pos:ref:alt`.
    async fn update_annotations(&self, annotations: Vec<(String, VariantAnnotation)>) -> Result<u64>;

    /// Attach cohort statistics keyed by `chr:pos:ref:alt`.
    async fn update_stats(
        &self,
        study_id: i64,
        cohort: &str,
        stats: Vec<(String, VariantStats)>,
    ) -> Result<u64>;

    /// Release the connection. Callers close each adaptor exactly once.
    fn close(&self) -> Result<()>;
}

/// A storage engine plugin.
#[async_trait]
pub trait VariantStorageEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn db_adaptor(&self, db_name: &str) -> Result<Box<dyn VariantDbAdaptor>>;
}

/// Scoped adaptor connection, closed exactly once on drop or [`AdaptorGuard::close`].
pub struct AdaptorGuard {
    adaptor: Box<dyn VariantDbAdaptor>,
    engine: String,
    db_name: String,
    closed: bool,
}

impl AdaptorGuard {
    pub fn new(adaptor: Box<dyn VariantDbAdaptor>, engine: &str, db_name: &str) -> Self {
        Self {
            adaptor,
            engine: engine.to_string(),
            db_name: db_name.to_string(),
            closed: false,
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    /// Close the adaptor and return `result`; an error of `result` wins over a close error.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let closed = self.release();
        let value = result?;
        closed?;
        Ok(value)
    }

    fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!("closing {} adaptor for {}", self.engine, self.db_name);
        self.adaptor.close()
    }
}

impl Deref for AdaptorGuard {
    type Target = dyn VariantDbAdaptor;

    fn deref(&self) -> &Self::Target {
        self.adaptor.as_ref()
    }
}

impl Closeable for AdaptorGuard {
    fn close(&mut self) -> Result<()> {
        self.release()
    }
}

impl Drop for AdaptorGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("failed to close {} adaptor: {}", self.engine, e);
        }
    }
}

pub type EngineFactory = Arc<dyn Fn() -> Result<Arc<dyn VariantStorageEngine>> + Send + Sync>;

/// Engine plugins keyed by engine name, populated at startup.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: EngineFactory) {
        tracing::debug!("registering storage engine {}", name);
        self.factories.insert(name.to_string(), factory);
    }

    /// Register an already constructed engine under its own name.
    pub fn with_engine(mut self, engine: Arc<dyn VariantStorageEngine>) -> Self {
        let name = engine.name().to_string();
        self.register(&name, Arc::new(move || Ok(engine.clone())));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn engine(&self, name: &str) -> Result<Arc<dyn VariantStorageEngine>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownEngine(name.to_string()))?;
        (factory.as_ref())()
    }
}
