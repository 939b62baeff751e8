use crate::{
    Result,
    catalog::Catalog,
    storage::{AdaptorGuard, EngineRegistry},
    types::{Bioformat, DataStore},
};
use std::sync::Arc;

/// Maps a study to the engine and database holding its variants.
#[derive(Clone)]
pub struct StorageEngineResolver {
    catalog: Arc<dyn Catalog>,
    registry: EngineRegistry,
    default_engine: String,
}

impl StorageEngineResolver {
    /// `default_engine` serves datastores that name no engine.
    pub fn new(catalog: Arc<dyn Catalog>, registry: EngineRegistry, default_engine: &str) -> Self {
        Self {
            catalog,
            registry,
            default_engine: default_engine.to_string(),
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub async fn datastore(&self, study_id: i64, session: &str) -> Result<DataStore> {
        self.catalog
            .datastore(study_id, Bioformat::Variant, session)
            .await
    }

    /// Open an adaptor to the database backing `study_id`.
    pub async fn resolve(&self, study_id: i64, session: &str) -> Result<AdaptorGuard> {
        let datastore = self.datastore(study_id, session).await?;
        self.open(&datastore).await
    }

    pub async fn open(&self, datastore: &DataStore) -> Result<AdaptorGuard> {
        let name = if datastore.storage_engine.is_empty() {
            &self.default_engine
        } else {
            &datastore.storage_engine
        };
        let engine = self.registry.engine(name)?;
        tracing::debug!("opening {} adaptor for database {}", name, datastore.db_name);
        let adaptor = engine.db_adaptor(&datastore.db_name).await?;
        Ok(AdaptorGuard::new(adaptor, name, &datastore.db_name))
    }
}
