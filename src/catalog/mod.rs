//! Catalog collaborator: study, sample and datastore metadata.
//!
//! The catalog owns users, sessions and access control. The variant layer only
//! asks it narrow questions through the [`Catalog`] trait; every answer is
//! already restricted to what the session may see.
//!
//! # Implementations
//!
//! - [`MemoryCatalog`] - catalog seeded from a JSON document

pub mod acl;
mod memory;

pub use memory::{CatalogSeed, MemoryCatalog};

#[cfg(test)]
pub(crate) use memory::tests::seed_json;

use crate::{
    Result,
    types::{Bioformat, DataStore, Sample, Study},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file registered in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    pub id: i64,
    pub name: String,
    pub path: PathBuf,
    pub bioformat: Bioformat,
    #[serde(default)]
    pub sample_ids: Vec<i64>,
}

/// Full study context needed by bulk operations.
#[derive(Debug, Clone)]
pub struct StudyInfo {
    pub study: Study,
    pub user_id: String,
    pub datastore: DataStore,
    pub files: Vec<CatalogFile>,
    pub samples: Vec<Sample>,
}

/// Catalog operations the variant layer depends on.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// User owning a session.
    async fn user_id(&self, session: &str) -> Result<String>;

    /// Numeric id of a study given its id or alias.
    async fn study_id(&self, study: &str, session: &str) -> Result<i64>;

    /// Datastore configured for a study and bioformat.
    async fn datastore(&self, study_id: i64, bioformat: Bioformat, session: &str)
    -> Result<DataStore>;

    /// Samples of a study readable by the session, optionally restricted to ids.
    async fn samples(
        &self,
        study_id: i64,
        sample_ids: Option<&[i64]>,
        session: &str,
    ) -> Result<Vec<Sample>>;

    /// Studies among `study_ids` visible to the session.
    async fn studies(&self, study_ids: &[i64], session: &str) -> Result<Vec<Study>>;

    /// Study context plus the named files (by id or name) readable by the session.
    async fn study_info(&self, study: &str, files: &[String], session: &str) -> Result<StudyInfo>;
}
