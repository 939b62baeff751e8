//! Long-running bulk operations over one study.
//!
//! Each operation is built from a [`StudyContext`]: the catalog's view of the
//! study, an open adaptor to its datastore and a working copy of its
//! [`StudyConfiguration`]. The working copy is only persisted once the
//! operation has fully succeeded.
//!
//! # Operations
//!
//! - [`VariantIndexOperation`] - VCF files to transformed artifacts, then loaded
//! - [`VariantAnnotationOperation`] - built-in annotation of matching variants
//! - [`VariantStatsOperation`] - per-cohort allele and genotype statistics
//! - [`VariantExportOperation`] / [`VariantImportOperation`] - JSON lines or VCF round trip

mod annotate;
mod export;
mod index;
mod stats;

pub use annotate::{AnnotateOptions, VariantAnnotationOperation, annotate_variant};
pub use export::{ExportMetadata, ExportOptions, VariantExportOperation, VariantImportOperation};
pub use index::{IndexOptions, VariantIndexOperation};
pub use stats::{StatsOptions, VariantStatsOperation, compute_stats};

use crate::{
    Error, Result, catalog::StudyInfo, storage::AdaptorGuard,
    study_configuration::StudyConfiguration,
};
use std::path::{Component, Path, PathBuf};
use url::Url;

pub struct StudyContext {
    pub info: StudyInfo,
    pub adaptor: AdaptorGuard,
    pub configuration: StudyConfiguration,
}

impl StudyContext {
    pub fn new(info: StudyInfo, adaptor: AdaptorGuard, configuration: StudyConfiguration) -> Self {
        Self {
            info,
            adaptor,
            configuration,
        }
    }

    pub fn study_id(&self) -> i64 {
        self.info.study.id
    }

    /// Persist the working configuration and release the adaptor.
    pub async fn commit(self) -> Result<()> {
        let stored = self
            .adaptor
            .store_study_configuration(&self.configuration)
            .await;
        self.adaptor.finish(stored)
    }
}

/// Create `out_dir` and return its absolute path.
pub(crate) async fn artifact_dir(out_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(out_dir).await?;
    Ok(tokio::fs::canonicalize(out_dir).await?)
}

/// Resolve a caller supplied artifact name under `out_dir`.
///
/// Only plain relative names are accepted so the result never leaves `out_dir`.
pub(crate) fn artifact_path(out_dir: &Path, name: &Path) -> Result<PathBuf> {
    let plain = name
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if name.as_os_str().is_empty() || !plain {
        return Err(Error::InvalidInput(format!(
            "artifact path {:?} must be a relative name inside the output directory",
            name
        )));
    }
    Ok(out_dir.join(name))
}

pub(crate) fn file_url(path: &Path) -> Result<Url> {
    Url::from_file_path(path)
        .map_err(|_| Error::Internal(format!("cannot express {:?} as a file url", path)))
}

/// Run blocking file work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}
