use crate::{
    Error, Result,
    catalog::Catalog,
    query::{Query, QueryOptions, VariantQueryParam},
    storage::VariantDbAdaptor,
    types::Sample,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolves what a session may read into an explicit per-study sample list.
///
/// Storage engines know nothing about catalog ACLs, so the resolved list is
/// pushed down inside the query as the `returnedSamples` parameter.
#[derive(Clone)]
pub struct PermissionGate {
    catalog: Arc<dyn Catalog>,
}

impl PermissionGate {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Authorized samples per study for `query`.
    ///
    /// When the query names no returned samples, every sample the session can
    /// read in the returned studies is written into `query`.
    pub async fn check_samples_permissions(
        &self,
        query: &mut Query,
        options: &QueryOptions,
        adaptor: &dyn VariantDbAdaptor,
        session: &str,
    ) -> Result<BTreeMap<i64, Vec<Sample>>> {
        let studies = adaptor.returned_studies(query, options).await?;
        self.check_studies_visible(&studies, session).await?;

        let mut authorized = BTreeMap::new();
        if query.contains(VariantQueryParam::ReturnedSamples) {
            let requested = adaptor.returned_samples(query, options).await?;
            for (study_id, sample_ids) in requested {
                let mut samples = self
                    .catalog
                    .samples(study_id, Some(&sample_ids), session)
                    .await?;
                if samples.len() < sample_ids.len() {
                    return Err(Error::Authorization(format!(
                        "cannot read all requested samples of study {}",
                        study_id
                    )));
                }
                samples.sort_by_key(|s| s.id);
                authorized.insert(study_id, samples);
            }
            return Ok(authorized);
        }

        let mut all_ids = Vec::new();
        for study_id in studies {
            let mut samples = self.catalog.samples(study_id, None, session).await?;
            samples.sort_by_key(|s| s.id);
            all_ids.extend(samples.iter().map(|s| s.id));
            authorized.insert(study_id, samples);
        }
        all_ids.sort_unstable();
        all_ids.dedup();
        tracing::debug!("resolved returned samples {:?}", all_ids);
        query.put_list(VariantQueryParam::ReturnedSamples, &all_ids);
        Ok(authorized)
    }

    async fn check_studies_visible(&self, study_ids: &[i64], session: &str) -> Result<()> {
        let visible = self.catalog.studies(study_ids, session).await?;
        if let Some(hidden) = study_ids
            .iter()
            .find(|id| !visible.iter().any(|s| s.id == **id))
        {
            return Err(Error::Authorization(format!(
                "cannot read study {}",
                hidden
            )));
        }
        Ok(())
    }
}
