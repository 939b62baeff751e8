//! Variant query coordinator.
//!
//! Every read operation follows the same path: resolve the main study, open
//! a scoped adaptor for its datastore, run the permission gate (which may
//! amend the query) and only then touch the storage engine. The adaptor is
//! closed on every exit path; `iterator` hands it over to the returned
//! iterator instead.

use crate::{
    Error, Result,
    catalog::Catalog,
    config::StorageConfiguration,
    formats::{FormattedResult, VariantFormat},
    operations::{
        AnnotateOptions, ExportOptions, IndexOptions, StatsOptions, StudyContext,
        VariantAnnotationOperation, VariantExportOperation, VariantImportOperation,
        VariantIndexOperation, VariantStatsOperation,
    },
    permissions::PermissionGate,
    query::{Query, QueryOptions, VariantQueryParam, is_negated, remove_negation},
    resolver::StorageEngineResolver,
    storage::{AdaptorGuard, EngineRegistry, VariantResultIterator},
    study_configuration::StudyConfiguration,
    types::{FrequencyBin, GroupCount, QueryResult, Region, Sample, StorageEtlResult, Variant},
};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Adaptor opened for a query after the permission gate passed.
struct Secured {
    adaptor: AdaptorGuard,
    study_id: i64,
    samples: BTreeMap<i64, Vec<Sample>>,
}

pub(crate) async fn with_timeout<T>(
    timeout: Option<Duration>,
    name: &str,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| Error::Timeout(format!("{} exceeded {:?}", name, limit)))?,
        None => operation.await,
    }
}

pub struct VariantStorageManager {
    catalog: Arc<dyn Catalog>,
    resolver: StorageEngineResolver,
    gate: PermissionGate,
    configuration: StorageConfiguration,
}

impl VariantStorageManager {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        registry: EngineRegistry,
        configuration: StorageConfiguration,
    ) -> Self {
        Self {
            resolver: StorageEngineResolver::new(
                catalog.clone(),
                registry,
                &configuration.default_engine,
            ),
            gate: PermissionGate::new(catalog.clone()),
            catalog,
            configuration,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn configuration(&self) -> &StorageConfiguration {
        &self.configuration
    }

    pub fn resolver(&self) -> &StorageEngineResolver {
        &self.resolver
    }

    /// Study whose datastore serves `query`.
    ///
    /// Taken from `studies`, falling back to `returnedStudies`: the first
    /// non-negated term. Every other positive study term must be visible to
    /// the session as well.
    pub async fn main_study_id(&self, query: &Query, session: &str) -> Result<i64> {
        let param = [VariantQueryParam::Studies, VariantQueryParam::ReturnedStudies]
            .into_iter()
            .find(|p| query.is_valid_param(*p))
            .ok_or(Error::MissingStudy)?;
        let (_, terms) = query.terms(param)?;
        let positive: Vec<&str> = terms
            .iter()
            .filter(|t| !is_negated(t))
            .map(|t| remove_negation(t))
            .collect();
        let Some(main) = positive.first() else {
            return Err(Error::MissingStudy);
        };

        let study_id = self.catalog.study_id(main, session).await?;
        for other in &positive[1..] {
            self.catalog.study_id(other, session).await?;
        }
        Ok(study_id)
    }

    async fn open_secured(
        &self,
        query: &mut Query,
        options: &QueryOptions,
        session: &str,
    ) -> Result<Secured> {
        let study_id = self.main_study_id(query, session).await?;
        let adaptor = self.resolver.resolve(study_id, session).await?;
        // A failing gate drops, and so closes, the adaptor.
        let samples = self
            .gate
            .check_samples_permissions(query, options, &*adaptor, session)
            .await?;
        Ok(Secured {
            adaptor,
            study_id,
            samples,
        })
    }

    /// Options with the default limit applied and clamped to the ceiling.
    ///
    /// The configured default is itself kept within `1..=limit_max`.
    fn bounded_options(&self, options: &QueryOptions) -> QueryOptions {
        let limit_max = self.configuration.limit_max.max(1) as i64;
        let limit = match options.limit {
            Some(l) if l > limit_max => {
                tracing::info!("limit {} exceeds maximum, clamped to {}", l, limit_max);
                limit_max
            }
            Some(l) if l > 0 => l,
            _ => (self.configuration.limit_default as i64).clamp(1, limit_max),
        };
        QueryOptions {
            limit: Some(limit),
            ..options.clone()
        }
    }

    pub async fn get(
        &self,
        query: &mut Query,
        options: &QueryOptions,
        session: &str,
    ) -> Result<QueryResult<Variant>> {
        let options = self.bounded_options(options);
        let secured = self.open_secured(query, &options, session).await?;
        tracing::debug!("get variants {:?}", query);
        let result = secured.adaptor.get(query, &options).await;
        secured.adaptor.finish(result)
    }

    pub async fn get_formatted(
        &self,
        query: &mut Query,
        options: &QueryOptions,
        session: &str,
        format: VariantFormat,
    ) -> Result<FormattedResult> {
        let result = self.get(query, options, session).await?;
        Ok(FormattedResult::convert(result, format))
    }

    /// `get` restricted to variants present in all of `studies`.
    ///
    /// The caller's query is left untouched.
    pub async fn intersect(
        &self,
        query: &Query,
        options: &QueryOptions,
        studies: &[String],
        session: &str,
    ) -> Result<QueryResult<Variant>> {
        if studies.is_empty() {
            return Err(Error::MissingStudy);
        }
        let mut query = query.clone();
        query.put(VariantQueryParam::Studies, studies.join(";"));
        self.get(&mut query, options, session).await
    }

    pub async fn count(&self, query: &mut Query, session: &str) -> Result<QueryResult<u64>> {
        let secured = self
            .open_secured(query, &QueryOptions::default(), session)
            .await?;
        let result = secured.adaptor.count(query).await;
        secured.adaptor.finish(result)
    }

    pub async fn group_by(
        &self,
        query: &mut Query,
        field: &str,
        options: &QueryOptions,
        session: &str,
    ) -> Result<QueryResult<GroupCount>> {
        let secured = self.open_secured(query, options, session).await?;
        let result = secured.adaptor.group_by(query, field, options).await;
        secured.adaptor.finish(result)
    }

    pub async fn rank(
        &self,
        query: &mut Query,
        field: &str,
        limit: Option<i64>,
        ascending: bool,
        session: &str,
    ) -> Result<QueryResult<GroupCount>> {
        let max = self.configuration.rank_limit_max.max(1);
        let limit = match limit {
            Some(l) if l > 0 && l as u64 > max => {
                tracing::info!("rank limit {} exceeds maximum, clamped to {}", l, max);
                max
            }
            Some(l) if l > 0 => l as u64,
            _ => self.configuration.rank_limit_default.clamp(1, max),
        };
        let secured = self
            .open_secured(query, &QueryOptions::default(), session)
            .await?;
        let result = secured
            .adaptor
            .rank(query, field, limit as usize, ascending)
            .await;
        secured.adaptor.finish(result)
    }

    pub async fn distinct(
        &self,
        query: &mut Query,
        field: &str,
        session: &str,
    ) -> Result<QueryResult<String>> {
        let secured = self
            .open_secured(query, &QueryOptions::default(), session)
            .await?;
        let result = secured.adaptor.distinct(query, field).await;
        secured.adaptor.finish(result)
    }

    /// Histogram of matching variants; the query must name exactly one region.
    pub async fn get_frequency(
        &self,
        query: &mut Query,
        interval: u64,
        session: &str,
    ) -> Result<QueryResult<FrequencyBin>> {
        let mut regions = query
            .get_list(VariantQueryParam::Region)
            .iter()
            .map(|r| r.parse::<Region>())
            .collect::<Result<Vec<_>>>()?;
        regions.dedup();
        let region = match regions.as_slice() {
            [region] => region.clone(),
            _ => {
                return Err(Error::InvalidQuery(format!(
                    "frequency needs exactly one region, got {}",
                    regions.len()
                )));
            }
        };

        let secured = self
            .open_secured(query, &QueryOptions::default(), session)
            .await?;
        let result = secured.adaptor.frequency(query, &region, interval).await;
        secured.adaptor.finish(result)
    }

    /// Variants phased together with `variant` for one sample of a study.
    pub async fn get_phased(
        &self,
        variant: &str,
        study: &str,
        sample: &str,
        options: &QueryOptions,
        session: &str,
    ) -> Result<QueryResult<Variant>> {
        let variant: Variant = variant.parse()?;
        let mut query = Query::new()
            .with(VariantQueryParam::Studies, study)
            .with(VariantQueryParam::ReturnedSamples, sample);
        let secured = self.open_secured(&mut query, options, session).await?;

        let sample_id = secured
            .samples
            .get(&secured.study_id)
            .and_then(|samples| {
                samples
                    .iter()
                    .find(|s| s.name == sample || s.id.to_string() == sample)
            })
            .map(|s| s.id)
            .ok_or_else(|| Error::NotFound(format!("sample {} in study {}", sample, study)));
        let result = match sample_id {
            Ok(sample_id) => {
                secured
                    .adaptor
                    .phased(
                        &variant,
                        secured.study_id,
                        sample_id,
                        options,
                        self.configuration.phased_window,
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        secured.adaptor.finish(result)
    }

    /// Stream matching variants. No default limit is applied; the adaptor stays
    /// open until the iterator is closed or dropped.
    pub async fn iterator(
        &self,
        query: &mut Query,
        options: &QueryOptions,
        session: &str,
    ) -> Result<VariantResultIterator> {
        let secured = self.open_secured(query, options, session).await?;
        let result = secured.adaptor.iterator(query, options).await;
        match result {
            Ok(mut iterator) => {
                iterator.add_closeable(Box::new(secured.adaptor));
                Ok(iterator)
            }
            Err(e) => secured.adaptor.finish(Err(e)),
        }
    }

    /// Authorized samples per study, resolving `query` like any read does.
    pub async fn get_samples_metadata(
        &self,
        query: &mut Query,
        options: &QueryOptions,
        session: &str,
    ) -> Result<BTreeMap<i64, Vec<Sample>>> {
        let secured = self.open_secured(query, options, session).await?;
        secured.adaptor.finish(Ok(secured.samples))
    }

    /// Study configurations of the database serving `query`.
    pub(crate) async fn study_configurations(
        &self,
        query: &Query,
        study_ids: &[i64],
        session: &str,
    ) -> Result<Vec<StudyConfiguration>> {
        let study_id = self.main_study_id(query, session).await?;
        let adaptor = self.resolver.resolve(study_id, session).await?;
        let mut configurations = Vec::new();
        for id in study_ids {
            let found = adaptor.study_configuration(*id).await;
            match found {
                Ok(Some(sc)) => configurations.push(sc),
                Ok(None) => {}
                Err(e) => return adaptor.finish(Err(e)),
            }
        }
        adaptor.finish(Ok(configurations))
    }

    /// Catalog context plus an open adaptor for a bulk operation.
    pub(crate) async fn study_context(
        &self,
        study: &str,
        files: &[String],
        session: &str,
    ) -> Result<StudyContext> {
        let info = self.catalog.study_info(study, files, session).await?;
        let adaptor = self.resolver.open(&info.datastore).await?;
        let configuration = match adaptor.study_configuration(info.study.id).await? {
            Some(sc) => sc,
            None => StudyConfiguration::new(info.study.id, info.study.alias.clone()),
        };
        Ok(StudyContext::new(info, adaptor, configuration))
    }

    pub async fn index(
        &self,
        study: &str,
        files: &[String],
        options: &IndexOptions,
        session: &str,
    ) -> Result<Vec<StorageEtlResult>> {
        with_timeout(self.configuration.operation_timeout, "index", async {
            let context = self.study_context(study, files, session).await?;
            let results = VariantIndexOperation::new(context, &self.configuration)
                .run()
                .await?;
            if options.annotate {
                self.annotate(study, Query::new(), &AnnotateOptions::default(), session)
                    .await?;
            }
            if options.calculate_stats {
                self.stats(study, &[], &StatsOptions { overwrite: true }, session)
                    .await?;
            }
            Ok(results)
        })
        .await
    }

    pub async fn annotate(
        &self,
        study: &str,
        query: Query,
        options: &AnnotateOptions,
        session: &str,
    ) -> Result<Vec<Url>> {
        with_timeout(self.configuration.operation_timeout, "annotate", async {
            let context = self.study_context(study, &[], session).await?;
            VariantAnnotationOperation::new(context, &self.configuration, options.clone())
                .run(query)
                .await
        })
        .await
    }

    pub async fn stats(
        &self,
        study: &str,
        cohorts: &[String],
        options: &StatsOptions,
        session: &str,
    ) -> Result<()> {
        with_timeout(self.configuration.operation_timeout, "stats", async {
            let context = self.study_context(study, &[], session).await?;
            VariantStatsOperation::new(context, options.clone())
                .run(cohorts)
                .await
        })
        .await
    }

    pub async fn export(
        &self,
        query: Query,
        options: &ExportOptions,
        session: &str,
    ) -> Result<Vec<Url>> {
        with_timeout(self.configuration.operation_timeout, "export", async {
            VariantExportOperation::new(self, options.clone())
                .run(query, session)
                .await
        })
        .await
    }

    pub async fn import(&self, study: &str, input: &Path, session: &str) -> Result<u64> {
        with_timeout(self.configuration.operation_timeout, "import", async {
            let context = self.study_context(study, &[], session).await?;
            VariantImportOperation::new(context).run(input).await
        })
        .await
    }

    pub async fn delete_study(&self, _study: &str, _session: &str) -> Result<()> {
        Err(Error::UnsupportedOperation("deleteStudy"))
    }

    pub async fn delete_file(&self, _study: &str, _file: &str, _session: &str) -> Result<()> {
        Err(Error::UnsupportedOperation("deleteFile"))
    }

    pub async fn delete_annotation(&self, _study: &str, _name: &str, _session: &str) -> Result<()> {
        Err(Error::UnsupportedOperation("deleteAnnotation"))
    }

    pub async fn delete_stats(&self, _study: &str, _cohorts: &[String], _session: &str) -> Result<()> {
        Err(Error::UnsupportedOperation("deleteStats"))
    }

    pub async fn facet(
        &self,
        _query: &Query,
        _options: &QueryOptions,
        _session: &str,
    ) -> Result<QueryResult<GroupCount>> {
        Err(Error::UnsupportedOperation("facet"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::storage::{MemoryEngine, VariantStorageEngine};
    use crate::types::{SampleData, StudyEntry};

    pub(crate) struct Fixture {
        pub engine: Arc<MemoryEngine>,
        pub manager: VariantStorageManager,
    }

    fn seed() -> serde_json::Value {
        let mut seed = crate::catalog::seed_json();
        seed["studies"].as_array_mut().unwrap().push(serde_json::json!({
            "id": 3,
            "alias": "s3",
            "owner": "guest",
            "datastores": [{"bioformat": "VARIANT", "storageEngine": "memory", "dbName": "db1"}],
            "samples": [{"id": 31, "name": "G31"}]
        }));
        seed
    }

    fn variant(pos: u64, study: i64, calls: &[(i64, &str)]) -> Variant {
        let mut v = Variant::new("1", pos, "A", "C");
        let mut entry = StudyEntry::new(study);
        for (sample, gt) in calls {
            entry.samples.insert(*sample, SampleData { genotype: gt.to_string() });
        }
        v.merge_study(entry);
        v
    }

    pub(crate) async fn fixture(configuration: StorageConfiguration) -> Fixture {
        let engine = Arc::new(MemoryEngine::new());
        let catalog = MemoryCatalog::new(serde_json::from_value(seed()).unwrap());
        let manager = VariantStorageManager::new(
            Arc::new(catalog),
            EngineRegistry::new().with_engine(engine.clone()),
            configuration,
        );

        let adaptor = engine.db_adaptor("db1").await.unwrap();
        let mut s1 = StudyConfiguration::new(1, "s1");
        s1.register_file(
            "a.vcf",
            5,
            &[("NA11".into(), 11), ("NA12".into(), 12), ("NA13".into(), 13)],
        );
        adaptor.store_study_configuration(&s1).await.unwrap();
        let mut s3 = StudyConfiguration::new(3, "s3");
        s3.register_file("g.vcf", 7, &[("G31".into(), 31)]);
        adaptor.store_study_configuration(&s3).await.unwrap();

        let s1_variants = (1..=10)
            .map(|i| variant(i * 100, 1, &[(11, "0|1"), (12, "0/1"), (13, "1/1")]))
            .collect();
        adaptor.load_variants(1, 5, s1_variants).await.unwrap();
        adaptor
            .load_variants(3, 7, vec![variant(5000, 3, &[(31, "0/1")])])
            .await
            .unwrap();
        adaptor.close().unwrap();

        Fixture { engine, manager }
    }

    fn small_limits() -> StorageConfiguration {
        StorageConfiguration {
            limit_default: 2,
            limit_max: 5,
            ..Default::default()
        }
    }

    fn s1() -> Query {
        Query::new().with(VariantQueryParam::Studies, "s1")
    }

    #[tokio::test]
    async fn test_main_study_id() {
        let f = fixture(StorageConfiguration::default()).await;
        let m = &f.manager;
        assert_eq!(m.main_study_id(&s1(), "tok-owner").await.unwrap(), 1);

        let q = Query::new()
            .with(VariantQueryParam::Studies, "!s2,s1")
            .with(VariantQueryParam::ReturnedStudies, "s3");
        assert_eq!(m.main_study_id(&q, "tok-owner").await.unwrap(), 1);

        let q = Query::new().with(VariantQueryParam::ReturnedStudies, "s3");
        assert_eq!(m.main_study_id(&q, "tok-guest").await.unwrap(), 3);

        assert!(matches!(
            m.main_study_id(&Query::new(), "tok-owner").await,
            Err(Error::MissingStudy)
        ));
        let q = Query::new().with(VariantQueryParam::Studies, "!s1");
        assert!(matches!(
            m.main_study_id(&q, "tok-owner").await,
            Err(Error::MissingStudy)
        ));
        let q = Query::new().with(VariantQueryParam::Studies, "s1,s3");
        assert!(matches!(
            m.main_study_id(&q, "tok-owner").await,
            Err(Error::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_get_limit_default_and_ceiling() {
        let f = fixture(small_limits()).await;
        let m = &f.manager;

        let r = m.get(&mut s1(), &QueryOptions::default(), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 2);
        let r = m.get(&mut s1(), &QueryOptions::with_limit(0), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 2);
        let r = m.get(&mut s1(), &QueryOptions::with_limit(-4), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 2);
        let r = m.get(&mut s1(), &QueryOptions::with_limit(100), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 5);
        let r = m.get(&mut s1(), &QueryOptions::with_limit(3), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 3);
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_default_limit_kept_within_bounds() {
        let above = StorageConfiguration {
            limit_default: 50,
            limit_max: 5,
            ..Default::default()
        };
        let f = fixture(above).await;
        let r = f.manager.get(&mut s1(), &QueryOptions::default(), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 5);

        let zero = StorageConfiguration {
            limit_default: 0,
            limit_max: 5,
            ..Default::default()
        };
        let f = fixture(zero).await;
        let r = f.manager.get(&mut s1(), &QueryOptions::default(), "tok-owner").await.unwrap();
        assert_eq!(r.num_results, 1);
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_samples_rejected_and_closed() {
        let f = fixture(StorageConfiguration::default()).await;
        let m = &f.manager;
        let denied = || s1().with(VariantQueryParam::ReturnedSamples, "NA11,NA13");

        assert!(matches!(
            m.get(&mut denied(), &QueryOptions::default(), "tok-guest").await,
            Err(Error::Authorization(_))
        ));
        assert!(matches!(
            m.count(&mut denied(), "tok-guest").await,
            Err(Error::Authorization(_))
        ));
        assert!(matches!(
            m.iterator(&mut denied(), &QueryOptions::default(), "tok-guest").await,
            Err(Error::Authorization(_))
        ));
        assert_eq!(f.engine.open_connections(), 0);
        assert_eq!(f.engine.double_closes(), 0);
    }

    #[tokio::test]
    async fn test_returned_samples_injected() {
        let f = fixture(StorageConfiguration::default()).await;
        let mut query = s1();
        let r = f
            .manager
            .get(&mut query, &QueryOptions::default(), "tok-guest")
            .await
            .unwrap();
        assert_eq!(query.get(VariantQueryParam::ReturnedSamples), Some("11,12"));
        let samples: Vec<i64> = r.result[0].studies[0].samples.keys().copied().collect();
        assert_eq!(samples, vec![11, 12]);

        let mut query = s1();
        f.manager.count(&mut query, "tok-owner").await.unwrap();
        assert_eq!(query.get(VariantQueryParam::ReturnedSamples), Some("11,12,13"));
    }

    #[tokio::test]
    async fn test_frequency_needs_one_region() {
        let f = fixture(StorageConfiguration::default()).await;
        let m = &f.manager;
        assert!(matches!(
            m.get_frequency(&mut s1(), 100, "tok-owner").await,
            Err(Error::InvalidQuery(_))
        ));
        let mut two = s1().with(VariantQueryParam::Region, "1:1-100,1:500-600");
        assert!(matches!(
            m.get_frequency(&mut two, 100, "tok-owner").await,
            Err(Error::InvalidQuery(_))
        ));

        let mut one = s1().with(VariantQueryParam::Region, "1:1-1000");
        let r = m.get_frequency(&mut one, 250, "tok-owner").await.unwrap();
        let counts: Vec<u64> = r.result.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 3, 2, 3]);
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_see_own_studies() {
        let f = fixture(StorageConfiguration::default()).await;
        let m = &f.manager;
        let mut q1 = s1();
        let mut q3 = Query::new().with(VariantQueryParam::Studies, "s3");
        let options = QueryOptions::default();
        let (owner, guest) = tokio::join!(
            m.get(&mut q1, &options, "tok-owner"),
            m.get(&mut q3, &options, "tok-guest"),
        );
        let owner = owner.unwrap();
        let guest = guest.unwrap();
        assert_eq!(owner.num_results, 10);
        assert!(owner.result.iter().all(|v| v.studies.iter().all(|s| s.study_id == 1)));
        assert_eq!(guest.num_results, 1);
        assert_eq!(guest.result[0].studies[0].study_id, 3);
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_iterator_owns_adaptor() {
        let f = fixture(StorageConfiguration::default()).await;
        let mut it = f
            .manager
            .iterator(&mut s1(), &QueryOptions::with_limit(3), "tok-owner")
            .await
            .unwrap();
        assert_eq!(f.engine.open_connections(), 1);
        assert!(it.next_variant().is_ok());
        it.close().unwrap();
        it.close().unwrap();
        assert_eq!(f.engine.open_connections(), 0);
        drop(it);
        assert_eq!(f.engine.double_closes(), 0);

        let all: Vec<Variant> = f
            .manager
            .iterator(&mut s1(), &QueryOptions::default(), "tok-owner")
            .await
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_rank_and_group() {
        let f = fixture(StorageConfiguration::default()).await;
        let r = f
            .manager
            .rank(&mut s1(), "chromosome", Some(100), false, "tok-owner")
            .await
            .unwrap();
        assert_eq!(r.result, vec![GroupCount { id: "1".into(), count: 10 }]);
        let r = f
            .manager
            .distinct(&mut s1(), "type", "tok-owner")
            .await
            .unwrap();
        assert_eq!(r.result, vec!["SNV".to_string()]);
        assert!(matches!(
            f.manager
                .group_by(&mut s1(), "colour", &QueryOptions::default(), "tok-owner")
                .await,
            Err(Error::InvalidQuery(_))
        ));
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_phased_and_metadata() {
        let f = fixture(StorageConfiguration::default()).await;
        let r = f
            .manager
            .get_phased("1:100:A:C", "s1", "NA11", &QueryOptions::default(), "tok-guest")
            .await
            .unwrap();
        assert_eq!(r.num_results, 10);
        assert!(matches!(
            f.manager
                .get_phased("1:100:A:C", "s1", "NA13", &QueryOptions::default(), "tok-guest")
                .await,
            Err(Error::Authorization(_))
        ));

        let samples = f
            .manager
            .get_samples_metadata(&mut s1(), &QueryOptions::default(), "tok-guest")
            .await
            .unwrap();
        let names: Vec<&str> = samples[&1].iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["NA11", "NA12"]);
        assert_eq!(f.engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_formatted_and_intersect() {
        let f = fixture(StorageConfiguration::default()).await;
        let query = s1();
        let r = f
            .manager
            .intersect(&query, &QueryOptions::default(), &["s1".into()], "tok-owner")
            .await
            .unwrap();
        assert_eq!(r.num_results, 10);
        assert!(!query.contains(VariantQueryParam::ReturnedSamples));

        let r = f
            .manager
            .get_formatted(&mut s1(), &QueryOptions::with_limit(1), "tok-owner", VariantFormat::Ga4ghProto)
            .await
            .unwrap();
        assert!(matches!(r, FormattedResult::Ga4ghProto(_)));
        assert_eq!(r.num_results(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let f = fixture(StorageConfiguration::default()).await;
        let m = &f.manager;
        assert!(matches!(
            m.delete_study("s1", "tok-owner").await,
            Err(Error::UnsupportedOperation("deleteStudy"))
        ));
        assert!(m.delete_file("s1", "a.vcf", "tok-owner").await.is_err());
        assert!(m.delete_annotation("s1", "a", "tok-owner").await.is_err());
        assert!(m.delete_stats("s1", &[], "tok-owner").await.is_err());
        assert!(matches!(
            m.facet(&s1(), &QueryOptions::default(), "tok-owner").await,
            Err(Error::UnsupportedOperation("facet"))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let slow = std::future::pending::<Result<()>>();
        let r = with_timeout(Some(Duration::from_millis(10)), "slow", slow).await;
        assert!(matches!(r, Err(Error::Timeout(_))));
        let fast = async { Ok(1) };
        assert_eq!(with_timeout(None, "fast", fast).await.unwrap(), 1);
    }
}
