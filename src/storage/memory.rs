use super::{
    JsonRowConverter, RawCursor, RowConverter, VariantDbAdaptor, VariantResultIterator,
    VariantStorageEngine,
};
use crate::{
    Error, Result,
    query::{Query, QueryOperation, QueryOptions, VariantQueryParam, is_negated, remove_negation},
    study_configuration::StudyConfiguration,
    types::{
        FrequencyBin, GroupCount, QueryResult, Region, StudyEntry, Variant, VariantAnnotation,
        VariantStats, VariantType,
    },
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

pub const MEMORY_ENGINE: &str = "memory";

/// Rows are keyed by chromosome, start, reference and alternate.
type RowKey = (String, u64, String, String);

#[derive(Default)]
struct MemoryDatabase {
    rows: RwLock<BTreeMap<RowKey, Vec<u8>>>,
    configurations: RwLock<BTreeMap<i64, StudyConfiguration>>,
}

#[derive(Default)]
struct Connections {
    open: AtomicUsize,
    double_closes: AtomicUsize,
}

/// In-process storage engine.
///
/// Variants are stored as encoded rows per database, so reads go through the
/// same decode step as a remote engine's scanner.
#[derive(Default)]
pub struct MemoryEngine {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    connections: Arc<Connections>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adaptors handed out and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connections.open.load(Ordering::SeqCst)
    }

    /// Number of close calls on already closed adaptors.
    pub fn double_closes(&self) -> usize {
        self.connections.double_closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VariantStorageEngine for MemoryEngine {
    fn name(&self) -> &str {
        MEMORY_ENGINE
    }

    async fn db_adaptor(&self, db_name: &str) -> Result<Box<dyn VariantDbAdaptor>> {
        let db = self
            .databases
            .lock()
            .map_err(poisoned)?
            .entry(db_name.to_string())
            .or_default()
            .clone();
        self.connections.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryAdaptor {
            db,
            connections: self.connections.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::Internal("memory store lock poisoned".to_string())
}

fn row_key(v: &Variant) -> RowKey {
    (
        v.chromosome.clone(),
        v.start,
        v.reference.clone(),
        v.alternate.clone(),
    )
}

fn encode(v: &Variant) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(v)?)
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Include/exclude id terms of one parameter.
#[derive(Debug, Default)]
struct TermFilter {
    op: Option<QueryOperation>,
    include: Vec<i64>,
    exclude: Vec<i64>,
}

impl TermFilter {
    fn compile(
        query: &Query,
        param: VariantQueryParam,
        resolve: impl Fn(&str) -> Result<i64>,
    ) -> Result<Self> {
        let (op, terms) = query.terms(param)?;
        let mut filter = TermFilter {
            op,
            ..Default::default()
        };
        for term in terms {
            let id = resolve(remove_negation(&term))?;
            if is_negated(&term) {
                filter.exclude.push(id);
            } else {
                filter.include.push(id);
            }
        }
        Ok(filter)
    }

    fn matches(&self, present: &BTreeSet<i64>) -> bool {
        if self.exclude.iter().any(|id| present.contains(id)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        match self.op {
            Some(QueryOperation::And) => self.include.iter().all(|id| present.contains(id)),
            _ => self.include.iter().any(|id| present.contains(id)),
        }
    }
}

/// Name resolution against the study configurations of a database.
struct Names<'a> {
    configurations: &'a [StudyConfiguration],
}

impl Names<'_> {
    fn study(&self, term: &str) -> Result<i64> {
        if let Ok(id) = term.parse() {
            return Ok(id);
        }
        self.configurations
            .iter()
            .find(|sc| sc.study_name == term)
            .map(|sc| sc.study_id)
            .ok_or_else(|| {
                Error::InvalidQuery(format!("study {} is not loaded in this database", term))
            })
    }

    fn file(&self, term: &str) -> Result<i64> {
        if let Ok(id) = term.parse() {
            return Ok(id);
        }
        self.configurations
            .iter()
            .find_map(|sc| sc.file_ids.get(term).copied())
            .ok_or_else(|| Error::InvalidQuery(format!("unknown file {}", term)))
    }

    /// Owning study and id of a sample given by id or name.
    fn sample(&self, term: &str) -> Result<(i64, i64)> {
        let by_id = term.parse::<i64>().ok();
        self.configurations
            .iter()
            .find_map(|sc| {
                sc.sample_ids
                    .iter()
                    .find(|(name, id)| Some(**id) == by_id || name.as_str() == term)
                    .map(|(_, id)| (sc.study_id, *id))
            })
            .ok_or_else(|| Error::InvalidQuery(format!("unknown sample {}", term)))
    }

    fn sample_id(&self, term: &str) -> Result<i64> {
        match term.parse() {
            Ok(id) => Ok(id),
            Err(_) => self.sample(term).map(|(_, id)| id),
        }
    }

    fn all_studies(&self) -> Vec<i64> {
        self.configurations.iter().map(|sc| sc.study_id).collect()
    }

    fn returned_studies(&self, query: &Query) -> Result<Vec<i64>> {
        let param = if query.is_valid_param(VariantQueryParam::ReturnedStudies) {
            VariantQueryParam::ReturnedStudies
        } else if query.is_valid_param(VariantQueryParam::Studies) {
            VariantQueryParam::Studies
        } else {
            return Ok(self.all_studies());
        };
        let terms = TermFilter::compile(query, param, |t| self.study(t))?;
        let mut studies = if terms.include.is_empty() {
            self.all_studies()
        } else {
            terms.include
        };
        studies.retain(|s| !terms.exclude.contains(s));
        studies.dedup();
        Ok(studies)
    }
}

/// Compiled filter predicates.
#[derive(Debug, Default)]
struct VariantFilter {
    ids: Vec<String>,
    regions: Vec<Region>,
    genes: Vec<String>,
    types: Vec<VariantType>,
    studies: TermFilter,
    files: TermFilter,
    genotypes: Vec<(i64, Vec<String>)>,
    annotated: Option<bool>,
}

impl VariantFilter {
    fn compile(query: &Query, names: &Names<'_>) -> Result<Self> {
        let regions = query
            .get_list(VariantQueryParam::Region)
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<Region>>>()?;
        let types = query
            .get_list(VariantQueryParam::Type)
            .iter()
            .map(|t| t.parse())
            .collect::<Result<Vec<VariantType>>>()?;

        let mut genotypes = Vec::new();
        if let Some(value) = query.get(VariantQueryParam::Genotype) {
            for part in value.split(';').filter(|p| !p.trim().is_empty()) {
                let (sample, gts) = part.split_once(':').ok_or_else(|| {
                    Error::InvalidQuery(format!("genotype filter {} must be sample:gt", part))
                })?;
                let gts = gts.split(',').map(|g| g.trim().to_string()).collect();
                genotypes.push((names.sample_id(sample.trim())?, gts));
            }
        }

        let annotated = match query.get(VariantQueryParam::Annotated) {
            Some(v) if !v.trim().is_empty() => Some(v.eq_ignore_ascii_case("true")),
            _ => None,
        };

        Ok(Self {
            ids: query.get_list(VariantQueryParam::Id),
            regions,
            genes: query.get_list(VariantQueryParam::Gene),
            types,
            studies: TermFilter::compile(query, VariantQueryParam::Studies, |t| names.study(t))?,
            files: TermFilter::compile(query, VariantQueryParam::Files, |t| names.file(t))?,
            genotypes,
            annotated,
        })
    }

    fn matches(&self, v: &Variant) -> bool {
        if !self.ids.is_empty() {
            let key = v.to_string();
            if !self.ids.iter().any(|id| *id == key || v.ids.contains(id)) {
                return false;
            }
        }
        if !self.regions.is_empty()
            && !self
                .regions
                .iter()
                .any(|r| r.overlaps(&v.chromosome, v.start, v.end))
        {
            return false;
        }
        if !self.types.is_empty() && !self.types.contains(&v.variant_type) {
            return false;
        }
        if !self.genes.is_empty() {
            let genes = v.annotation.as_ref().map(|a| &a.gene_names);
            if !genes.is_some_and(|g| g.iter().any(|name| self.genes.contains(name))) {
                return false;
            }
        }
        if let Some(annotated) = self.annotated {
            if v.annotation.is_some() != annotated {
                return false;
            }
        }
        let studies: BTreeSet<i64> = v.studies.iter().map(|s| s.study_id).collect();
        if !self.studies.matches(&studies) {
            return false;
        }
        let files: BTreeSet<i64> = v
            .studies
            .iter()
            .flat_map(|s| s.file_ids.iter().copied())
            .collect();
        if !self.files.matches(&files) {
            return false;
        }
        self.genotypes.iter().all(|(sample, gts)| {
            v.studies
                .iter()
                .filter_map(|s| s.samples.get(sample))
                .any(|data| gts.contains(&data.genotype))
        })
    }
}

/// Which parts of a matching variant are returned.
#[derive(Debug, Default)]
struct Projection {
    studies: Option<BTreeSet<i64>>,
    samples: Option<BTreeSet<i64>>,
    exclude_studies: bool,
    exclude_annotation: bool,
}

impl Projection {
    fn compile(query: &Query, options: &QueryOptions, names: &Names<'_>) -> Result<Self> {
        let studies = if query.is_valid_param(VariantQueryParam::ReturnedStudies)
            || query.is_valid_param(VariantQueryParam::Studies)
        {
            Some(names.returned_studies(query)?.into_iter().collect())
        } else {
            None
        };
        // An empty returned-samples value means no samples, not all of them.
        let samples = if query.contains(VariantQueryParam::ReturnedSamples) {
            Some(
                query
                    .get_list(VariantQueryParam::ReturnedSamples)
                    .iter()
                    .map(|s| names.sample_id(s))
                    .collect::<Result<BTreeSet<i64>>>()?,
            )
        } else {
            None
        };
        Ok(Self {
            studies,
            samples,
            exclude_studies: options.exclude.iter().any(|e| e == "studies"),
            exclude_annotation: options.exclude.iter().any(|e| e == "annotation"),
        })
    }

    fn apply(&self, mut v: Variant) -> Variant {
        if self.exclude_annotation {
            v.annotation = None;
        }
        if self.exclude_studies {
            v.studies.clear();
            return v;
        }
        if let Some(studies) = &self.studies {
            v.studies.retain(|s| studies.contains(&s.study_id));
        }
        if let Some(samples) = &self.samples {
            for entry in v.studies.iter_mut() {
                entry.samples.retain(|id, _| samples.contains(id));
            }
        }
        v
    }
}

fn group_keys(field: &str, v: &Variant) -> Result<Vec<String>> {
    Ok(match field {
        "chromosome" => vec![v.chromosome.clone()],
        "type" => vec![v.variant_type.as_str().to_string()],
        "gene" => v
            .annotation
            .as_ref()
            .map(|a| a.gene_names.clone())
            .unwrap_or_default(),
        "study" => v.studies.iter().map(|s| s.study_id.to_string()).collect(),
        other => {
            return Err(Error::InvalidQuery(format!(
                "cannot group by field {}",
                other
            )));
        }
    })
}

struct MemoryCursor {
    rows: std::vec::IntoIter<Vec<u8>>,
}

impl RawCursor for MemoryCursor {
    fn has_next(&mut self) -> bool {
        self.rows.len() > 0
    }

    fn next_row(&mut self) -> Result<Vec<u8>> {
        self.rows
            .next()
            .ok_or_else(|| Error::Exhausted("memory scan".to_string()))
    }

    fn close(&mut self) {
        self.rows = Vec::new().into_iter();
    }
}

struct MemoryAdaptor {
    db: Arc<MemoryDatabase>,
    connections: Arc<Connections>,
    closed: AtomicBool,
}

impl MemoryAdaptor {
    fn configurations(&self) -> Result<Vec<StudyConfiguration>> {
        Ok(self
            .db
            .configurations
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect())
    }

    fn decode_all(&self) -> Result<Vec<Variant>> {
        let rows = self.db.rows.read().map_err(poisoned)?;
        rows.values().map(|row| JsonRowConverter.convert(row)).collect()
    }

    fn scan(&self, query: &Query) -> Result<Vec<Variant>> {
        let configurations = self.configurations()?;
        let names = Names {
            configurations: &configurations,
        };
        let filter = VariantFilter::compile(query, &names)?;
        let mut variants = self.decode_all()?;
        variants.retain(|v| filter.matches(v));
        Ok(variants)
    }

    fn projection(&self, query: &Query, options: &QueryOptions) -> Result<Projection> {
        let configurations = self.configurations()?;
        Projection::compile(
            query,
            options,
            &Names {
                configurations: &configurations,
            },
        )
    }

    fn group(&self, query: &Query, field: &str) -> Result<Vec<GroupCount>> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for v in self.scan(query)? {
            for key in group_keys(field, &v)? {
                *counts.entry(key).or_default() += 1;
            }
        }
        let mut groups: Vec<GroupCount> = counts
            .into_iter()
            .map(|(id, count)| GroupCount { id, count })
            .collect();
        groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.id.cmp(&b.id)));
        Ok(groups)
    }

    /// Decode, modify and re-encode an existing row.
    fn update_row(
        rows: &mut BTreeMap<RowKey, Vec<u8>>,
        key: &RowKey,
        update: impl FnOnce(&mut Variant),
    ) -> Result<bool> {
        let Some(row) = rows.get_mut(key) else {
            return Ok(false);
        };
        let mut variant = JsonRowConverter.convert(row)?;
        update(&mut variant);
        *row = encode(&variant)?;
        Ok(true)
    }
}

fn limit_of(options: &QueryOptions) -> usize {
    options
        .limit
        .filter(|l| *l > 0)
        .map(|l| l as usize)
        .unwrap_or(usize::MAX)
}

#[async_trait]
impl VariantDbAdaptor for MemoryAdaptor {
    async fn get(&self, query: &Query, options: &QueryOptions) -> Result<QueryResult<Variant>> {
        let start = Instant::now();
        let projection = self.projection(query, options)?;
        let matched = self.scan(query)?;
        let total = matched.len() as u64;
        let result = matched
            .into_iter()
            .skip(options.skip)
            .take(limit_of(options))
            .map(|v| projection.apply(v))
            .collect();
        let result = QueryResult::new("getVariants", elapsed_ms(start), result);
        Ok(if options.count {
            result.with_total(total)
        } else {
            result
        })
    }

    async fn count(&self, query: &Query) -> Result<QueryResult<u64>> {
        let start = Instant::now();
        let n = self.scan(query)?.len() as u64;
        Ok(QueryResult::new("countVariants", elapsed_ms(start), vec![n]).with_total(n))
    }

    async fn group_by(
        &self,
        query: &Query,
        field: &str,
        options: &QueryOptions,
    ) -> Result<QueryResult<GroupCount>> {
        let start = Instant::now();
        let mut groups = self.group(query, field)?;
        let total = groups.len() as u64;
        groups.truncate(limit_of(options));
        Ok(QueryResult::new(format!("groupBy {}", field), elapsed_ms(start), groups).with_total(total))
    }

    async fn rank(
        &self,
        query: &Query,
        field: &str,
        limit: usize,
        ascending: bool,
    ) -> Result<QueryResult<GroupCount>> {
        let start = Instant::now();
        let mut groups = self.group(query, field)?;
        if ascending {
            groups.sort_by(|a, b| a.count.cmp(&b.count).then_with(|| a.id.cmp(&b.id)));
        }
        groups.truncate(limit);
        Ok(QueryResult::new(format!("rank {}", field), elapsed_ms(start), groups))
    }

    async fn distinct(&self, query: &Query, field: &str) -> Result<QueryResult<String>> {
        let start = Instant::now();
        let mut values: Vec<String> = self.group(query, field)?.into_iter().map(|g| g.id).collect();
        values.sort();
        Ok(QueryResult::new(format!("distinct {}", field), elapsed_ms(start), values))
    }

    async fn iterator(
        &self,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<VariantResultIterator> {
        let projection = self.projection(query, options)?;
        let rows = self
            .scan(query)?
            .into_iter()
            .skip(options.skip)
            .map(|v| encode(&projection.apply(v)))
            .collect::<Result<Vec<_>>>()?;
        Ok(VariantResultIterator::new(
            Box::new(MemoryCursor {
                rows: rows.into_iter(),
            }),
            Box::new(JsonRowConverter),
            options.limit,
        ))
    }

    async fn returned_samples(
        &self,
        query: &Query,
        _options: &QueryOptions,
    ) -> Result<BTreeMap<i64, Vec<i64>>> {
        let configurations = self.configurations()?;
        let names = Names {
            configurations: &configurations,
        };
        let studies = names.returned_studies(query)?;
        let mut grouped: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for term in query.get_list(VariantQueryParam::ReturnedSamples) {
            if is_negated(&term) {
                return Err(Error::InvalidQuery(format!(
                    "negated returned sample {} is not supported",
                    term
                )));
            }
            let (study, sample) = names.sample(&term)?;
            if studies.contains(&study) {
                let samples = grouped.entry(study).or_default();
                if !samples.contains(&sample) {
                    samples.push(sample);
                }
            }
        }
        Ok(grouped)
    }

    async fn returned_studies(&self, query: &Query, _options: &QueryOptions) -> Result<Vec<i64>> {
        let configurations = self.configurations()?;
        Names {
            configurations: &configurations,
        }
        .returned_studies(query)
    }

    async fn phased(
        &self,
        variant: &Variant,
        study_id: i64,
        sample_id: i64,
        options: &QueryOptions,
        window: u64,
    ) -> Result<QueryResult<Variant>> {
        let start = Instant::now();
        let key = row_key(variant);
        let variants = self.decode_all()?;
        let projection = Projection {
            studies: Some([study_id].into_iter().collect()),
            samples: Some([sample_id].into_iter().collect()),
            ..Default::default()
        };

        let phased_in = |v: &Variant| {
            v.study(study_id)
                .and_then(|s| s.samples.get(&sample_id))
                .is_some_and(|d| d.is_phased())
        };

        let result: Vec<Variant> = match variants.iter().find(|v| row_key(v) == key) {
            None => Vec::new(),
            Some(target) if !phased_in(target) => {
                if target.study(study_id).is_some() {
                    vec![projection.apply(target.clone())]
                } else {
                    Vec::new()
                }
            }
            Some(target) => {
                let from = target.start.saturating_sub(window);
                let to = target.start.saturating_add(window);
                variants
                    .iter()
                    .filter(|v| v.chromosome == target.chromosome)
                    .filter(|v| v.start >= from && v.start <= to)
                    .filter(|v| phased_in(v))
                    .take(limit_of(options))
                    .map(|v| projection.apply(v.clone()))
                    .collect()
            }
        };
        Ok(QueryResult::new("getPhased", elapsed_ms(start), result))
    }

    async fn frequency(
        &self,
        query: &Query,
        region: &Region,
        interval: u64,
    ) -> Result<QueryResult<FrequencyBin>> {
        if interval == 0 {
            return Err(Error::InvalidQuery("interval must be positive".to_string()));
        }
        let start = Instant::now();
        let matched: Vec<Variant> = self
            .scan(query)?
            .into_iter()
            .filter(|v| region.overlaps(&v.chromosome, v.start, v.end))
            .collect();
        let end = if region.end == u64::MAX {
            matched.iter().map(|v| v.start).max().unwrap_or(region.start)
        } else {
            region.end
        };

        let mut bins = Vec::new();
        let mut bin_start = region.start;
        while bin_start <= end {
            let bin_end = bin_start.saturating_add(interval - 1).min(end);
            let count = matched
                .iter()
                .filter(|v| v.start >= bin_start && v.start <= bin_end)
                .count() as u64;
            bins.push(FrequencyBin {
                chromosome: region.chromosome.clone(),
                start: bin_start,
                end: bin_end,
                count,
            });
            if bin_end == u64::MAX {
                break;
            }
            bin_start = bin_end + 1;
        }
        Ok(QueryResult::new("getFrequency", elapsed_ms(start), bins))
    }

    async fn study_configuration(&self, study_id: i64) -> Result<Option<StudyConfiguration>> {
        Ok(self
            .db
            .configurations
            .read()
            .map_err(poisoned)?
            .get(&study_id)
            .cloned())
    }

    async fn store_study_configuration(&self, configuration: &StudyConfiguration) -> Result<()> {
        configuration.validate()?;
        self.db
            .configurations
            .write()
            .map_err(poisoned)?
            .insert(configuration.study_id, configuration.clone());
        Ok(())
    }

    async fn load_variants(
        &self,
        study_id: i64,
        file_id: i64,
        variants: Vec<Variant>,
    ) -> Result<u64> {
        let mut rows = self.db.rows.write().map_err(poisoned)?;
        let mut written = 0;
        for mut variant in variants {
            if variant.study(study_id).is_none() {
                variant.merge_study(StudyEntry::new(study_id));
            }
            if let Some(entry) = variant.study_mut(study_id) {
                if !entry.file_ids.contains(&file_id) {
                    entry.file_ids.push(file_id);
                }
            }

            let key = row_key(&variant);
            let row = match rows.get(&key) {
                Some(existing) => {
                    let mut merged = JsonRowConverter.convert(existing)?;
                    for entry in variant.studies {
                        merged.merge_study(entry);
                    }
                    if merged.annotation.is_none() {
                        merged.annotation = variant.annotation;
                    }
                    encode(&merged)?
                }
                None => encode(&variant)?,
            };
            rows.insert(key, row);
            written += 1;
        }
        tracing::debug!("loaded {} variants of file {} into study {}", written, file_id, study_id);
        Ok(written)
    }

    async fn update_annotations(&self, annotations: Vec<(String, VariantAnnotation)>) -> Result<u64> {
        let mut rows = self.db.rows.write().map_err(poisoned)?;
        let mut updated = 0;
        for (id, annotation) in annotations {
            let key = row_key(&id.parse::<Variant>()?);
            if Self::update_row(&mut rows, &key, |v| v.annotation = Some(annotation))? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_stats(
        &self,
        study_id: i64,
        cohort: &str,
        stats: Vec<(String, VariantStats)>,
    ) -> Result<u64> {
        let mut rows = self.db.rows.write().map_err(poisoned)?;
        let mut updated = 0;
        for (id, stat) in stats {
            let key = row_key(&id.parse::<Variant>()?);
            let changed = Self::update_row(&mut rows, &key, |v| {
                if let Some(entry) = v.study_mut(study_id) {
                    entry.stats.insert(cohort.to_string(), stat);
                }
            })?;
            if changed {
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            self.connections.double_closes.fetch_add(1, Ordering::SeqCst);
            tracing::warn!("memory adaptor closed twice");
            return Ok(());
        }
        self.connections.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleData;

    fn variant(chr: &str, pos: u64, r: &str, a: &str, study: i64, calls: &[(i64, &str)]) -> Variant {
        let mut v = Variant::new(chr, pos, r, a);
        let mut entry = StudyEntry::new(study);
        for (sample, gt) in calls {
            entry.samples.insert(
                *sample,
                SampleData {
                    genotype: gt.to_string(),
                },
            );
        }
        v.merge_study(entry);
        v
    }

    async fn loaded() -> (MemoryEngine, Box<dyn VariantDbAdaptor>) {
        let engine = MemoryEngine::new();
        let adaptor = engine.db_adaptor("db").await.unwrap();

        let mut sc = StudyConfiguration::new(1, "s1");
        sc.register_file("a.vcf", 5, &[("NA1".into(), 11), ("NA2".into(), 12)]);
        sc.indexed_files.insert(5);
        adaptor.store_study_configuration(&sc).await.unwrap();
        let mut sc2 = StudyConfiguration::new(2, "s2");
        sc2.register_file("b.vcf", 6, &[("NA3".into(), 21)]);
        sc2.indexed_files.insert(6);
        adaptor.store_study_configuration(&sc2).await.unwrap();

        adaptor
            .load_variants(
                1,
                5,
                vec![
                    variant("1", 100, "A", "C", 1, &[(11, "0|1"), (12, "0/0")]),
                    variant("1", 200, "A", "AT", 1, &[(11, "1|0"), (12, "0/1")]),
                    variant("2", 50, "G", "T", 1, &[(11, "0/0"), (12, "1/1")]),
                ],
            )
            .await
            .unwrap();
        adaptor
            .load_variants(2, 6, vec![variant("1", 100, "A", "C", 2, &[(21, "0/1")])])
            .await
            .unwrap();
        (engine, adaptor)
    }

    #[tokio::test]
    async fn test_load_merges_studies() {
        let (_engine, adaptor) = loaded().await;
        let all = adaptor.get(&Query::new(), &QueryOptions::default()).await.unwrap();
        assert_eq!(all.num_results, 3);
        let first = &all.result[0];
        assert_eq!(first.to_string(), "1:100:A:C");
        assert_eq!(first.studies.len(), 2);
        assert_eq!(first.study(2).unwrap().file_ids, vec![6]);
    }

    #[tokio::test]
    async fn test_filters() {
        let (_engine, adaptor) = loaded().await;
        let count = |q: Query| {
            let adaptor = &adaptor;
            async move { adaptor.count(&q).await.unwrap().result[0] }
        };
        assert_eq!(count(Query::new().with(VariantQueryParam::Region, "1:1-150")).await, 1);
        assert_eq!(count(Query::new().with(VariantQueryParam::Region, "1,2")).await, 3);
        assert_eq!(count(Query::new().with(VariantQueryParam::Type, "INDEL")).await, 1);
        assert_eq!(count(Query::new().with(VariantQueryParam::Studies, "s2")).await, 1);
        assert_eq!(count(Query::new().with(VariantQueryParam::Studies, "s1;s2")).await, 1);
        assert_eq!(count(Query::new().with(VariantQueryParam::Studies, "s1,!s2")).await, 2);
        assert_eq!(count(Query::new().with(VariantQueryParam::Files, "a.vcf")).await, 3);
        assert_eq!(count(Query::new().with(VariantQueryParam::Genotype, "NA2:1/1,0/1")).await, 2);
        assert_eq!(count(Query::new().with(VariantQueryParam::Id, "2:50:G:T")).await, 1);
        assert_eq!(count(Query::new().with(VariantQueryParam::Annotated, "true")).await, 0);

        let bad = adaptor
            .count(&Query::new().with(VariantQueryParam::Studies, "s9"))
            .await;
        assert!(matches!(bad, Err(Error::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_projection_of_returned_samples() {
        let (_engine, adaptor) = loaded().await;
        let q = Query::new()
            .with(VariantQueryParam::Studies, "s1")
            .with(VariantQueryParam::ReturnedSamples, "12");
        let r = adaptor.get(&q, &QueryOptions::default()).await.unwrap();
        for v in &r.result {
            assert_eq!(v.studies.len(), 1);
            let samples: Vec<i64> = v.studies[0].samples.keys().copied().collect();
            assert_eq!(samples, vec![12]);
        }

        let q = Query::new().with(VariantQueryParam::ReturnedSamples, "");
        let r = adaptor.get(&q, &QueryOptions::default()).await.unwrap();
        assert!(r.result.iter().all(|v| v.studies.iter().all(|s| s.samples.is_empty())));
    }

    #[tokio::test]
    async fn test_returned_samples_and_studies() {
        let (_engine, adaptor) = loaded().await;
        let o = QueryOptions::default();
        assert_eq!(adaptor.returned_studies(&Query::new(), &o).await.unwrap(), vec![1, 2]);
        let q = Query::new()
            .with(VariantQueryParam::Studies, "s1,s2")
            .with(VariantQueryParam::ReturnedStudies, "!s1");
        assert_eq!(adaptor.returned_studies(&q, &o).await.unwrap(), vec![2]);

        let q = Query::new().with(VariantQueryParam::ReturnedSamples, "NA2,11,21");
        let grouped = adaptor.returned_samples(&q, &o).await.unwrap();
        assert_eq!(grouped[&1], vec![12, 11]);
        assert_eq!(grouped[&2], vec![21]);

        let q = Query::new().with(VariantQueryParam::ReturnedSamples, "NA9");
        assert!(adaptor.returned_samples(&q, &o).await.is_err());
    }

    #[tokio::test]
    async fn test_group_rank_distinct() {
        let (_engine, adaptor) = loaded().await;
        let q = Query::new();
        let groups = adaptor
            .group_by(&q, "chromosome", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(groups.result[0], GroupCount { id: "1".into(), count: 2 });

        let ranked = adaptor.rank(&q, "chromosome", 1, true).await.unwrap();
        assert_eq!(ranked.result, vec![GroupCount { id: "2".into(), count: 1 }]);

        let distinct = adaptor.distinct(&q, "type").await.unwrap();
        assert_eq!(distinct.result, vec!["INDEL".to_string(), "SNV".to_string()]);

        assert!(adaptor.distinct(&q, "colour").await.is_err());
    }

    #[tokio::test]
    async fn test_iterator_applies_skip_and_limit() {
        let (_engine, adaptor) = loaded().await;
        let options = QueryOptions {
            limit: Some(1),
            skip: 1,
            ..Default::default()
        };
        let variants: Vec<Variant> = adaptor
            .iterator(&Query::new(), &options)
            .await
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].to_string(), "1:200:A:AT");
    }

    #[tokio::test]
    async fn test_phased() {
        let (_engine, adaptor) = loaded().await;
        let target: Variant = "1:100:A:C".parse().unwrap();
        let r = adaptor
            .phased(&target, 1, 11, &QueryOptions::default(), 5000)
            .await
            .unwrap();
        let ids: Vec<String> = r.result.iter().map(|v| v.to_string()).collect();
        assert_eq!(ids, vec!["1:100:A:C", "1:200:A:AT"]);

        let r = adaptor
            .phased(&target, 1, 11, &QueryOptions::default(), 10)
            .await
            .unwrap();
        assert_eq!(r.num_results, 1);

        let r = adaptor
            .phased(&target, 1, 12, &QueryOptions::default(), 5000)
            .await
            .unwrap();
        assert_eq!(r.num_results, 1);
    }

    #[tokio::test]
    async fn test_frequency_bins() {
        let (_engine, adaptor) = loaded().await;
        let region: Region = "1:1-300".parse().unwrap();
        let r = adaptor.frequency(&Query::new(), &region, 100).await.unwrap();
        let counts: Vec<u64> = r.result.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 0]);
        assert!(adaptor.frequency(&Query::new(), &region, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_annotations_and_stats() {
        let (_engine, adaptor) = loaded().await;
        let updated = adaptor
            .update_annotations(vec![(
                "1:100:A:C".into(),
                VariantAnnotation {
                    gene_names: vec!["BRCA2".into()],
                    ..Default::default()
                },
            )])
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let q = Query::new().with(VariantQueryParam::Gene, "BRCA2");
        assert_eq!(adaptor.count(&q).await.unwrap().result[0], 1);

        let updated = adaptor
            .update_stats(1, "ALL", vec![("2:50:G:T".into(), VariantStats::default())])
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let q = Query::new().with(VariantQueryParam::Id, "2:50:G:T");
        let r = adaptor.get(&q, &QueryOptions::default()).await.unwrap();
        assert!(r.result[0].study(1).unwrap().stats.contains_key("ALL"));
    }

    #[tokio::test]
    async fn test_close_counts_connections() {
        let (engine, adaptor) = loaded().await;
        assert_eq!(engine.open_connections(), 1);
        adaptor.close().unwrap();
        assert_eq!(engine.open_connections(), 0);
        adaptor.close().unwrap();
        assert_eq!(engine.double_closes(), 1);
    }
}
