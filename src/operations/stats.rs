use super::StudyContext;
use crate::{
    Error, Result,
    query::{Query, QueryOptions, VariantQueryParam},
    study_configuration::DEFAULT_COHORT,
    types::{StudyEntry, VariantStats},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsOptions {
    /// Recalculate cohorts whose stats are already up to date.
    pub overwrite: bool,
}

/// Allele and genotype counts of `members` at one study entry.
///
/// Members without a call at the variant are counted as missing. Allele `1` is
/// the variant's alternate; alleles of other alternates at a split multi-allelic
/// site are neither reference nor alternate.
pub fn compute_stats(entry: &StudyEntry, members: &BTreeSet<i64>) -> VariantStats {
    let mut stats = VariantStats::default();
    for sample in members {
        let Some(data) = entry.samples.get(sample) else {
            stats.missing_allele_count += 2;
            continue;
        };
        *stats
            .genotype_counts
            .entry(data.genotype.clone())
            .or_default() += 1;
        for allele in data.alleles() {
            match allele {
                Some(0) => stats.ref_allele_count += 1,
                Some(1) => stats.alt_allele_count += 1,
                Some(_) => {}
                None => stats.missing_allele_count += 1,
            }
        }
    }
    let called = stats.ref_allele_count + stats.alt_allele_count;
    if called > 0 {
        let minor = stats.ref_allele_count.min(stats.alt_allele_count);
        stats.maf = minor as f64 / called as f64;
    }
    stats
}

/// Calculate cohort statistics over every variant of a study.
pub struct VariantStatsOperation {
    context: StudyContext,
    options: StatsOptions,
}

impl VariantStatsOperation {
    pub fn new(context: StudyContext, options: StatsOptions) -> Self {
        Self { context, options }
    }

    /// Cohort names to (id, members), creating the default cohort on demand.
    fn resolve_cohorts(&mut self, names: &[String]) -> Result<Vec<(String, i64, BTreeSet<i64>)>> {
        let names: Vec<String> = if names.is_empty() {
            vec![DEFAULT_COHORT.to_string()]
        } else {
            names.to_vec()
        };
        let configuration = &mut self.context.configuration;
        let mut cohorts = Vec::with_capacity(names.len());
        for name in names {
            let id = if name == DEFAULT_COHORT {
                let members = configuration.indexed_samples();
                configuration.upsert_cohort(DEFAULT_COHORT, members)
            } else {
                configuration.cohort_id(&name).ok_or_else(|| {
                    Error::InvalidInput(format!("unknown cohort {}", name))
                })?
            };
            if !self.options.overwrite && configuration.calculated_stats.contains(&id) {
                return Err(Error::InvalidInput(format!(
                    "stats of cohort {} are already calculated",
                    name
                )));
            }
            let members = configuration.cohorts.get(&id).cloned().unwrap_or_default();
            if members.is_empty() {
                return Err(Error::InvalidInput(format!("cohort {} has no samples", name)));
            }
            cohorts.push((name, id, members));
        }
        Ok(cohorts)
    }

    pub async fn run(mut self, cohorts: &[String]) -> Result<()> {
        let study_id = self.context.study_id();
        let cohorts = self.resolve_cohorts(cohorts)?;

        let query = Query::new().with(VariantQueryParam::Studies, study_id.to_string());
        let iterator = self
            .context
            .adaptor
            .iterator(&query, &QueryOptions::default())
            .await?;
        let groups = cohorts.clone();
        let mut per_cohort = super::blocking(move || {
            let mut per_cohort: BTreeMap<String, Vec<(String, VariantStats)>> = BTreeMap::new();
            for variant in iterator {
                let variant = variant?;
                let Some(entry) = variant.study(study_id) else {
                    continue;
                };
                for (name, _, members) in &groups {
                    per_cohort
                        .entry(name.clone())
                        .or_default()
                        .push((variant.to_string(), compute_stats(entry, members)));
                }
            }
            Ok(per_cohort)
        })
        .await?;

        for (name, id, _) in cohorts {
            let stats = per_cohort.remove(&name).unwrap_or_default();
            let updated = self
                .context
                .adaptor
                .update_stats(study_id, &name, stats)
                .await?;
            tracing::info!("calculated stats of cohort {} for {} variants", name, updated);
            self.context.configuration.mark_stats_calculated(id);
        }
        self.context.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleData;

    fn entry(calls: &[(i64, &str)]) -> StudyEntry {
        let mut entry = StudyEntry::new(1);
        for (sample, gt) in calls {
            entry.samples.insert(*sample, SampleData { genotype: gt.to_string() });
        }
        entry
    }

    #[test]
    fn test_counts_and_maf() {
        let e = entry(&[(1, "0/1"), (2, "1|1"), (3, "0/0"), (4, "./.")]);
        let members: BTreeSet<i64> = [1, 2, 3, 4].into_iter().collect();
        let stats = compute_stats(&e, &members);
        assert_eq!(stats.ref_allele_count, 3);
        assert_eq!(stats.alt_allele_count, 3);
        assert_eq!(stats.missing_allele_count, 2);
        assert_eq!(stats.genotype_counts["0/1"], 1);
        assert_eq!(stats.genotype_counts["./."], 1);
        assert!((stats.maf - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_other_alternates_not_counted() {
        let members: BTreeSet<i64> = [11, 12].into_iter().collect();
        // 1:200 A>AT,G split per alternate.
        let at = compute_stats(&entry(&[(11, "1|0"), (12, "1/2")]), &members);
        assert_eq!(at.ref_allele_count, 1);
        assert_eq!(at.alt_allele_count, 2);
        assert_eq!(at.missing_allele_count, 0);
        assert!((at.maf - 1.0 / 3.0).abs() < 1e-9);

        let g = compute_stats(&entry(&[(11, "2|0"), (12, "2/1")]), &members);
        assert_eq!(g.ref_allele_count, 1);
        assert_eq!(g.alt_allele_count, 1);
        assert!((g.maf - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_absent_members_missing() {
        let e = entry(&[(1, "0/1")]);
        let members: BTreeSet<i64> = [1, 9].into_iter().collect();
        let stats = compute_stats(&e, &members);
        assert_eq!(stats.missing_allele_count, 2);
        assert_eq!(stats.maf, 0.5);

        let stats = compute_stats(&e, &BTreeSet::new());
        assert_eq!(stats.maf, 0.0);
    }
}
