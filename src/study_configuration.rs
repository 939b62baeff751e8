//! Storage-side metadata of a study.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Name of the cohort holding every indexed sample of a study.
pub const DEFAULT_COHORT: &str = "ALL";

/// Per-study mapping of file, sample and cohort names to storage ids.
///
/// `Clone` is a deep copy: bulk operations mutate a clone and persist it only
/// once the whole operation succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudyConfiguration {
    pub study_id: i64,
    pub study_name: String,
    #[serde(default)]
    pub file_ids: BTreeMap<String, i64>,
    #[serde(default)]
    pub sample_ids: BTreeMap<String, i64>,
    #[serde(default)]
    pub cohort_ids: BTreeMap<String, i64>,
    /// Cohort id to member sample ids.
    #[serde(default)]
    pub cohorts: BTreeMap<i64, BTreeSet<i64>>,
    #[serde(default)]
    pub indexed_files: BTreeSet<i64>,
    /// File id to the sample ids it contains.
    #[serde(default)]
    pub samples_in_files: BTreeMap<i64, BTreeSet<i64>>,
    #[serde(default)]
    pub calculated_stats: BTreeSet<i64>,
    #[serde(default)]
    pub invalid_stats: BTreeSet<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<u64>,
    /// Engine-specific extensions.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl StudyConfiguration {
    pub fn new(study_id: i64, study_name: impl Into<String>) -> Self {
        Self {
            study_id,
            study_name: study_name.into(),
            ..Default::default()
        }
    }

    /// Check that every referenced id exists in its id map.
    pub fn validate(&self) -> Result<()> {
        let files: BTreeSet<i64> = self.file_ids.values().copied().collect();
        let samples: BTreeSet<i64> = self.sample_ids.values().copied().collect();
        let cohorts: BTreeSet<i64> = self.cohort_ids.values().copied().collect();

        let fail = |what: &str, id: i64| {
            Err(Error::Internal(format!(
                "study configuration {} references unknown {} {}",
                self.study_name, what, id
            )))
        };

        for (cohort, members) in &self.cohorts {
            if !cohorts.contains(cohort) {
                return fail("cohort", *cohort);
            }
            if let Some(s) = members.iter().find(|s| !samples.contains(s)) {
                return fail("sample", *s);
            }
        }
        for (file, members) in &self.samples_in_files {
            if !files.contains(file) {
                return fail("file", *file);
            }
            if let Some(s) = members.iter().find(|s| !samples.contains(s)) {
                return fail("sample", *s);
            }
        }
        if let Some(f) = self.indexed_files.iter().find(|f| !files.contains(f)) {
            return fail("file", *f);
        }
        if let Some(c) = self
            .calculated_stats
            .iter()
            .chain(self.invalid_stats.iter())
            .find(|c| !cohorts.contains(c))
        {
            return fail("cohort", *c);
        }
        Ok(())
    }

    /// Register a file and its samples, returning the file id.
    pub fn register_file(&mut self, name: &str, file_id: i64, samples: &[(String, i64)]) -> i64 {
        self.file_ids.insert(name.to_string(), file_id);
        let members = self.samples_in_files.entry(file_id).or_default();
        for (sample_name, sample_id) in samples {
            self.sample_ids.insert(sample_name.clone(), *sample_id);
            members.insert(*sample_id);
        }
        file_id
    }

    pub fn is_indexed(&self, file_id: i64) -> bool {
        self.indexed_files.contains(&file_id)
    }

    /// Samples of every indexed file.
    pub fn indexed_samples(&self) -> BTreeSet<i64> {
        self.indexed_files
            .iter()
            .filter_map(|f| self.samples_in_files.get(f))
            .flatten()
            .copied()
            .collect()
    }

    pub fn cohort_id(&self, name: &str) -> Option<i64> {
        self.cohort_ids.get(name).copied()
    }

    /// Create or replace a cohort, returning its id.
    pub fn upsert_cohort(&mut self, name: &str, members: BTreeSet<i64>) -> i64 {
        let id = match self.cohort_ids.get(name) {
            Some(id) => *id,
            None => {
                let id = self.cohort_ids.values().max().map_or(1, |m| m + 1);
                self.cohort_ids.insert(name.to_string(), id);
                id
            }
        };
        self.cohorts.insert(id, members);
        id
    }

    /// Move every calculated cohort to the invalid set.
    pub fn invalidate_stats(&mut self) {
        let calculated = std::mem::take(&mut self.calculated_stats);
        self.invalid_stats.extend(calculated);
    }

    pub fn mark_stats_calculated(&mut self, cohort_id: i64) {
        self.invalid_stats.remove(&cohort_id);
        self.calculated_stats.insert(cohort_id);
    }

    /// Inverse of a name to id map.
    pub fn inverse<K: Clone, V: Ord + Copy>(map: &BTreeMap<K, V>) -> BTreeMap<V, K> {
        map.iter().map(|(k, v)| (*v, k.clone())).collect()
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_configuration() -> StudyConfiguration {
        let mut sc = StudyConfiguration::new(1, "study1");
        sc.register_file(
            "a.vcf",
            10,
            &[("s1".to_string(), 100), ("s2".to_string(), 101)],
        );
        sc.indexed_files.insert(10);
        sc
    }

    #[test]
    fn test_clone_is_deep() {
        let original = sample_configuration();
        let mut clone = original.clone();
        clone.file_ids.insert("b.vcf".to_string(), 11);
        clone.samples_in_files.get_mut(&10).unwrap().insert(102);

        assert_eq!(original.file_ids.len(), 1);
        assert!(!original.file_ids.contains_key("b.vcf"));
        assert_eq!(original.samples_in_files[&10].len(), 2);
        assert_ne!(original, clone);
    }

    #[test]
    fn test_validate() {
        let mut sc = sample_configuration();
        assert!(sc.validate().is_ok());

        sc.indexed_files.insert(99);
        assert!(sc.validate().is_err());

        let mut sc = sample_configuration();
        sc.calculated_stats.insert(7);
        assert!(sc.validate().is_err());
    }

    #[test]
    fn test_cohorts_and_stats_lifecycle() {
        let mut sc = sample_configuration();
        let all = sc.upsert_cohort(DEFAULT_COHORT, sc.indexed_samples());
        assert_eq!(all, 1);
        assert_eq!(sc.upsert_cohort(DEFAULT_COHORT, BTreeSet::new()), 1);
        let other = sc.upsert_cohort("cases", [100].into_iter().collect());
        assert_eq!(other, 2);

        sc.mark_stats_calculated(all);
        assert!(sc.calculated_stats.contains(&all));
        sc.invalidate_stats();
        assert!(sc.calculated_stats.is_empty());
        assert!(sc.invalid_stats.contains(&all));
        sc.mark_stats_calculated(all);
        assert!(!sc.invalid_stats.contains(&all));
        assert!(sc.validate().is_ok());
    }

    #[test]
    fn test_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sc.json");
        let sc = sample_configuration();
        sc.write(&path).unwrap();
        assert_eq!(StudyConfiguration::read(&path).unwrap(), sc);
    }

    #[test]
    fn test_inverse() {
        let sc = sample_configuration();
        let inverse = StudyConfiguration::inverse(&sc.sample_ids);
        assert_eq!(inverse[&100], "s1");
    }
}
