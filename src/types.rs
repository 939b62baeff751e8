use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Kind of data a catalog datastore holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bioformat {
    Variant,
    Alignment,
}

/// Storage engine and database backing a study's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStore {
    /// Empty when the study uses the service's default engine.
    #[serde(default)]
    pub storage_engine: String,
    pub db_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub id: i64,
    pub alias: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Classification of a variant by allele shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariantType {
    #[default]
    Snv,
    Mnv,
    Indel,
    Sv,
}

impl VariantType {
    pub fn classify(reference: &str, alternate: &str) -> Self {
        if alternate.starts_with('<') || reference.len().max(alternate.len()) > 50 {
            VariantType::Sv
        } else if reference.len() != alternate.len() {
            VariantType::Indel
        } else if reference.len() == 1 {
            VariantType::Snv
        } else {
            VariantType::Mnv
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Snv => "SNV",
            VariantType::Mnv => "MNV",
            VariantType::Indel => "INDEL",
            VariantType::Sv => "SV",
        }
    }
}

impl FromStr for VariantType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SNV" | "SNP" => Ok(VariantType::Snv),
            "MNV" | "MNP" => Ok(VariantType::Mnv),
            "INDEL" => Ok(VariantType::Indel),
            "SV" => Ok(VariantType::Sv),
            other => Err(Error::InvalidQuery(format!("unknown variant type {}", other))),
        }
    }
}

/// Per-sample call data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleData {
    pub genotype: String,
}

impl SampleData {
    pub fn is_phased(&self) -> bool {
        self.genotype.contains('|')
    }

    /// Allele indices of the genotype, `None` for missing alleles.
    pub fn alleles(&self) -> Vec<Option<u32>> {
        self.genotype
            .split(['/', '|'])
            .map(|a| a.parse().ok())
            .collect()
    }
}

/// Aggregate allele statistics of one cohort at one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariantStats {
    pub ref_allele_count: u32,
    pub alt_allele_count: u32,
    pub missing_allele_count: u32,
    pub genotype_counts: BTreeMap<String, u32>,
    pub maf: f64,
}

/// Variant data within one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyEntry {
    pub study_id: i64,
    #[serde(default)]
    pub file_ids: Vec<i64>,
    /// Sample id to call data.
    #[serde(default)]
    pub samples: BTreeMap<i64, SampleData>,
    /// Cohort name to statistics.
    #[serde(default)]
    pub stats: BTreeMap<String, VariantStats>,
}

impl StudyEntry {
    pub fn new(study_id: i64) -> Self {
        Self {
            study_id,
            file_ids: Vec::new(),
            samples: BTreeMap::new(),
            stats: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariantAnnotation {
    #[serde(default)]
    pub gene_names: Vec<String>,
    #[serde(default)]
    pub consequence_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allele_change: Option<String>,
}

/// A genomic variant as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub chromosome: String,
    /// 1-based start position.
    pub start: u64,
    pub end: u64,
    pub reference: String,
    pub alternate: String,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(rename = "type", default)]
    pub variant_type: VariantType,
    #[serde(default)]
    pub studies: Vec<StudyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<VariantAnnotation>,
}

impl Variant {
    pub fn new(chromosome: &str, start: u64, reference: &str, alternate: &str) -> Self {
        let end = start + reference.len().max(1) as u64 - 1;
        Self {
            chromosome: chromosome.to_string(),
            start,
            end,
            reference: reference.to_string(),
            alternate: alternate.to_string(),
            ids: Vec::new(),
            variant_type: VariantType::classify(reference, alternate),
            studies: Vec::new(),
            annotation: None,
        }
    }

    pub fn study(&self, study_id: i64) -> Option<&StudyEntry> {
        self.studies.iter().find(|s| s.study_id == study_id)
    }

    pub fn study_mut(&mut self, study_id: i64) -> Option<&mut StudyEntry> {
        self.studies.iter_mut().find(|s| s.study_id == study_id)
    }

    /// Merge a study entry into this variant, combining calls of the same study.
    pub fn merge_study(&mut self, entry: StudyEntry) {
        match self.study_mut(entry.study_id) {
            Some(existing) => {
                for file_id in entry.file_ids {
                    if !existing.file_ids.contains(&file_id) {
                        existing.file_ids.push(file_id);
                    }
                }
                existing.samples.extend(entry.samples);
                existing.stats.extend(entry.stats);
            }
            None => self.studies.push(entry),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chromosome, self.start, self.reference, self.alternate
        )
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            return Err(Error::InvalidInput(format!(
                "variant must be chr:pos:ref:alt, got {}",
                s
            )));
        }
        let start = parts[1]
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid variant position in {}", s)))?;
        Ok(Variant::new(parts[0], start, parts[2], parts[3]))
    }
}

/// Genomic region, 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn overlaps(&self, chromosome: &str, start: u64, end: u64) -> bool {
        self.chromosome == chromosome && start <= self.end && end >= self.start
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidQuery(format!("invalid region {}", s));
        let (chromosome, range) = match s.split_once(':') {
            Some((chr, range)) => (chr, Some(range)),
            None => (s, None),
        };
        if chromosome.is_empty() {
            return Err(invalid());
        }
        let (start, end) = match range {
            None => (1, u64::MAX),
            Some(range) => match range.split_once('-') {
                Some((start, end)) => (
                    start.parse().map_err(|_| invalid())?,
                    end.parse().map_err(|_| invalid())?,
                ),
                None => {
                    let pos = range.parse().map_err(|_| invalid())?;
                    (pos, pos)
                }
            },
        };
        if start > end {
            return Err(invalid());
        }
        Ok(Region {
            chromosome: chromosome.to_string(),
            start,
            end,
        })
    }
}

/// Uniform response envelope for every read operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    pub id: String,
    /// Elapsed storage time in milliseconds.
    pub db_time: u64,
    pub num_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_total_results: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub result: Vec<T>,
}

impl<T> QueryResult<T> {
    pub fn new(id: impl Into<String>, db_time: u64, result: Vec<T>) -> Self {
        Self {
            id: id.into(),
            db_time,
            num_results: result.len(),
            num_total_results: None,
            warning_msg: None,
            error_msg: None,
            result,
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.num_total_results = Some(total);
        self
    }

    /// Replace the payload, keeping the envelope.
    pub fn map_result<U>(self, result: Vec<U>) -> QueryResult<U> {
        QueryResult {
            id: self.id,
            db_time: self.db_time,
            num_results: result.len(),
            num_total_results: self.num_total_results,
            warning_msg: self.warning_msg,
            error_msg: self.error_msg,
            result,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub id: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyBin {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
    pub count: u64,
}

/// Outcome of indexing a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEtlResult {
    pub input: String,
    pub file_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_result: Option<String>,
    pub transform_time_ms: u64,
    pub load_time_ms: u64,
    pub loaded_variants: u64,
}
