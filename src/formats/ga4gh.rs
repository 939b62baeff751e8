use crate::types::{StudyEntry, Variant};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// GA4GH variant in the Avro schema layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvroVariant {
    pub id: String,
    pub variant_set_id: String,
    pub names: Vec<String>,
    pub reference_name: String,
    /// 0-based start.
    pub start: u64,
    /// Exclusive end.
    pub end: u64,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    pub info: BTreeMap<String, Vec<String>>,
    pub calls: Vec<AvroCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvroCall {
    pub call_set_id: String,
    pub call_set_name: String,
    /// Allele indices, `-1` for a missing call.
    pub genotype: Vec<i32>,
    pub phaseset: Option<String>,
}

/// GA4GH variant in the protobuf JSON layout; 64-bit integers are strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoVariant {
    pub id: String,
    pub variant_set_id: String,
    pub names: Vec<String>,
    pub reference_name: String,
    pub start: String,
    pub end: String,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    pub calls: Vec<ProtoCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoCall {
    pub call_set_id: String,
    pub call_set_name: String,
    pub genotype: Vec<i32>,
    pub phaseset: String,
}

struct Call {
    call_set_id: String,
    genotype: Vec<i32>,
    phased: bool,
}

fn calls(studies: &[StudyEntry]) -> Vec<Call> {
    studies
        .iter()
        .flat_map(|entry| {
            entry.samples.iter().map(move |(sample_id, data)| Call {
                call_set_id: format!("{}_{}", entry.study_id, sample_id),
                genotype: data
                    .alleles()
                    .into_iter()
                    .map(|a| a.map_or(-1, |p| p as i32))
                    .collect(),
                phased: data.is_phased(),
            })
        })
        .collect()
}

fn variant_set_id(v: &Variant) -> String {
    v.studies
        .iter()
        .map(|s| s.study_id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn to_avro(v: &Variant) -> AvroVariant {
    let mut info = BTreeMap::new();
    if let Some(annotation) = &v.annotation {
        if !annotation.gene_names.is_empty() {
            info.insert("GENE".to_string(), annotation.gene_names.clone());
        }
        if !annotation.consequence_types.is_empty() {
            info.insert("CT".to_string(), annotation.consequence_types.clone());
        }
    }
    AvroVariant {
        id: v.to_string(),
        variant_set_id: variant_set_id(v),
        names: v.ids.clone(),
        reference_name: v.chromosome.clone(),
        start: v.start.saturating_sub(1),
        end: v.end,
        reference_bases: v.reference.clone(),
        alternate_bases: vec![v.alternate.clone()],
        info,
        calls: calls(&v.studies)
            .into_iter()
            .map(|c| AvroCall {
                call_set_name: c.call_set_id.clone(),
                phaseset: c.phased.then(|| "*".to_string()),
                call_set_id: c.call_set_id,
                genotype: c.genotype,
            })
            .collect(),
    }
}

pub fn to_proto(v: &Variant) -> ProtoVariant {
    ProtoVariant {
        id: v.to_string(),
        variant_set_id: variant_set_id(v),
        names: v.ids.clone(),
        reference_name: v.chromosome.clone(),
        start: v.start.saturating_sub(1).to_string(),
        end: v.end.to_string(),
        reference_bases: v.reference.clone(),
        alternate_bases: vec![v.alternate.clone()],
        calls: calls(&v.studies)
            .into_iter()
            .map(|c| ProtoCall {
                call_set_name: c.call_set_id.clone(),
                phaseset: if c.phased { "*".to_string() } else { String::new() },
                call_set_id: c.call_set_id,
                genotype: c.genotype,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleData;

    fn variant() -> Variant {
        let mut v = Variant::new("1", 100, "AC", "A");
        v.ids = vec!["rs1".to_string()];
        let mut entry = StudyEntry::new(3);
        entry.samples.insert(7, SampleData { genotype: "0|1".to_string() });
        entry.samples.insert(8, SampleData { genotype: "./1".to_string() });
        v.merge_study(entry);
        v
    }

    #[test]
    fn test_avro_coordinates_and_calls() {
        let avro = to_avro(&variant());
        assert_eq!(avro.start, 99);
        assert_eq!(avro.end, 101);
        assert_eq!(avro.variant_set_id, "3");
        assert_eq!(avro.calls[0].call_set_id, "3_7");
        assert_eq!(avro.calls[0].genotype, vec![0, 1]);
        assert_eq!(avro.calls[0].phaseset.as_deref(), Some("*"));
        assert_eq!(avro.calls[1].genotype, vec![-1, 1]);
        assert_eq!(avro.calls[1].phaseset, None);
    }

    #[test]
    fn test_proto_json_uses_string_positions() {
        let json = serde_json::to_value(to_proto(&variant())).unwrap();
        assert_eq!(json["start"], "99");
        assert_eq!(json["reference_name"], "1");
        assert_eq!(json["calls"][1]["phaseset"], "");
    }
}
