//! Variant file formats.
//!
//! Reading VCF input for indexing goes through noodles. Output conversions
//! cover the GA4GH variant layouts returned by queries and the JSON-lines and
//! VCF encodings written by exports.
//!
//! # Supported Formats
//!
//! - [`read_variants`] - VCF (plain or bgzip) into [`Variant`] records
//! - [`VariantFormat`] - query result encodings (native, GA4GH Avro, GA4GH protobuf)
//! - [`VariantWriter`] - JSON lines and VCF export

mod ga4gh;
mod vcf;
mod writer;

pub use ga4gh::{AvroCall, AvroVariant, ProtoCall, ProtoVariant, to_avro, to_proto};
pub use vcf::{read_sample_names, read_variants};
pub use writer::{ExportFormat, ExportSample, VariantWriter};

#[cfg(test)]
pub(crate) use vcf::tests::{SAMPLE_VCF, write_vcf};

use crate::types::{QueryResult, Variant};
use crate::{Error, Result};
use serde::Serialize;
use std::str::FromStr;

/// Encoding of variants returned by `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantFormat {
    #[default]
    Native,
    Ga4ghAvro,
    Ga4ghProto,
}

impl FromStr for VariantFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "native" | "opencga" => Ok(VariantFormat::Native),
            "ga4gh" | "ga4gh-avro" | "avro" => Ok(VariantFormat::Ga4ghAvro),
            "ga4gh-proto" | "proto" => Ok(VariantFormat::Ga4ghProto),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Query result in one of the [`VariantFormat`] encodings.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FormattedResult {
    Native(QueryResult<Variant>),
    Ga4ghAvro(QueryResult<AvroVariant>),
    Ga4ghProto(QueryResult<ProtoVariant>),
}

impl FormattedResult {
    pub fn convert(result: QueryResult<Variant>, format: VariantFormat) -> Self {
        match format {
            VariantFormat::Native => FormattedResult::Native(result),
            VariantFormat::Ga4ghAvro => {
                let converted = result.result.iter().map(to_avro).collect();
                FormattedResult::Ga4ghAvro(result.map_result(converted))
            }
            VariantFormat::Ga4ghProto => {
                let converted = result.result.iter().map(to_proto).collect();
                FormattedResult::Ga4ghProto(result.map_result(converted))
            }
        }
    }

    pub fn num_results(&self) -> usize {
        match self {
            FormattedResult::Native(r) => r.num_results,
            FormattedResult::Ga4ghAvro(r) => r.num_results,
            FormattedResult::Ga4ghProto(r) => r.num_results,
        }
    }
}
