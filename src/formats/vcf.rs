use crate::types::{SampleData, StudyEntry, Variant};
use crate::{Error, Result};
use noodles::vcf::{
    self,
    variant::record::samples::keys::key,
    variant::record::samples::series::value::genotype::Phasing,
    variant::record_buf::samples::sample::{Value, value::genotype::Allele},
};
use std::path::Path;

/// Sample columns of a VCF file, in file order.
pub fn read_sample_names(path: &Path) -> Result<Vec<String>> {
    let mut reader = vcf::io::reader::Builder::default().build_from_path(path)?;
    let header = reader.read_header()?;
    Ok(header.sample_names().iter().cloned().collect())
}

/// Read every record of a VCF file as variants of one study and file.
///
/// `sample_ids` maps VCF sample columns, in order, to catalog sample ids.
/// Multi-allelic records are split into one variant per alternate allele. Each
/// split carries genotypes recoded against its own alternate, see [`split_genotype`].
pub fn read_variants(
    path: &Path,
    study_id: i64,
    file_id: i64,
    sample_ids: &[i64],
) -> Result<Vec<Variant>> {
    let mut reader = vcf::io::reader::Builder::default().build_from_path(path)?;
    let header = reader.read_header()?;
    if header.sample_names().len() != sample_ids.len() {
        return Err(Error::InvalidInput(format!(
            "{:?} has {} samples, {} ids given",
            path,
            header.sample_names().len(),
            sample_ids.len()
        )));
    }

    let mut variants = Vec::new();
    let mut skipped = 0usize;
    for result in reader.record_bufs(&header) {
        let record = result?;
        let Some(position) = record.variant_start() else {
            skipped += 1;
            continue;
        };
        let start = usize::from(position) as u64;

        let genotypes: Vec<Option<String>> = match record.samples().select(key::GENOTYPE) {
            Some(series) => (0..sample_ids.len())
                .map(|i| match series.get(i) {
                    Some(Some(Value::Genotype(genotype))) => Some(genotype_string(genotype.as_ref())),
                    Some(Some(Value::String(text))) => Some(text.clone()),
                    _ => None,
                })
                .collect(),
            None => vec![None; sample_ids.len()],
        };

        for (index, alternate) in record.alternate_bases().as_ref().iter().enumerate() {
            if alternate == "." || alternate == "*" {
                skipped += 1;
                continue;
            }
            let mut variant = Variant::new(
                record.reference_sequence_name(),
                start,
                record.reference_bases(),
                alternate,
            );
            variant.ids = record.ids().as_ref().iter().cloned().collect();

            let mut entry = StudyEntry::new(study_id);
            entry.file_ids.push(file_id);
            for (sample_id, genotype) in sample_ids.iter().zip(&genotypes) {
                let genotype = match genotype {
                    Some(gt) => split_genotype(gt, index + 1),
                    None => "./.".to_string(),
                };
                entry.samples.insert(*sample_id, SampleData { genotype });
            }
            variant.merge_study(entry);
            variants.push(variant);
        }
    }

    if skipped > 0 {
        tracing::warn!("skipped {} records without position or alternate in {:?}", skipped, path);
    }
    Ok(variants)
}

/// Recode a genotype for the split of alternate allele `alternate` (1-based).
///
/// The reference stays `0`, `alternate` becomes `1` and every other alternate
/// becomes `2`. Separators and missing alleles are kept.
pub fn split_genotype(genotype: &str, alternate: usize) -> String {
    let mut gt = String::with_capacity(genotype.len());
    for piece in genotype.split_inclusive(['/', '|']) {
        let allele = piece.trim_end_matches(['/', '|']);
        gt.push_str(match allele.parse::<usize>() {
            Ok(0) => "0",
            Ok(p) if p == alternate => "1",
            Ok(_) => "2",
            Err(_) => allele,
        });
        gt.push_str(&piece[allele.len()..]);
    }
    gt
}

fn genotype_string(alleles: &[Allele]) -> String {
    let mut gt = String::new();
    for (i, allele) in alleles.iter().enumerate() {
        if i > 0 {
            gt.push(match allele.phasing() {
                Phasing::Phased => '|',
                Phasing::Unphased => '/',
            });
        }
        match allele.position() {
            Some(p) => gt.push_str(&p.to_string()),
            None => gt.push('.'),
        }
    }
    gt
}
