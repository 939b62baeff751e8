use super::{StudyContext, artifact_dir, artifact_path, blocking, file_url};
use crate::{
    Result,
    config::StorageConfiguration,
    query::{Query, QueryOptions, VariantQueryParam},
    types::{Variant, VariantAnnotation, VariantType},
};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnnotateOptions {
    /// Write the annotation artifact without loading it.
    pub create_only: bool,
    /// Load a previously created artifact from the output directory instead of annotating.
    pub load_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnnotationRecord {
    id: String,
    annotation: VariantAnnotation,
}

fn is_transition(reference: &str, alternate: &str) -> bool {
    matches!(
        (reference, alternate),
        ("A", "G") | ("G", "A") | ("C", "T") | ("T", "C")
    )
}

/// Annotation derived from the alleles alone. Existing gene names are kept.
pub fn annotate_variant(v: &Variant) -> VariantAnnotation {
    let mut consequence_types = Vec::new();
    match v.variant_type {
        VariantType::Snv => {
            consequence_types.push("SNV".to_string());
            consequence_types.push(if is_transition(&v.reference, &v.alternate) {
                "transition".to_string()
            } else {
                "transversion".to_string()
            });
        }
        VariantType::Indel => {
            consequence_types.push("INDEL".to_string());
            consequence_types.push(if v.alternate.len() > v.reference.len() {
                "insertion".to_string()
            } else {
                "deletion".to_string()
            });
        }
        other => consequence_types.push(other.as_str().to_string()),
    }
    VariantAnnotation {
        gene_names: v
            .annotation
            .as_ref()
            .map(|a| a.gene_names.clone())
            .unwrap_or_default(),
        consequence_types,
        allele_change: Some(format!("{}>{}", v.reference, v.alternate)),
    }
}

/// Annotate variants of a study and load the annotations back.
pub struct VariantAnnotationOperation {
    context: StudyContext,
    out_dir: PathBuf,
    options: AnnotateOptions,
}

impl VariantAnnotationOperation {
    pub fn new(
        context: StudyContext,
        configuration: &StorageConfiguration,
        options: AnnotateOptions,
    ) -> Self {
        Self {
            context,
            out_dir: configuration.out_dir.clone(),
            options,
        }
    }

    /// Returns the location of the annotation artifact created or loaded.
    pub async fn run(self, mut query: Query) -> Result<Vec<Url>> {
        let artifact = match &self.options.load_file {
            Some(name) => artifact_path(&artifact_dir(&self.out_dir).await?, name)?,
            None => self.create(&mut query).await?,
        };
        let url = file_url(&artifact)?;
        if self.options.create_only {
            return self.context.adaptor.finish(Ok(vec![url]));
        }

        let source = artifact.clone();
        let annotations = blocking(move || {
            let reader = BufReader::new(std::fs::File::open(&source)?);
            let mut annotations = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: AnnotationRecord = serde_json::from_str(&line)?;
                annotations.push((record.id, record.annotation));
            }
            Ok(annotations)
        })
        .await?;
        let loaded = self.context.adaptor.update_annotations(annotations).await;
        if let Ok(n) = &loaded {
            tracing::info!("loaded {} annotations from {:?}", n, artifact);
        }
        self.context.adaptor.finish(loaded.map(|_| vec![url]))
    }

    async fn create(&self, query: &mut Query) -> Result<PathBuf> {
        query.put(
            VariantQueryParam::Studies,
            self.context.study_id().to_string(),
        );
        let out_dir = artifact_dir(&self.out_dir).await?;
        let artifact = out_dir.join(format!("{}.annot.json", self.context.info.study.alias));
        let iterator = self
            .context
            .adaptor
            .iterator(query, &QueryOptions::default())
            .await?;

        let target = artifact.clone();
        let written = blocking(move || {
            let mut out = BufWriter::new(std::fs::File::create(&target)?);
            let mut written = 0u64;
            for variant in iterator {
                let variant = variant?;
                let record = AnnotationRecord {
                    id: variant.to_string(),
                    annotation: annotate_variant(&variant),
                };
                serde_json::to_writer(&mut out, &record)?;
                writeln!(out)?;
                written += 1;
            }
            out.flush()?;
            Ok(written)
        })
        .await?;
        tracing::info!("annotated {} variants into {:?}", written, artifact);
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snv_transition() {
        let a = annotate_variant(&Variant::new("1", 10, "A", "G"));
        assert_eq!(a.consequence_types, vec!["SNV", "transition"]);
        assert_eq!(a.allele_change.as_deref(), Some("A>G"));

        let a = annotate_variant(&Variant::new("1", 10, "A", "T"));
        assert_eq!(a.consequence_types[1], "transversion");
    }

    #[test]
    fn test_indel_direction_and_genes_kept() {
        let mut v = Variant::new("1", 10, "A", "ATT");
        v.annotation = Some(VariantAnnotation {
            gene_names: vec!["BRCA2".to_string()],
            ..Default::default()
        });
        let a = annotate_variant(&v);
        assert_eq!(a.consequence_types, vec!["INDEL", "insertion"]);
        assert_eq!(a.gene_names, vec!["BRCA2"]);

        let a = annotate_variant(&Variant::new("1", 10, "AT", "A"));
        assert_eq!(a.consequence_types[1], "deletion");
    }
}
