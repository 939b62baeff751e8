use super::{StudyContext, artifact_dir, blocking};
use crate::{
    Error, Result,
    catalog::CatalogFile,
    config::StorageConfiguration,
    formats::{ExportFormat, VariantWriter, read_sample_names, read_variants},
    types::{Bioformat, StorageEtlResult},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexOptions {
    /// Annotate the study once every file is loaded.
    pub annotate: bool,
    /// Calculate stats of the default cohort once every file is loaded.
    pub calculate_stats: bool,
}

/// Extract, transform and load VCF files into a study.
pub struct VariantIndexOperation {
    context: StudyContext,
    out_dir: PathBuf,
}

impl VariantIndexOperation {
    pub fn new(context: StudyContext, configuration: &StorageConfiguration) -> Self {
        Self {
            context,
            out_dir: configuration.out_dir.clone(),
        }
    }

    pub async fn run(mut self) -> Result<Vec<StorageEtlResult>> {
        if self.context.info.files.is_empty() {
            return Err(Error::InvalidInput("no files to index".to_string()));
        }
        let out_dir = artifact_dir(&self.out_dir).await?;
        let files = self.context.info.files.clone();
        for file in &files {
            self.check_file(file)?;
        }

        let mut results = Vec::with_capacity(files.len());
        for file in files {
            results.push(self.index_file(&file, &out_dir).await?);
        }

        self.context.configuration.invalidate_stats();
        self.context.commit().await?;
        Ok(results)
    }

    fn check_file(&self, file: &CatalogFile) -> Result<()> {
        if file.bioformat != Bioformat::Variant {
            return Err(Error::InvalidInput(format!(
                "file {} is not a variant file",
                file.name
            )));
        }
        if self.context.configuration.is_indexed(file.id) {
            return Err(Error::InvalidInput(format!(
                "file {} is already indexed",
                file.name
            )));
        }
        Ok(())
    }

    async fn index_file(&mut self, file: &CatalogFile, out_dir: &Path) -> Result<StorageEtlResult> {
        let study_id = self.context.study_id();
        tracing::info!("indexing {} into study {}", file.name, study_id);

        let path = file.path.clone();
        let names = blocking(move || read_sample_names(&path)).await?;
        let mut samples = Vec::with_capacity(names.len());
        for name in names {
            let sample = self
                .context
                .info
                .samples
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "sample {} of file {} is unknown to the catalog",
                        name, file.name
                    ))
                })?;
            samples.push((name, sample.id));
        }

        let start = Instant::now();
        let path = file.path.clone();
        let file_id = file.id;
        let sample_ids: Vec<i64> = samples.iter().map(|(_, id)| *id).collect();
        let transformed = out_dir.join(format!("{}.variants.json", file.name));
        let artifact = transformed.clone();
        let variants = blocking(move || {
            let variants = read_variants(&path, study_id, file_id, &sample_ids)?;
            let out = std::fs::File::create(&artifact)?;
            let mut writer = VariantWriter::new(out, ExportFormat::Json, Vec::new())?;
            for variant in &variants {
                writer.write(variant)?;
            }
            writer.finish()?;
            Ok(variants)
        })
        .await?;
        let transform_time_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let loaded_variants = self
            .context
            .adaptor
            .load_variants(study_id, file.id, variants)
            .await?;
        let load_time_ms = start.elapsed().as_millis() as u64;

        let configuration = &mut self.context.configuration;
        configuration.register_file(&file.name, file.id, &samples);
        configuration.indexed_files.insert(file.id);
        tracing::info!(
            "loaded {} variants from {} in {} ms",
            loaded_variants,
            file.name,
            load_time_ms
        );

        Ok(StorageEtlResult {
            input: file.path.display().to_string(),
            file_id: file.id,
            transform_result: Some(transformed.display().to_string()),
            transform_time_ms,
            load_time_ms,
            loaded_variants,
        })
    }
}
