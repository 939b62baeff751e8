use super::{StudyContext, artifact_dir, artifact_path, blocking, file_url};
use crate::{
    Error, Result,
    formats::{ExportFormat, ExportSample, VariantWriter},
    manager::VariantStorageManager,
    query::{Query, QueryOptions},
    study_configuration::StudyConfiguration,
    types::{Sample, Variant},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Output file name inside the artifact directory. Stdout when unset.
    pub output: Option<PathBuf>,
}

/// Sidecar written next to an exported file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub format: String,
    pub variants: u64,
    pub studies: Vec<StudyConfiguration>,
    /// Exported samples per study id.
    pub samples: BTreeMap<i64, Vec<Sample>>,
}

pub fn metadata_path(output: &Path) -> PathBuf {
    PathBuf::from(format!("{}.meta.json", output.display()))
}

/// Stream the variants a session may read into a file or stdout.
pub struct VariantExportOperation<'a> {
    manager: &'a VariantStorageManager,
    options: ExportOptions,
}

impl<'a> VariantExportOperation<'a> {
    pub fn new(manager: &'a VariantStorageManager, options: ExportOptions) -> Self {
        Self { manager, options }
    }

    pub async fn run(self, mut query: Query, session: &str) -> Result<Vec<Url>> {
        let out_dir = &self.manager.configuration().out_dir;
        if let Some(name) = &self.options.output {
            artifact_path(out_dir, name)?;
        }
        let options = QueryOptions::default();
        let samples = self
            .manager
            .get_samples_metadata(&mut query, &options, session)
            .await?;
        let study_ids: Vec<i64> = samples.keys().copied().collect();
        let studies = self
            .manager
            .study_configurations(&query, &study_ids, session)
            .await?;
        let columns: Vec<ExportSample> = samples
            .iter()
            .flat_map(|(study_id, samples)| {
                samples.iter().map(move |s| ExportSample {
                    study_id: *study_id,
                    sample_id: s.id,
                    name: s.name.clone(),
                })
            })
            .collect();
        let iterator = self.manager.iterator(&mut query, &options, session).await?;
        let format = self.options.format;

        let Some(name) = &self.options.output else {
            let written = blocking(move || {
                let mut writer = VariantWriter::new(std::io::stdout(), format, columns)?;
                for variant in iterator {
                    writer.write(&variant?)?;
                }
                writer.finish()
            })
            .await?;
            tracing::info!("exported {} variants to stdout", written);
            return Ok(Vec::new());
        };

        let output = artifact_path(&artifact_dir(out_dir).await?, name)?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = output.clone();
        let variants = blocking(move || {
            let file = std::fs::File::create(&target)?;
            let mut writer = VariantWriter::new(file, format, columns)?;
            for variant in iterator {
                writer.write(&variant?)?;
            }
            writer.finish()
        })
        .await?;

        let metadata = ExportMetadata {
            format: format.extension().to_string(),
            variants,
            studies,
            samples,
        };
        let meta = metadata_path(&output);
        tokio::fs::write(&meta, serde_json::to_vec_pretty(&metadata)?).await?;
        tracing::info!("exported {} variants to {:?}", variants, output);
        Ok(vec![file_url(&output)?, file_url(&meta)?])
    }
}

/// Load a JSON-lines export into a study with no indexed files.
pub struct VariantImportOperation {
    context: StudyContext,
}

impl VariantImportOperation {
    pub fn new(context: StudyContext) -> Self {
        Self { context }
    }

    pub async fn run(mut self, input: &Path) -> Result<u64> {
        if !self.context.configuration.indexed_files.is_empty() {
            return Err(Error::InvalidInput(format!(
                "study {} already has indexed files",
                self.context.info.study.alias
            )));
        }
        let text = tokio::fs::read_to_string(metadata_path(input)).await?;
        let metadata: ExportMetadata = serde_json::from_str(&text)?;
        if metadata.format != ExportFormat::Json.extension() {
            return Err(Error::UnsupportedFormat(format!(
                "cannot import {} exports",
                metadata.format
            )));
        }
        let [source] = metadata.studies.as_slice() else {
            return Err(Error::InvalidInput(format!(
                "export holds {} studies, expected one",
                metadata.studies.len()
            )));
        };

        let source_id = source.study_id;
        let target_id = self.context.study_id();
        let path = input.to_path_buf();
        let by_file = blocking(move || {
            let reader = BufReader::new(std::fs::File::open(&path)?);
            let mut by_file: BTreeMap<i64, Vec<Variant>> = BTreeMap::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let mut variant: Variant = serde_json::from_str(&line)?;
                variant.studies.retain(|s| s.study_id == source_id);
                let Some(entry) = variant.studies.first_mut() else {
                    continue;
                };
                entry.study_id = target_id;
                let file_id = entry.file_ids.first().copied().unwrap_or_default();
                by_file.entry(file_id).or_default().push(variant);
            }
            Ok(by_file)
        })
        .await?;

        let mut loaded = 0;
        for (file_id, variants) in by_file {
            loaded += self
                .context
                .adaptor
                .load_variants(target_id, file_id, variants)
                .await?;
        }

        let mut imported = source.clone();
        imported.study_id = target_id;
        imported.study_name = self.context.configuration.study_name.clone();
        imported.invalidate_stats();
        self.context.configuration = imported;
        tracing::info!("imported {} variants into study {}", loaded, target_id);
        self.context.commit().await?;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StudyInfo;
    use crate::storage::{AdaptorGuard, MEMORY_ENGINE, MemoryEngine, VariantStorageEngine};
    use crate::types::{DataStore, Study};

    async fn context(engine: &MemoryEngine) -> StudyContext {
        let info = StudyInfo {
            study: Study {
                id: 2,
                alias: "copy".to_string(),
                name: String::new(),
            },
            user_id: "owner".to_string(),
            datastore: DataStore {
                storage_engine: MEMORY_ENGINE.to_string(),
                db_name: "db".to_string(),
            },
            files: Vec::new(),
            samples: Vec::new(),
        };
        let adaptor = AdaptorGuard::new(engine.db_adaptor("db").await.unwrap(), MEMORY_ENGINE, "db");
        StudyContext::new(info, adaptor, StudyConfiguration::new(2, "copy"))
    }

    fn write_export(dir: &Path, metadata: &ExportMetadata) -> PathBuf {
        let path = dir.join("export.json");
        std::fs::write(&path, "").unwrap();
        std::fs::write(metadata_path(&path), serde_json::to_vec(metadata).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_metadata_path() {
        assert_eq!(
            metadata_path(Path::new("/tmp/out/s1.json")),
            PathBuf::from("/tmp/out/s1.json.meta.json")
        );
    }

    #[tokio::test]
    async fn test_import_requires_single_study() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::new();
        let path = write_export(
            dir.path(),
            &ExportMetadata {
                format: "json".to_string(),
                variants: 0,
                studies: vec![StudyConfiguration::new(1, "a"), StudyConfiguration::new(3, "b")],
                samples: BTreeMap::new(),
            },
        );

        let result = VariantImportOperation::new(context(&engine).await)
            .run(&path)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(engine.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_import_rejects_vcf_exports() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::new();
        let path = write_export(
            dir.path(),
            &ExportMetadata {
                format: "vcf".to_string(),
                variants: 0,
                studies: vec![StudyConfiguration::new(1, "a")],
                samples: BTreeMap::new(),
            },
        );

        let result = VariantImportOperation::new(context(&engine).await)
            .run(&path)
            .await;
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }
}
