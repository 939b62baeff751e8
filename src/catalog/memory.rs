use super::acl::{Acl, FilePermissions, SamplePermissions, StudyPermissions, permissions_for};
use super::{Catalog, CatalogFile, StudyInfo};
use crate::{
    Error, Result,
    types::{Bioformat, DataStore, Sample, Study},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// JSON document a [`MemoryCatalog`] is built from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSeed {
    /// Session token to user id.
    #[serde(default)]
    pub sessions: BTreeMap<String, String>,
    #[serde(default)]
    pub studies: Vec<StudySeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySeed {
    pub id: i64,
    pub alias: String,
    #[serde(default)]
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub datastores: Vec<DataStoreSeed>,
    #[serde(default)]
    pub acl: Vec<Acl<StudyPermissions>>,
    #[serde(default)]
    pub samples: Vec<SampleSeed>,
    #[serde(default)]
    pub files: Vec<FileSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreSeed {
    pub bioformat: Bioformat,
    #[serde(flatten)]
    pub datastore: DataStore,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleSeed {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acl: Vec<Acl<SamplePermissions>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSeed {
    #[serde(flatten)]
    pub file: CatalogFile,
    #[serde(default)]
    pub acl: Vec<Acl<FilePermissions>>,
}

/// Read-only catalog held in memory.
pub struct MemoryCatalog {
    seed: CatalogSeed,
}

impl MemoryCatalog {
    pub fn new(seed: CatalogSeed) -> Self {
        Self { seed }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let seed: CatalogSeed = serde_json::from_str(&text)?;
        tracing::info!(
            "loaded catalog with {} studies and {} sessions from {:?}",
            seed.studies.len(),
            seed.sessions.len(),
            path
        );
        Ok(Self::new(seed))
    }

    fn user(&self, session: &str) -> Result<&str> {
        self.seed
            .sessions
            .get(session)
            .map(String::as_str)
            .ok_or(Error::InvalidAuthentication)
    }

    fn find_study(&self, study: &str) -> Result<&StudySeed> {
        let by_id = study.parse::<i64>().ok();
        self.seed
            .studies
            .iter()
            .find(|s| Some(s.id) == by_id || s.alias == study)
            .ok_or_else(|| Error::NotFound(format!("study {}", study)))
    }

    fn visible_study(&self, study: &str, user: &str) -> Result<&StudySeed> {
        let seed = self.find_study(study)?;
        if !study_visible(seed, user) {
            return Err(Error::Authorization(format!(
                "user {} cannot view study {}",
                user, study
            )));
        }
        Ok(seed)
    }

    fn variant_datastore(seed: &StudySeed, bioformat: Bioformat) -> Result<DataStore> {
        seed.datastores
            .iter()
            .find(|d| d.bioformat == bioformat)
            .map(|d| d.datastore.clone())
            .ok_or_else(|| {
                Error::StorageResolution(format!(
                    "no {:?} datastore configured for study {}",
                    bioformat, seed.alias
                ))
            })
    }
}

fn study_permission(seed: &StudySeed, user: &str, permission: StudyPermissions) -> bool {
    seed.owner == user
        || permissions_for(&seed.acl, user).is_some_and(|p| p.contains(&permission))
}

fn study_visible(seed: &StudySeed, user: &str) -> bool {
    study_permission(seed, user, StudyPermissions::ViewStudy)
}

fn sample_readable(study: &StudySeed, sample: &SampleSeed, user: &str) -> bool {
    if study.owner == user {
        return true;
    }
    match permissions_for(&sample.acl, user) {
        Some(p) => p.contains(&SamplePermissions::View),
        None => study_permission(study, user, StudyPermissions::ViewSamples),
    }
}

fn file_readable(study: &StudySeed, file: &FileSeed, user: &str) -> bool {
    if study.owner == user {
        return true;
    }
    match permissions_for(&file.acl, user) {
        Some(p) => p.contains(&FilePermissions::View),
        None => study_permission(study, user, StudyPermissions::ViewFiles),
    }
}

fn to_study(seed: &StudySeed) -> Study {
    Study {
        id: seed.id,
        alias: seed.alias.clone(),
        name: seed.name.clone(),
    }
}

fn to_sample(seed: &SampleSeed) -> Sample {
    Sample {
        id: seed.id,
        name: seed.name.clone(),
        description: seed.description.clone(),
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn user_id(&self, session: &str) -> Result<String> {
        self.user(session).map(String::from)
    }

    async fn study_id(&self, study: &str, session: &str) -> Result<i64> {
        let user = self.user(session)?;
        Ok(self.visible_study(study, user)?.id)
    }

    async fn datastore(
        &self,
        study_id: i64,
        bioformat: Bioformat,
        session: &str,
    ) -> Result<DataStore> {
        let user = self.user(session)?;
        let seed = self.visible_study(&study_id.to_string(), user)?;
        Self::variant_datastore(seed, bioformat)
    }

    async fn samples(
        &self,
        study_id: i64,
        sample_ids: Option<&[i64]>,
        session: &str,
    ) -> Result<Vec<Sample>> {
        let user = self.user(session)?;
        let seed = self.visible_study(&study_id.to_string(), user)?;
        Ok(seed
            .samples
            .iter()
            .filter(|s| sample_ids.is_none_or(|ids| ids.contains(&s.id)))
            .filter(|s| sample_readable(seed, s, user))
            .map(to_sample)
            .collect())
    }

    async fn studies(&self, study_ids: &[i64], session: &str) -> Result<Vec<Study>> {
        let user = self.user(session)?;
        Ok(self
            .seed
            .studies
            .iter()
            .filter(|s| study_ids.contains(&s.id) && study_visible(s, user))
            .map(to_study)
            .collect())
    }

    async fn study_info(&self, study: &str, files: &[String], session: &str) -> Result<StudyInfo> {
        let user = self.user(session)?;
        let seed = self.visible_study(study, user)?;
        let datastore = Self::variant_datastore(seed, Bioformat::Variant)?;

        let mut selected = Vec::with_capacity(files.len());
        for name in files {
            let by_id = name.parse::<i64>().ok();
            let file = seed
                .files
                .iter()
                .find(|f| Some(f.file.id) == by_id || f.file.name == *name)
                .ok_or_else(|| Error::NotFound(format!("file {} in study {}", name, study)))?;
            if !file_readable(seed, file, user) {
                return Err(Error::Authorization(format!(
                    "user {} cannot view file {}",
                    user, name
                )));
            }
            selected.push(file.file.clone());
        }

        Ok(StudyInfo {
            study: to_study(seed),
            user_id: user.to_string(),
            datastore,
            files: selected,
            samples: seed
                .samples
                .iter()
                .filter(|s| sample_readable(seed, s, user))
                .map(to_sample)
                .collect(),
        })
    }
}
