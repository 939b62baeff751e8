use super::{AppState, Session};
use crate::{
    Result,
    formats::ExportFormat,
    operations::{AnnotateOptions, ExportOptions, IndexOptions, StatsOptions},
    query::{Query, VariantQueryParam},
    types::StorageEtlResult,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexRequest {
    pub files: Vec<String>,
    #[serde(flatten)]
    pub options: IndexOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnnotateRequest {
    pub query: BTreeMap<String, String>,
    #[serde(flatten)]
    pub options: AnnotateOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsRequest {
    pub cohorts: Vec<String>,
    #[serde(flatten)]
    pub options: StatsOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    pub query: BTreeMap<String, String>,
    pub format: Option<String>,
    pub output: Option<PathBuf>,
}

fn urls(urls: Vec<Url>) -> Json<Vec<String>> {
    Json(urls.into_iter().map(String::from).collect())
}

pub async fn index_study(
    State(state): State<AppState>,
    Session(session): Session,
    Path(study): Path<String>,
    Json(body): Json<IndexRequest>,
) -> Result<Json<Vec<StorageEtlResult>>> {
    let results = state
        .manager
        .index(&study, &body.files, &body.options, &session)
        .await?;
    Ok(Json(results))
}

pub async fn annotate_study(
    State(state): State<AppState>,
    Session(session): Session,
    Path(study): Path<String>,
    Json(body): Json<AnnotateRequest>,
) -> Result<Json<Vec<String>>> {
    let query = Query::from_params(&body.query);
    let artifacts = state
        .manager
        .annotate(&study, query, &body.options, &session)
        .await?;
    Ok(urls(artifacts))
}

pub async fn stats_study(
    State(state): State<AppState>,
    Session(session): Session,
    Path(study): Path<String>,
    Json(body): Json<StatsRequest>,
) -> Result<StatusCode> {
    state
        .manager
        .stats(&study, &body.cohorts, &body.options, &session)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Study names reduced to characters safe in a file name.
fn file_stem(study: &str) -> String {
    study
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Export into the artifact directory, `<study>.<format>` unless an output is named.
pub async fn export_study(
    State(state): State<AppState>,
    Session(session): Session,
    Path(study): Path<String>,
    Json(body): Json<ExportRequest>,
) -> Result<Json<Vec<String>>> {
    let mut query = Query::from_params(&body.query);
    if !query.contains(VariantQueryParam::Studies) {
        query.put(VariantQueryParam::Studies, study.clone());
    }
    let format: ExportFormat = match &body.format {
        Some(f) => f.parse()?,
        None => ExportFormat::default(),
    };
    let output = body
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}.{}", file_stem(&study), format.extension())));
    let options = ExportOptions {
        format,
        output: Some(output),
    };
    let artifacts = state.manager.export(query, &options, &session).await?;
    Ok(urls(artifacts))
}

pub async fn delete_study(
    State(state): State<AppState>,
    Session(session): Session,
    Path(study): Path<String>,
) -> Result<StatusCode> {
    state.manager.delete_study(&study, &session).await?;
    Ok(StatusCode::NO_CONTENT)
}
