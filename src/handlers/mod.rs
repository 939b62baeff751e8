//! Thin REST surface over [`VariantStorageManager`].

mod service_info;
mod studies;
mod variants;

pub use service_info::service_info;
pub use studies::{annotate_study, delete_study, export_study, index_study, stats_study};
pub use variants::{
    count_variants, distinct_variants, get_variants, group_variants, phased_variants,
    rank_variants, samples_metadata, variant_frequency,
};

use crate::{Error, Result, manager::VariantStorageManager};
use async_trait::async_trait;
use axum::{
    Router,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post},
};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<VariantStorageManager>,
}

/// Session token taken from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct Session(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(Error::InvalidAuthentication)?
            .to_str()
            .map_err(|_| Error::InvalidAuthentication)?;
        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(Error::InvalidAuthentication)?;
        Ok(Session(token.to_string()))
    }
}

/// Flat request parameters.
pub(crate) type Params = HashMap<String, String>;

pub(crate) fn required<'a>(params: &'a Params, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidQuery(format!("missing parameter {}", key)))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/variants", get(get_variants))
        .route("/variants/count", get(count_variants))
        .route("/variants/group-by", get(group_variants))
        .route("/variants/rank", get(rank_variants))
        .route("/variants/distinct", get(distinct_variants))
        .route("/variants/frequency", get(variant_frequency))
        .route("/variants/phased", get(phased_variants))
        .route("/variants/samples", get(samples_metadata))
        .route("/studies/:study", axum::routing::delete(delete_study))
        .route("/studies/:study/index", post(index_study))
        .route("/studies/:study/annotate", post(annotate_study))
        .route("/studies/:study/stats", post(stats_study))
        .route("/studies/:study/export", post(export_study))
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .with_state(state)
}
