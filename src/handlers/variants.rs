use super::{AppState, Params, Session, required};
use crate::{
    Error, Result,
    formats::{FormattedResult, VariantFormat},
    query::{Query, QueryOptions},
    types::{FrequencyBin, GroupCount, QueryResult, Sample, Variant},
};
use axum::{
    Json,
    extract::{Query as QueryParams, State},
};
use std::collections::BTreeMap;

fn parse_query(params: &Params) -> Result<(Query, QueryOptions)> {
    Ok((Query::from_params(params), QueryOptions::from_params(params)?))
}

fn parse_number<T: std::str::FromStr>(params: &Params, key: &str) -> Result<Option<T>> {
    params
        .get(key)
        .map(|v| {
            v.parse()
                .map_err(|_| Error::InvalidQuery(format!("invalid {} {}", key, v)))
        })
        .transpose()
}

pub async fn get_variants(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<FormattedResult>> {
    let (mut query, options) = parse_query(&params)?;
    let format: VariantFormat = params.get("format").map_or(Ok(VariantFormat::default()), |f| f.parse())?;
    let result = state
        .manager
        .get_formatted(&mut query, &options, &session, format)
        .await?;
    Ok(Json(result))
}

pub async fn count_variants(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<QueryResult<u64>>> {
    let mut query = Query::from_params(&params);
    Ok(Json(state.manager.count(&mut query, &session).await?))
}

pub async fn group_variants(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<QueryResult<GroupCount>>> {
    let (mut query, options) = parse_query(&params)?;
    let field = required(&params, "field")?;
    let result = state
        .manager
        .group_by(&mut query, field, &options, &session)
        .await?;
    Ok(Json(result))
}

pub async fn rank_variants(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<QueryResult<GroupCount>>> {
    let mut query = Query::from_params(&params);
    let field = required(&params, "field")?;
    let limit = parse_number(&params, "limit")?;
    let ascending = params
        .get("ascending")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let result = state
        .manager
        .rank(&mut query, field, limit, ascending, &session)
        .await?;
    Ok(Json(result))
}

pub async fn distinct_variants(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<QueryResult<String>>> {
    let mut query = Query::from_params(&params);
    let field = required(&params, "field")?;
    Ok(Json(state.manager.distinct(&mut query, field, &session).await?))
}

pub async fn variant_frequency(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<QueryResult<FrequencyBin>>> {
    let mut query = Query::from_params(&params);
    let interval = parse_number(&params, "interval")?
        .ok_or_else(|| Error::InvalidQuery("missing parameter interval".to_string()))?;
    let result = state
        .manager
        .get_frequency(&mut query, interval, &session)
        .await?;
    Ok(Json(result))
}

pub async fn phased_variants(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<QueryResult<Variant>>> {
    let options = QueryOptions::from_params(&params)?;
    let result = state
        .manager
        .get_phased(
            required(&params, "variant")?,
            required(&params, "study")?,
            required(&params, "sample")?,
            &options,
            &session,
        )
        .await?;
    Ok(Json(result))
}

/// Samples the session may read, per study of the query.
pub async fn samples_metadata(
    State(state): State<AppState>,
    Session(session): Session,
    QueryParams(params): QueryParams<Params>,
) -> Result<Json<BTreeMap<i64, Vec<Sample>>>> {
    let (mut query, options) = parse_query(&params)?;
    let samples = state
        .manager
        .get_samples_metadata(&mut query, &options, &session)
        .await?;
    Ok(Json(samples))
}
