//! Variant query parameters and options.
//!
//! A [`Query`] is an open map from parameter key to a string value. Multi-valued
//! parameters use `,` for OR and `;` for AND; a leading `!` negates a single term.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const OR: char = ',';
pub const AND: char = ';';
pub const NOT: char = '!';

/// Known variant query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantQueryParam {
    Id,
    Region,
    Gene,
    Type,
    Studies,
    ReturnedStudies,
    ReturnedSamples,
    Files,
    Genotype,
    Annotated,
}

impl VariantQueryParam {
    pub const ALL: [VariantQueryParam; 10] = [
        VariantQueryParam::Id,
        VariantQueryParam::Region,
        VariantQueryParam::Gene,
        VariantQueryParam::Type,
        VariantQueryParam::Studies,
        VariantQueryParam::ReturnedStudies,
        VariantQueryParam::ReturnedSamples,
        VariantQueryParam::Files,
        VariantQueryParam::Genotype,
        VariantQueryParam::Annotated,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            VariantQueryParam::Id => "id",
            VariantQueryParam::Region => "region",
            VariantQueryParam::Gene => "gene",
            VariantQueryParam::Type => "type",
            VariantQueryParam::Studies => "studies",
            VariantQueryParam::ReturnedStudies => "returnedStudies",
            VariantQueryParam::ReturnedSamples => "returnedSamples",
            VariantQueryParam::Files => "files",
            VariantQueryParam::Genotype => "genotype",
            VariantQueryParam::Annotated => "annotated",
        }
    }
}

/// How the terms of a multi-valued parameter combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperation {
    Or,
    And,
}

/// Detect the operator of a value. Mixing `,` and `;` is rejected.
pub fn check_operator(value: &str) -> Result<Option<QueryOperation>> {
    match (value.contains(OR), value.contains(AND)) {
        (true, true) => Err(Error::InvalidQuery(format!(
            "cannot mix OR ({}) and AND ({}) in {}",
            OR, AND, value
        ))),
        (true, false) => Ok(Some(QueryOperation::Or)),
        (false, true) => Ok(Some(QueryOperation::And)),
        (false, false) => Ok(None),
    }
}

/// Split a value into its terms according to the operator.
pub fn split_value(value: &str, op: Option<QueryOperation>) -> Vec<String> {
    let sep = match op {
        Some(QueryOperation::Or) => OR,
        Some(QueryOperation::And) => AND,
        None => return vec![value.trim().to_string()],
    };
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn is_negated(term: &str) -> bool {
    term.starts_with(NOT)
}

pub fn remove_negation(term: &str) -> &str {
    term.strip_prefix(NOT).unwrap_or(term)
}

/// Filter predicates of a variant read operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(BTreeMap<String, String>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, param: VariantQueryParam, value: impl Into<String>) -> Self {
        self.put(param, value);
        self
    }

    pub fn put(&mut self, param: VariantQueryParam, value: impl Into<String>) {
        self.0.insert(param.key().to_string(), value.into());
    }

    pub fn put_list<T: ToString>(&mut self, param: VariantQueryParam, values: &[T]) {
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&OR.to_string());
        self.put(param, joined);
    }

    pub fn get(&self, param: VariantQueryParam) -> Option<&str> {
        self.0.get(param.key()).map(String::as_str)
    }

    pub fn remove(&mut self, param: VariantQueryParam) -> Option<String> {
        self.0.remove(param.key())
    }

    pub fn contains(&self, param: VariantQueryParam) -> bool {
        self.0.contains_key(param.key())
    }

    /// A parameter is valid when present with a non-blank value.
    pub fn is_valid_param(&self, param: VariantQueryParam) -> bool {
        self.get(param).is_some_and(|v| !v.trim().is_empty())
    }

    /// Terms of a parameter together with their operator.
    pub fn terms(&self, param: VariantQueryParam) -> Result<(Option<QueryOperation>, Vec<String>)> {
        match self.get(param) {
            Some(value) if !value.trim().is_empty() => {
                let op = check_operator(value)?;
                Ok((op, split_value(value, op)))
            }
            _ => Ok((None, Vec::new())),
        }
    }

    /// Terms of a parameter regardless of operator.
    pub fn get_list(&self, param: VariantQueryParam) -> Vec<String> {
        match self.get(param) {
            Some(value) => value
                .split([OR, AND])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Build a query from a flat parameter map, keeping only known keys.
    pub fn from_params<'a>(params: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut query = Query::new();
        for (key, value) in params {
            if let Some(param) = VariantQueryParam::ALL.iter().find(|p| p.key() == key) {
                query.put(*param, value.clone());
            }
        }
        query
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Result shaping and pagination options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub skip: usize,
    /// Compute the total number of matching results.
    #[serde(default)]
    pub count: bool,
    #[serde(default)]
    pub sort: bool,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl QueryOptions {
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Build options from a flat parameter map; unknown keys are ignored.
    pub fn from_params(params: &std::collections::HashMap<String, String>) -> Result<Self> {
        let parse_bool = |key: &str| {
            params
                .get(key)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };
        let list = |key: &str| {
            params
                .get(key)
                .map(|v| v.split(',').map(String::from).collect())
                .unwrap_or_default()
        };
        let limit = match params.get("limit") {
            Some(v) => Some(
                v.parse()
                    .map_err(|_| Error::InvalidQuery(format!("invalid limit {}", v)))?,
            ),
            None => None,
        };
        let skip = match params.get("skip") {
            Some(v) => v
                .parse()
                .map_err(|_| Error::InvalidQuery(format!("invalid skip {}", v)))?,
            None => 0,
        };
        Ok(Self {
            limit,
            skip,
            count: parse_bool("count"),
            sort: parse_bool("sort"),
            include: list("include"),
            exclude: list("exclude"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_check_operator() {
        assert_eq!(check_operator("a,b").unwrap(), Some(QueryOperation::Or));
        assert_eq!(check_operator("a;b").unwrap(), Some(QueryOperation::And));
        assert_eq!(check_operator("a").unwrap(), None);
        assert!(matches!(check_operator("a,b;c"), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_terms_and_negation() {
        let q = Query::new().with(VariantQueryParam::Studies, "!s1,s2, s3");
        let (op, terms) = q.terms(VariantQueryParam::Studies).unwrap();
        assert_eq!(op, Some(QueryOperation::Or));
        assert_eq!(terms, vec!["!s1", "s2", "s3"]);
        assert!(is_negated(&terms[0]));
        assert_eq!(remove_negation(&terms[0]), "s1");
    }

    #[test]
    fn test_put_list_joins_with_or() {
        let mut q = Query::new();
        q.put_list(VariantQueryParam::ReturnedSamples, &[3, 1, 2]);
        assert_eq!(q.get(VariantQueryParam::ReturnedSamples), Some("3,1,2"));
        assert_eq!(q.get_list(VariantQueryParam::ReturnedSamples), vec!["3", "1", "2"]);
    }

    #[test]
    fn test_is_valid_param() {
        let q = Query::new().with(VariantQueryParam::Region, "  ");
        assert!(q.contains(VariantQueryParam::Region));
        assert!(!q.is_valid_param(VariantQueryParam::Region));
    }

    #[test]
    fn test_from_params() {
        let mut params = HashMap::new();
        params.insert("studies".to_string(), "s1".to_string());
        params.insert("limit".to_string(), "20".to_string());
        params.insert("count".to_string(), "true".to_string());
        params.insert("bogus".to_string(), "x".to_string());

        let q = Query::from_params(&params);
        assert_eq!(q.get(VariantQueryParam::Studies), Some("s1"));
        assert_eq!(q.iter().count(), 1);

        let o = QueryOptions::from_params(&params).unwrap();
        assert_eq!(o.limit, Some(20));
        assert!(o.count);

        params.insert("limit".to_string(), "many".to_string());
        assert!(QueryOptions::from_params(&params).is_err());
    }
}
