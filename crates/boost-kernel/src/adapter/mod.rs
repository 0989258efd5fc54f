//! Declarative backend adapters.
//!
//! A [`BackendAdapterConfig`] tells the gateway where the six semantic fields
//! of a search exchange live inside one backend's request / response shape:
//!
//! | Field | Read from | Required |
//! |-------|-----------|----------|
//! | `query` | request | yes |
//! | `topk` | request | no, falls back to `default_topk` |
//! | `true_cids` | request | no |
//! | `cvalues` | response | yes |
//! | `cids` | response | yes |
//! | `choices` | response | yes |
//!
//! The [`BackendAdapterRegistry`] picks the adapter for a request by matching
//! the request path against each adapter's capture pattern. It is built once
//! at startup and read without locking afterwards.

mod document;
mod fields;

pub use document::{RequestDocument, ResponseDocument};
pub use fields::{BoostFields, NotBoostable, RequestFields, ResponseFields, TopkSource};

use crate::error::{BuildResult, ConfigurationError};
use crate::path::{CapturePattern, PathExpression};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the built-in Elasticsearch adapter.
pub const ELASTICSEARCH: &str = "elasticsearch";

/// Field locations for one backend type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAdapterConfig {
    pub query_path: PathExpression,
    pub topk_path: PathExpression,
    pub cvalues_path: PathExpression,
    pub cids_path: PathExpression,
    #[serde(default)]
    pub true_cids_path: Option<PathExpression>,
    pub choices_path: PathExpression,
    pub capture_path: CapturePattern,
    pub default_topk: usize,
}

impl BackendAdapterConfig {
    /// Build a config from the textual form of each path.
    #[allow(clippy::too_many_arguments)]
    pub fn from_paths(
        query_path: &str,
        topk_path: &str,
        cvalues_path: &str,
        cids_path: &str,
        true_cids_path: Option<&str>,
        choices_path: &str,
        capture_path: &str,
        default_topk: usize,
    ) -> BuildResult<Self> {
        Ok(Self {
            query_path: PathExpression::parse(query_path)?,
            topk_path: PathExpression::parse(topk_path)?,
            cvalues_path: PathExpression::parse(cvalues_path)?,
            cids_path: PathExpression::parse(cids_path)?,
            true_cids_path: true_cids_path.map(PathExpression::parse).transpose()?,
            choices_path: PathExpression::parse(choices_path)?,
            capture_path: CapturePattern::new(capture_path)?,
            default_topk,
        })
    }

    /// The stock Elasticsearch `_search` adapter.
    pub fn elasticsearch() -> Self {
        Self::from_paths(
            "(body.query.match) | (body.query.term.*) | ($.url.query.q)",
            "(body.size) | (url.query.size)",
            "$.body.hits.hits[*]._source.*",
            "$.body.hits.hits[*]._id",
            Some("$.body.nboost.cids"),
            "$.body.hits.hits",
            "/.*/_search",
            10,
        )
        .expect("built-in elasticsearch adapter is well formed")
    }

    /// Whether a request to `path` belongs to this adapter.
    pub fn captures(&self, path: &str) -> bool {
        self.capture_path.matches(path)
    }
}

/// Registry of adapters, matched in registration order.
#[derive(Debug, Clone, Default)]
pub struct BackendAdapterRegistry {
    adapters: Vec<(String, BackendAdapterConfig)>,
}

impl BackendAdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the built-in adapters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(ELASTICSEARCH, BackendAdapterConfig::elasticsearch())
            .expect("built-in adapters do not overlap");
        registry
    }

    /// Build and validate a registry from `(name, config)` pairs.
    pub fn build<I, S>(adapters: I) -> BuildResult<Self>
    where
        I: IntoIterator<Item = (S, BackendAdapterConfig)>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (name, config) in adapters {
            registry.register(name, config)?;
        }
        Ok(registry)
    }

    /// Add or overwrite the adapter called `name`.
    ///
    /// Fails with [`ConfigurationError::OverlappingCapture`] when the capture
    /// pattern overlaps one of a *different* adapter: the two patterns are
    /// identical, or either one matches the other's source text.
    pub fn register(&mut self, name: impl Into<String>, config: BackendAdapterConfig) -> BuildResult<()> {
        let name = name.into();
        if let Some((other, _)) = self
            .adapters
            .iter()
            .find(|(n, c)| *n != name && c.capture_path.overlaps(&config.capture_path))
        {
            return Err(ConfigurationError::OverlappingCapture(
                other.clone(),
                name,
                config.capture_path.as_str().to_string(),
            ));
        }
        match self.adapters.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => {
                debug!(adapter = %name, "replacing backend adapter");
                slot.1 = config;
            }
            None => self.adapters.push((name, config)),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BackendAdapterConfig> {
        self.adapters.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// First adapter whose capture pattern matches `request_path`.
    pub fn resolve_for_request(&self, request_path: &str) -> Option<(&str, &BackendAdapterConfig)> {
        self.adapters
            .iter()
            .find(|(_, c)| c.captures(request_path))
            .map(|(n, c)| (n.as_str(), c))
    }

    /// Apply every path of `config` to one exchange.
    pub fn extract_fields(
        config: &BackendAdapterConfig,
        request: &RequestDocument,
        response: &ResponseDocument,
    ) -> Result<BoostFields, NotBoostable> {
        let request_fields = config.extract_request(request)?;
        let response_fields = config.extract_response(response)?;
        Ok(BoostFields::from_parts(request_fields, response_fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const NO_HEADERS: [(&str, &str); 0] = [];

    fn es_request(body: Value) -> RequestDocument {
        RequestDocument::new("/idx/_search", None, NO_HEADERS, Some(body))
    }

    fn es_response() -> ResponseDocument {
        ResponseDocument::new(
            NO_HEADERS,
            Some(json!({
                "took": 3,
                "hits": { "total": 2, "hits": [
                    { "_id": "a", "_source": { "title": "red shoes", "text": "on sale" } },
                    { "_id": "b", "_source": { "title": "blue shoes" } },
                ]}
            })),
        )
    }

    fn search_adapter(capture: &str) -> BackendAdapterConfig {
        BackendAdapterConfig::from_paths("q", "size", "hits[*].t", "hits[*].id", None, "hits", capture, 3)
            .unwrap()
    }

    #[test]
    fn elasticsearch_request_with_size() {
        let config = BackendAdapterConfig::elasticsearch();
        let fields = config
            .extract_request(&es_request(json!({ "query": { "match": { "text": "shoes" } }, "size": 5 })))
            .unwrap();
        assert_eq!(fields.query, "shoes");
        assert_eq!(fields.topk, 5);
        assert_eq!(fields.topk_source, TopkSource::Path(0));
    }

    #[test]
    fn elasticsearch_request_without_size_uses_default() {
        let config = BackendAdapterConfig::elasticsearch();
        let fields = config
            .extract_request(&es_request(json!({ "query": { "match": { "text": "shoes" } } })))
            .unwrap();
        assert_eq!(fields.query, "shoes");
        assert_eq!(fields.topk, 10);
        assert_eq!(fields.topk_source, TopkSource::Default);
    }

    #[test]
    fn elasticsearch_query_from_term_or_url() {
        let config = BackendAdapterConfig::elasticsearch();
        let term = config
            .extract_request(&es_request(json!({ "query": { "term": { "title": "boots" } } })))
            .unwrap();
        assert_eq!(term.query, "boots");

        let url = RequestDocument::new("/idx/_search", Some("q=sandals&size=7"), NO_HEADERS, None);
        let fields = config.extract_request(&url).unwrap();
        assert_eq!(fields.query, "sandals");
        assert_eq!(fields.topk, 7);
        assert_eq!(fields.topk_source, TopkSource::Path(1));
    }

    #[test]
    fn missing_query_is_not_boostable() {
        let config = BackendAdapterConfig::elasticsearch();
        let err = config
            .extract_request(&es_request(json!({ "query": { "match_all": {} } })))
            .unwrap_err();
        assert_eq!(err, NotBoostable::MissingField("query"));
    }

    #[test]
    fn garbage_topk_is_not_boostable() {
        let config = BackendAdapterConfig::elasticsearch();
        let err = config
            .extract_request(&es_request(json!({ "query": { "match": { "t": "x" } }, "size": "lots" })))
            .unwrap_err();
        assert!(matches!(err, NotBoostable::InvalidField("topk", _)));
    }

    #[test]
    fn true_cids_are_optional() {
        let config = BackendAdapterConfig::elasticsearch();
        let with = config
            .extract_request(&es_request(json!({
                "query": { "match": { "t": "x" } },
                "nboost": { "cids": ["b"] },
            })))
            .unwrap();
        assert_eq!(with.true_cids, Some(vec![json!("b")]));
    }

    #[test]
    fn elasticsearch_response_fields() {
        let fields = BackendAdapterConfig::elasticsearch()
            .extract_response(&es_response())
            .unwrap();
        assert_eq!(fields.cvalues, vec!["red shoes on sale", "blue shoes"]);
        assert_eq!(fields.cids, vec![json!("a"), json!("b")]);
        assert_eq!(fields.choices.len(), 2);
        assert_eq!(fields.choices[1]["_id"], "b");
    }

    #[test]
    fn empty_hit_list_is_boostable_and_empty() {
        let doc = ResponseDocument::new(NO_HEADERS, Some(json!({ "hits": { "hits": [] } })));
        let fields = BackendAdapterConfig::elasticsearch().extract_response(&doc).unwrap();
        assert!(fields.cvalues.is_empty() && fields.cids.is_empty() && fields.choices.is_empty());
    }

    #[test]
    fn response_without_hits_is_not_boostable() {
        let doc = ResponseDocument::new(NO_HEADERS, Some(json!({ "error": "index_not_found" })));
        let err = BackendAdapterConfig::elasticsearch().extract_response(&doc).unwrap_err();
        assert_eq!(err, NotBoostable::MissingField("cvalues"));
    }

    #[test]
    fn hits_without_ids_are_a_length_mismatch() {
        let doc = ResponseDocument::new(
            NO_HEADERS,
            Some(json!({ "hits": { "hits": [{ "_id": "a", "_source": { "t": "x" } }, { "_source": { "t": "y" } }] } })),
        );
        let err = BackendAdapterConfig::elasticsearch().extract_response(&doc).unwrap_err();
        assert_eq!(
            err,
            NotBoostable::LengthMismatch {
                cvalues: 2,
                cids: 1,
                choices: 2
            }
        );
    }

    #[test]
    fn extract_fields_combines_both_halves() {
        let fields = BackendAdapterRegistry::extract_fields(
            &BackendAdapterConfig::elasticsearch(),
            &es_request(json!({ "query": { "match": { "text": "shoes" } }, "size": 1 })),
            &es_response(),
        )
        .unwrap();
        assert_eq!(fields.query, "shoes");
        assert_eq!(fields.topk, 1);
        assert_eq!(fields.cids.len(), 2);
        assert_eq!(fields.true_cids, None);
    }

    #[test]
    fn resolve_for_request_matches_capture_pattern() {
        let registry = BackendAdapterRegistry::builtin();
        let (name, _) = registry.resolve_for_request("/products/_search").unwrap();
        assert_eq!(name, ELASTICSEARCH);
        assert!(registry.resolve_for_request("/products/_doc/1").is_none());
        assert!(registry.resolve_for_request("/").is_none());
    }

    #[test]
    fn resolve_picks_the_unique_match() {
        let registry = BackendAdapterRegistry::build([
            ("solr", search_adapter("/solr/.*/select")),
            ("es", search_adapter("/.*/_search")),
        ])
        .unwrap();
        assert_eq!(registry.resolve_for_request("/solr/core/select").unwrap().0, "solr");
        assert_eq!(registry.resolve_for_request("/idx/_search").unwrap().0, "es");
    }

    #[test]
    fn duplicate_capture_patterns_are_rejected() {
        let err = BackendAdapterRegistry::build([
            ("one", search_adapter("/.*/_search")),
            ("two", search_adapter("/.*/_search")),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::OverlappingCapture(ref a, ref b, _) if a == "one" && b == "two"));
    }

    #[test]
    fn pattern_matching_another_literal_is_an_overlap() {
        let err = BackendAdapterRegistry::build([
            ("all", search_adapter("/.*/_search")),
            ("idx", search_adapter("/idx/_search")),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::OverlappingCapture(ref a, ref b, _) if a == "all" && b == "idx"));

        let err = BackendAdapterRegistry::build([
            ("idx", search_adapter("/idx/_search")),
            ("all", search_adapter("/.*/_search")),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::OverlappingCapture(ref a, ref b, _) if a == "idx" && b == "all"));
    }

    #[test]
    fn register_overwrites_by_name() {
        let mut registry = BackendAdapterRegistry::builtin();
        let mut custom = BackendAdapterConfig::elasticsearch();
        custom.default_topk = 25;
        registry.register(ELASTICSEARCH, custom).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(ELASTICSEARCH).unwrap().default_topk, 25);
    }

    #[test]
    fn malformed_paths_fail_construction() {
        let err = BackendAdapterConfig::from_paths("q..x", "size", "a", "b", None, "c", "/x", 1).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPathExpression { .. }));
    }

    #[test]
    fn adapter_deserializes_from_textual_paths() {
        let config: BackendAdapterConfig = serde_json::from_value(json!({
            "query_path": "body.q",
            "topk_path": "body.n",
            "cvalues_path": "body.docs[*].text",
            "cids_path": "body.docs[*].id",
            "choices_path": "body.docs",
            "capture_path": "/search",
            "default_topk": 4,
        }))
        .unwrap();
        assert!(config.true_cids_path.is_none());
        assert!(config.captures("/search"));
    }
}
