//! Extraction of the semantic search fields from an exchange.

use super::BackendAdapterConfig;
use super::document::{RequestDocument, ResponseDocument};
use crate::path::Resolved;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Why an exchange cannot be boosted.
///
/// This is never a failure of the gateway: the caller decides (via its
/// unboostable policy) whether to pass the exchange through or reject it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NotBoostable {
    #[error("required field '{0}' is absent")]
    MissingField(&'static str),

    #[error("field '{0}' has an unusable value: {1}")]
    InvalidField(&'static str, String),

    #[error("candidate lists disagree: {cvalues} values, {cids} ids, {choices} choices")]
    LengthMismatch {
        cvalues: usize,
        cids: usize,
        choices: usize,
    },
}

/// Where the effective `topk` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TopkSource {
    /// Index of the `topk_path` alternative that resolved.
    Path(usize),
    /// Nothing resolved; `default_topk` applies.
    Default,
}

/// Fields read from the inbound request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestFields {
    pub query: String,
    pub topk: usize,
    pub topk_source: TopkSource,
    pub true_cids: Option<Vec<Value>>,
}

/// Fields read from the upstream response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFields {
    /// Candidate texts, one per choice.
    pub cvalues: Vec<String>,
    pub cids: Vec<Value>,
    pub choices: Vec<Value>,
}

/// All six semantic fields of one boostable exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoostFields {
    pub query: String,
    pub topk: usize,
    pub cvalues: Vec<String>,
    pub cids: Vec<Value>,
    pub true_cids: Option<Vec<Value>>,
    pub choices: Vec<Value>,
}

impl BoostFields {
    pub fn from_parts(request: RequestFields, response: ResponseFields) -> Self {
        Self {
            query: request.query,
            topk: request.topk,
            cvalues: response.cvalues,
            cids: response.cids,
            true_cids: request.true_cids,
            choices: response.choices,
        }
    }
}

impl BackendAdapterConfig {
    /// Read `query`, `topk` and `true_cids` from the request envelope.
    pub fn extract_request(&self, doc: &RequestDocument) -> Result<RequestFields, NotBoostable> {
        let query = self.query_path.evaluate(doc.as_value()).leaf_strings().join(" ");
        if query.trim().is_empty() {
            return Err(NotBoostable::MissingField("query"));
        }

        let (topk, topk_source) = match self.topk_path.evaluate_indexed(doc.as_value()) {
            Some((index, Resolved::One(value))) => (parse_topk(&value)?, TopkSource::Path(index)),
            Some((_, other)) => {
                return Err(NotBoostable::InvalidField("topk", format!("{other:?}")));
            }
            None => (self.default_topk, TopkSource::Default),
        };

        let true_cids = self
            .true_cids_path
            .as_ref()
            .and_then(|p| p.evaluate(doc.as_value()).into_list());

        Ok(RequestFields {
            query,
            topk,
            topk_source,
            true_cids,
        })
    }

    /// Read `cvalues`, `cids` and `choices` from the response envelope.
    pub fn extract_response(&self, doc: &ResponseDocument) -> Result<ResponseFields, NotBoostable> {
        let cvalues: Vec<String> = self
            .cvalues_path
            .evaluate(doc.as_value())
            .into_list()
            .ok_or(NotBoostable::MissingField("cvalues"))?
            .into_iter()
            .map(|v| Resolved::One(v).leaf_strings().join(" "))
            .collect();
        let cids = self
            .cids_path
            .evaluate(doc.as_value())
            .into_list()
            .ok_or(NotBoostable::MissingField("cids"))?;
        let choices = self
            .choices_path
            .evaluate(doc.as_value())
            .into_list()
            .ok_or(NotBoostable::MissingField("choices"))?;

        if cvalues.len() != cids.len() || cids.len() != choices.len() {
            return Err(NotBoostable::LengthMismatch {
                cvalues: cvalues.len(),
                cids: cids.len(),
                choices: choices.len(),
            });
        }

        Ok(ResponseFields {
            cvalues,
            cids,
            choices,
        })
    }
}

fn parse_topk(value: &Value) -> Result<usize, NotBoostable> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| NotBoostable::InvalidField("topk", value.to_string()))
}
