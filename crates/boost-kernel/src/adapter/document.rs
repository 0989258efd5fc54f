//! JSON envelopes that path expressions are evaluated against.
//!
//! Adapter paths address the whole exchange, not just the body:
//!
//! ```text
//! request  → { "url": { "path": "/idx/_search", "query": { "size": "5" } },
//!              "headers": { "content-type": "application/json" },
//!              "body": { ...parsed JSON body or null... } }
//! response → { "headers": { ... }, "body": { ... } }
//! ```
//!
//! Query-string values are kept as strings; when a key repeats, the last
//! value wins. The raw query string is remembered so that re-encoding only
//! touches the pairs that were actually rewritten.

use serde_json::{Map, Value, json};
use std::collections::HashSet;

/// Request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDocument {
    value: Value,
    raw_query: Option<String>,
}

impl RequestDocument {
    pub fn new<I, K, V>(path: &str, query_string: Option<&str>, headers: I, body: Option<Value>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let query = parse_query(query_string.unwrap_or_default());
        Self {
            value: json!({
                "url": { "path": path, "query": Value::Object(query) },
                "headers": headers_object(headers),
                "body": body.unwrap_or(Value::Null),
            }),
            raw_query: query_string.map(str::to_string),
        }
    }

    /// Build from a raw body; bodies that are not JSON become `null`.
    pub fn from_raw<I, K, V>(path: &str, query_string: Option<&str>, headers: I, body: &[u8]) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(path, query_string, headers, parse_body(body))
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn path(&self) -> &str {
        self.value["url"]["path"].as_str().unwrap_or_default()
    }

    /// Parsed JSON body, if there was one.
    pub fn body(&self) -> Option<&Value> {
        match &self.value["body"] {
            Value::Null => None,
            body => Some(body),
        }
    }

    /// Query string to send upstream (empty when there is none).
    ///
    /// Pairs whose value still matches `url.query` are copied byte for byte,
    /// so repeated keys and bare flags such as `pretty` survive. A rewritten
    /// key replaces its first occurrence and drops the later ones. Keys
    /// removed from `url.query` are dropped and new keys are appended.
    pub fn query_string(&self) -> String {
        let raw = self.raw_query.as_deref().unwrap_or_default();
        let original = parse_query(raw);
        let current = self.value["url"]["query"].as_object();

        let mut out: Vec<String> = Vec::new();
        let mut rewritten: HashSet<String> = HashSet::new();
        for segment in raw.split('&').filter(|s| !s.is_empty()) {
            let key = segment_key(segment);
            let Some(value) = current.and_then(|q| q.get(&key)) else {
                continue;
            };
            let value = query_value(value);
            if original.get(&key).map(query_value).as_deref() == Some(value.as_str()) {
                out.push(segment.to_string());
            } else if rewritten.insert(key.clone()) {
                out.push(encode_pair(&key, &value));
            }
        }
        if let Some(current) = current {
            out.extend(
                current
                    .iter()
                    .filter(|(k, _)| !original.contains_key(k.as_str()))
                    .map(|(k, v)| encode_pair(k, &query_value(v))),
            );
        }
        out.join("&")
    }

    /// Path plus query string, as it should be sent upstream.
    pub fn path_and_query(&self) -> String {
        let qs = self.query_string();
        if qs.is_empty() {
            self.path().to_string()
        } else {
            format!("{}?{}", self.path(), qs)
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDocument(Value);

impl ResponseDocument {
    pub fn new<I, K, V>(headers: I, body: Option<Value>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(json!({
            "headers": headers_object(headers),
            "body": body.unwrap_or(Value::Null),
        }))
    }

    pub fn from_raw<I, K, V>(headers: I, body: &[u8]) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(headers, parse_body(body))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn body(&self) -> Option<&Value> {
        match &self.0["body"] {
            Value::Null => None,
            body => Some(body),
        }
    }
}

fn headers_object<I, K, V>(headers: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let map: Map<String, Value> = headers
        .into_iter()
        .map(|(k, v)| (k.into().to_lowercase(), Value::String(v.into())))
        .collect();
    Value::Object(map)
}

fn parse_query(qs: &str) -> Map<String, Value> {
    form_urlencoded::parse(qs.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

fn segment_key(segment: &str) -> String {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn encode_pair(key: &str, value: &str) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair(key, value)
        .finish()
}

fn parse_body(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(body).ok()
}
