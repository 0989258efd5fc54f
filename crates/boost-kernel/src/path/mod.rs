//! Path expressions over JSON documents.
//!
//! A [`PathExpression`] is an ordered list of alternatives separated by `|`.
//! Each alternative is a dotted / bracketed address into a JSON tree, for
//! example `body.query.match`, `$.body.hits.hits[*]._id` or `a['dotted.key']`.
//! Alternatives may be wrapped in parentheses and may start with the `$` root
//! marker; both are purely cosmetic.
//!
//! Evaluation never fails: an address that does not resolve is simply
//! *absent* and the next alternative is tried. Only construction can fail,
//! with [`ConfigurationError::InvalidPathExpression`].
//!
//! A `*` segment fans out over every element of an array (or every value of an
//! object, in document order) and evaluates the rest of the address against
//! each one. Branches that do not resolve contribute nothing.
//!
//! ```rust
//! use boost_kernel::path::{PathExpression, Resolved};
//! use serde_json::json;
//!
//! let expr = PathExpression::parse("items[*].id").unwrap();
//! let doc = json!({ "items": [{ "id": 1 }, { "id": 2 }] });
//! assert_eq!(expr.evaluate(&doc), Resolved::Many(vec![json!(1), json!(2)]));
//! ```

mod parse;

use crate::error::ConfigurationError;
use parse::Alternative;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One addressing step inside an alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Object key (also accepted as an array index when it is numeric).
    Key(String),
    /// Array index.
    Index(usize),
    /// Every element of an array or every value of an object.
    Wildcard,
}

/// Outcome of evaluating a [`PathExpression`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// No alternative resolved.
    Absent,
    /// A wildcard-free alternative resolved to a single value.
    One(Value),
    /// A wildcard alternative resolved; one entry per matched branch.
    Many(Vec<Value>),
}

impl Resolved {
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }

    /// Interpret the result as a list.
    ///
    /// A single array value is unpacked into its elements, a single scalar
    /// becomes a one-element list.
    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Resolved::Absent => None,
            Resolved::One(Value::Array(items)) => Some(items),
            Resolved::One(value) => Some(vec![value]),
            Resolved::Many(items) => Some(items),
        }
    }

    /// Every string / number / bool leaf of the result in document order.
    pub fn leaf_strings(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            Resolved::Absent => {}
            Resolved::One(value) => collect_leaves(value, &mut out),
            Resolved::Many(values) => values.iter().for_each(|v| collect_leaves(v, &mut out)),
        }
        out
    }
}

/// Push the scalar leaves of `value` onto `out`.
pub fn collect_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, out)),
    }
}

/// An immutable alternation of JSON addresses.
#[derive(Clone, PartialEq, Eq)]
pub struct PathExpression {
    source: String,
    alternatives: Vec<Alternative>,
}

impl PathExpression {
    /// Parse the textual form, e.g. `"(body.size) | (url.query.size)"`.
    pub fn parse(src: &str) -> Result<Self, ConfigurationError> {
        let alternatives = parse::parse_expression(src)?;
        Ok(Self {
            source: src.trim().to_string(),
            alternatives,
        })
    }

    /// Build from a list of alternatives, e.g. `["a.b", "c"]`.
    pub fn from_alternatives<I, S>(alternatives: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = alternatives
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self::parse(&parts.join(" | "))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Source text of each alternative.
    pub fn alternatives(&self) -> impl Iterator<Item = &str> {
        self.alternatives.iter().map(|a| a.source.as_str())
    }

    pub fn has_wildcard(&self) -> bool {
        self.alternatives.iter().any(Alternative::has_wildcard)
    }

    /// Evaluate against `doc`, returning the first alternative that resolves.
    ///
    /// JSON `null` is treated as absent.
    pub fn evaluate(&self, doc: &Value) -> Resolved {
        self.evaluate_indexed(doc)
            .map(|(_, resolved)| resolved)
            .unwrap_or(Resolved::Absent)
    }

    /// Like [`evaluate`](Self::evaluate) but also reports which alternative won.
    pub fn evaluate_indexed(&self, doc: &Value) -> Option<(usize, Resolved)> {
        self.alternatives
            .iter()
            .enumerate()
            .find_map(|(i, alt)| match eval_segments(doc, &alt.segments) {
                Resolved::Absent => None,
                resolved => Some((i, resolved)),
            })
    }

    /// Write `value` through this expression.
    ///
    /// The target is the first wildcard-free alternative that currently
    /// resolves; failing that, the first wildcard-free alternative whose
    /// parent container exists. Returns `false` when nothing could be written.
    pub fn set(&self, doc: &mut Value, value: Value) -> bool {
        let candidates: Vec<&Alternative> = self
            .alternatives
            .iter()
            .filter(|a| !a.has_wildcard() && !a.segments.is_empty())
            .collect();

        let target = candidates
            .iter()
            .find(|a| !eval_segments(doc, &a.segments).is_absent())
            .or_else(|| candidates.iter().find(|a| parent_exists(doc, &a.segments)));

        match target {
            Some(alt) => write_at(doc, &alt.segments, value),
            None => false,
        }
    }

    /// Remove the value the first resolving wildcard-free alternative points
    /// at and return it.
    ///
    /// Objects left empty by the removal are removed as well, up to but not
    /// including the top-level entries of `doc`.
    pub fn remove(&self, doc: &mut Value) -> Option<Value> {
        let alt = self
            .alternatives
            .iter()
            .filter(|a| !a.has_wildcard() && !a.segments.is_empty())
            .find(|a| !eval_segments(doc, &a.segments).is_absent())?;
        remove_at(doc, &alt.segments, 0)
    }

    /// Write `value` through a specific alternative (as reported by
    /// [`evaluate_indexed`](Self::evaluate_indexed)).
    pub fn set_alternative(&self, index: usize, doc: &mut Value, value: Value) -> bool {
        match self.alternatives.get(index) {
            Some(alt) if !alt.has_wildcard() && !alt.segments.is_empty() => {
                write_at(doc, &alt.segments, value)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathExpression").field(&self.source).finish()
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for PathExpression {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PathExpression> for String {
    fn from(value: PathExpression) -> Self {
        value.source
    }
}

impl Serialize for PathExpression {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PathExpression {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────────────────────────────────────

fn step<'v>(value: &'v Value, segment: &Segment) -> Option<&'v Value> {
    match (segment, value) {
        (Segment::Key(key), Value::Object(map)) => map.get(key),
        (Segment::Key(key), Value::Array(items)) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        (Segment::Index(i), Value::Array(items)) => items.get(*i),
        _ => None,
    }
}

fn eval_segments(doc: &Value, segments: &[Segment]) -> Resolved {
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        if let Segment::Wildcard = segment {
            let children: Vec<&Value> = match current {
                Value::Array(items) => items.iter().collect(),
                Value::Object(map) => map.values().collect(),
                _ => return Resolved::Absent,
            };
            let rest = &segments[i + 1..];
            let values = children
                .into_iter()
                .filter_map(|child| match eval_segments(child, rest) {
                    Resolved::Absent => None,
                    Resolved::One(v) => Some(v),
                    Resolved::Many(vs) => Some(Value::Array(vs)),
                })
                .collect();
            return Resolved::Many(values);
        }
        match step(current, segment) {
            Some(next) => current = next,
            None => return Resolved::Absent,
        }
    }
    if current.is_null() {
        Resolved::Absent
    } else {
        Resolved::One(current.clone())
    }
}

fn parent_exists(doc: &Value, segments: &[Segment]) -> bool {
    let Some((_, parents)) = segments.split_last() else {
        return false;
    };
    let mut current = doc;
    for segment in parents {
        match step(current, segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current.is_object()
}

fn write_at(doc: &mut Value, segments: &[Segment], value: Value) -> bool {
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut current = doc;
    for segment in parents {
        let next = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get_mut(key),
            (Segment::Index(i), Value::Array(items)) => items.get_mut(*i),
            (Segment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get_mut(i))
            }
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return false,
        }
    }
    match (last, current) {
        (Segment::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), value);
            true
        }
        (Segment::Index(i), Value::Array(items)) if *i < items.len() => {
            items[*i] = value;
            true
        }
        _ => false,
    }
}

fn remove_at(current: &mut Value, segments: &[Segment], depth: usize) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return match (first, current) {
            (Segment::Key(key), Value::Object(map)) => map.shift_remove(key),
            (Segment::Index(i), Value::Array(items)) if *i < items.len() => Some(items.remove(*i)),
            _ => None,
        };
    }
    let child = match (first, &mut *current) {
        (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
        (Segment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
        (Segment::Key(key), Value::Array(items)) => items.get_mut(key.parse::<usize>().ok()?)?,
        _ => return None,
    };
    let removed = remove_at(child, rest, depth + 1)?;
    let emptied = child.as_object().is_some_and(|m| m.is_empty());
    if emptied && depth > 0 {
        if let (Segment::Key(key), Value::Object(map)) = (first, current) {
            map.shift_remove(key);
        }
    }
    Some(removed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture patterns
// ─────────────────────────────────────────────────────────────────────────────

/// Regex deciding whether a request path belongs to a backend adapter.
///
/// The pattern is anchored to the whole path: `/.*/_search` matches
/// `/idx/_search` but not `/idx/_search/template`.
#[derive(Clone)]
pub struct CapturePattern {
    source: String,
    regex: Regex,
}

impl CapturePattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigurationError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            ConfigurationError::InvalidCapturePattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the two patterns may claim the same path: they are identical,
    /// or either matches the other's source text.
    pub fn overlaps(&self, other: &CapturePattern) -> bool {
        self.source == other.source || self.matches(&other.source) || other.matches(&self.source)
    }
}

impl PartialEq for CapturePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CapturePattern {}

impl fmt::Debug for CapturePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapturePattern").field(&self.source).finish()
    }
}

impl Serialize for CapturePattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for CapturePattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expr(src: &str) -> PathExpression {
        PathExpression::parse(src).unwrap()
    }

    #[test]
    fn first_resolving_alternative_wins() {
        let e = PathExpression::from_alternatives(["a.b", "c"]).unwrap();
        assert_eq!(e.evaluate(&json!({ "c": 5 })), Resolved::One(json!(5)));
        assert_eq!(
            e.evaluate(&json!({ "a": { "b": 7 }, "c": 5 })),
            Resolved::One(json!(7))
        );
        assert!(e.evaluate(&json!({ "d": 1 })).is_absent());
    }

    #[test]
    fn type_mismatch_and_out_of_range_are_absent() {
        assert!(expr("a.b").evaluate(&json!({ "a": 3 })).is_absent());
        assert!(expr("a[4]").evaluate(&json!({ "a": [1, 2] })).is_absent());
        assert!(expr("a[0]").evaluate(&json!({ "a": { "0": 1 } })).is_absent());
    }

    #[test]
    fn null_counts_as_absent() {
        let e = expr("(body.size) | (url.query.size)");
        let doc = json!({ "body": { "size": null }, "url": { "query": { "size": "3" } } });
        assert_eq!(e.evaluate(&doc), Resolved::One(json!("3")));
    }

    #[test]
    fn wildcard_fans_out_over_arrays() {
        let e = expr("items[*].id");
        assert_eq!(
            e.evaluate(&json!({ "items": [{ "id": 1 }, { "id": 2 }] })),
            Resolved::Many(vec![json!(1), json!(2)])
        );
        assert_eq!(e.evaluate(&json!({ "items": [] })), Resolved::Many(vec![]));
    }

    #[test]
    fn wildcard_skips_branches_that_do_not_resolve() {
        let doc = json!({ "items": [{ "id": 1 }, { "name": "x" }, { "id": 3 }] });
        assert_eq!(
            expr("items[*].id").evaluate(&doc),
            Resolved::Many(vec![json!(1), json!(3)])
        );
    }

    #[test]
    fn wildcard_over_object_keeps_document_order() {
        let doc = json!({ "term": { "zeta": "z", "alpha": "a" } });
        assert_eq!(
            expr("term.*").evaluate(&doc),
            Resolved::Many(vec![json!("z"), json!("a")])
        );
    }

    #[test]
    fn nested_wildcards_group_per_branch() {
        let doc = json!({ "hits": [
            { "_source": { "title": "red shoes", "body": "cheap" } },
            { "_source": { "title": "blue shoes" } },
        ]});
        assert_eq!(
            expr("$.hits[*]._source.*").evaluate(&doc),
            Resolved::Many(vec![json!(["red shoes", "cheap"]), json!(["blue shoes"])])
        );
    }

    #[test]
    fn wildcard_on_scalar_is_absent_and_falls_through() {
        let e = expr("a.* | b");
        assert_eq!(e.evaluate(&json!({ "a": 1, "b": 2 })), Resolved::One(json!(2)));
    }

    #[test]
    fn numeric_key_indexes_arrays() {
        assert_eq!(
            expr("a.1").evaluate(&json!({ "a": ["x", "y"] })),
            Resolved::One(json!("y"))
        );
    }

    #[test]
    fn leaf_strings_flatten_nested_values() {
        let r = expr("query.match").evaluate(&json!({ "query": { "match": { "text": "shoes" } } }));
        assert_eq!(r.leaf_strings(), vec!["shoes".to_string()]);
    }

    #[test]
    fn set_overwrites_resolving_alternative() {
        let e = expr("(body.size) | (url.query.size)");
        let mut doc = json!({ "body": {}, "url": { "query": { "size": "5" } } });
        assert!(e.set(&mut doc, json!("25")));
        assert_eq!(doc["url"]["query"]["size"], json!("25"));
        assert!(doc["body"].get("size").is_none());
    }

    #[test]
    fn set_inserts_into_first_existing_parent() {
        let e = expr("(body.size) | (url.query.size)");
        let mut doc = json!({ "body": { "query": {} }, "url": { "query": {} } });
        assert!(e.set(&mut doc, json!(50)));
        assert_eq!(doc["body"]["size"], json!(50));
    }

    #[test]
    fn set_refuses_wildcards_and_missing_parents() {
        let mut doc = json!({ "a": [1, 2] });
        assert!(!expr("a[*]").set(&mut doc, json!(0)));
        assert!(!expr("x.y.z").set(&mut doc, json!(0)));
        assert_eq!(doc, json!({ "a": [1, 2] }));
    }

    #[test]
    fn remove_prunes_emptied_objects_below_the_top_level() {
        let e = expr("$.body.nboost.cids");
        let mut doc = json!({ "body": { "query": { "match": { "t": "x" } }, "nboost": { "cids": ["a"] } } });
        assert_eq!(e.remove(&mut doc), Some(json!(["a"])));
        assert_eq!(doc, json!({ "body": { "query": { "match": { "t": "x" } } } }));

        let mut only = json!({ "body": { "nboost": { "cids": ["a"] } } });
        assert!(e.remove(&mut only).is_some());
        assert_eq!(only, json!({ "body": {} }));
    }

    #[test]
    fn remove_keeps_siblings_and_ignores_absent_paths() {
        let e = expr("(a.missing) | (a.b)");
        let mut doc = json!({ "a": { "b": 1, "c": 2 } });
        assert_eq!(e.remove(&mut doc), Some(json!(1)));
        assert_eq!(doc, json!({ "a": { "c": 2 } }));
        assert_eq!(e.remove(&mut doc), None);
        assert_eq!(doc, json!({ "a": { "c": 2 } }));
    }

    #[test]
    fn serde_round_trips_through_source_text() {
        let e = expr("(body.size) | (url.query.size)");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json, json!("(body.size) | (url.query.size)"));
        let back: PathExpression = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
        assert!(serde_json::from_value::<PathExpression>(json!("a..b")).is_err());
    }

    #[test]
    fn capture_pattern_is_anchored() {
        let p = CapturePattern::new("/.*/_search").unwrap();
        assert!(p.matches("/idx/_search"));
        assert!(p.matches("/a,b/_search"));
        assert!(!p.matches("/idx/_search/template"));
        assert!(!p.matches("/idx/_doc/1"));
        assert!(CapturePattern::new("/(unclosed").is_err());
    }

    #[test]
    fn capture_overlap_checks_both_directions() {
        let all = CapturePattern::new("/.*/_search").unwrap();
        let idx = CapturePattern::new("/idx/_search").unwrap();
        let solr = CapturePattern::new("/solr/.*/select").unwrap();
        assert!(all.overlaps(&idx));
        assert!(idx.overlaps(&all));
        assert!(all.overlaps(&all.clone()));
        assert!(!all.overlaps(&solr));
        assert!(!solr.overlaps(&idx));
    }
}
