// Field filter tree
//
// Compiles a client-supplied list of dotted paths into a trie and projects
// certificate records down to the requested fields.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::StreamError;
use crate::Result;

/// Record paths a subscriber is allowed to select
const ALLOWED_FIELDS: &[&str] = &[
    "cert_pem",
    "cert_fingerprint",
    "subject",
    "sans",
    "issuer",
    "not_before",
    "not_after",
    "source",
    "timestamp",
    "subject.CN",
    "subject.O",
    "subject.OU",
    "subject.C",
    "subject.raw",
    "issuer.CN",
    "issuer.O",
    "issuer.OU",
    "issuer.C",
    "issuer.raw",
    "sans.dns_names",
    "sans.ip_addresses",
    "cert_fingerprint.sha256",
];

/// A trie of dotted path segments selecting fields of a record
#[derive(Debug, Default)]
pub struct FieldFilter {
    include: bool,
    children: HashMap<String, FieldFilter>,
}

impl FieldFilter {
    /// Compile a comma-separated list of dotted paths into a filter.
    ///
    /// Paths are trimmed and validated against the allow-list; unknown paths
    /// are dropped. Returns `None` when no path survives, which callers must
    /// treat as "no filter" (verbatim delivery), never as "send nothing".
    pub fn parse(spec: &str) -> Option<FieldFilter> {
        if spec.is_empty() {
            return None;
        }

        let mut filter = FieldFilter::default();
        let mut has_valid_fields = false;

        for field in spec.split(',') {
            let field = field.trim();
            if ALLOWED_FIELDS.contains(&field) {
                filter.add_path(field);
                has_valid_fields = true;
            }
        }

        if !has_valid_fields {
            return None;
        }

        Some(filter)
    }

    fn add_path(&mut self, path: &str) {
        let mut current = self;

        for part in path.split('.') {
            current = current.children.entry(part.to_string()).or_default();
        }

        current.include = true;
    }

    /// Whether a record key at `path` should survive projection.
    ///
    /// True when a node on the walk was requested exactly, or when the walk
    /// ends on an intermediate node whose subtree was requested (the
    /// enclosing object must be kept for the deeper selection to apply).
    pub fn should_include(&self, path: &[&str]) -> bool {
        let mut current = self;

        for (i, part) in path.iter().enumerate() {
            let Some(child) = current.children.get(*part) else {
                return false;
            };

            if child.include {
                return true;
            }

            if i == path.len() - 1 && !child.children.is_empty() {
                return true;
            }

            current = child;
        }

        current.include
    }

    fn node_at(&self, path: &[&str]) -> Option<&FieldFilter> {
        let mut current = self;
        for part in path {
            current = current.children.get(*part)?;
        }
        Some(current)
    }
}

/// Project a serialized record down to the fields selected by `filter`.
///
/// The input is parsed as a JSON object and rebuilt key by key in insertion
/// order; the input buffer itself is never modified, so disjoint projections
/// of the same message are safe.
pub fn project(msg: &[u8], filter: &FieldFilter) -> Result<Vec<u8>> {
    let data: Map<String, Value> =
        serde_json::from_slice(msg).map_err(|e| StreamError::ParseError {
            message: format!("record is not a JSON object: {}", e),
        })?;

    let filtered = filter_object(&data, filter, &mut Vec::new());

    Ok(serde_json::to_vec(&Value::Object(filtered))?)
}

fn filter_object<'a>(
    obj: &'a Map<String, Value>,
    root: &FieldFilter,
    path: &mut Vec<&'a str>,
) -> Map<String, Value> {
    let mut result = Map::new();

    for (key, value) in obj {
        path.push(key.as_str());

        if root.should_include(path) {
            match value {
                Value::Object(nested) => {
                    let has_children = root
                        .node_at(path)
                        .is_some_and(|node| !node.children.is_empty());

                    if has_children {
                        let filtered = filter_object(nested, root, path);
                        if !filtered.is_empty() {
                            result.insert(key.clone(), Value::Object(filtered));
                        }
                    } else {
                        result.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    result.insert(key.clone(), value.clone());
                }
            }
        }

        path.pop();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_str(msg: &str, filter: &FieldFilter) -> Value {
        let out = project(msg.as_bytes(), filter).unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[test]
    fn test_parse_rejects_unknown_paths() {
        assert!(FieldFilter::parse("bogus").is_none());
        assert!(FieldFilter::parse("nope,also.nope").is_none());
        assert!(FieldFilter::parse("").is_none());
    }

    #[test]
    fn test_parse_keeps_known_paths_and_drops_rest() {
        let filter = FieldFilter::parse("bogus, subject.CN ,source").unwrap();

        assert!(filter.should_include(&["subject", "CN"]));
        assert!(filter.should_include(&["source"]));
        assert!(!filter.should_include(&["issuer"]));
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let filter = FieldFilter::parse("  subject.CN , source  ").unwrap();
        assert!(filter.should_include(&["source"]));
    }

    #[test]
    fn test_intermediate_path_is_retained_for_deeper_selection() {
        let filter = FieldFilter::parse("subject.CN").unwrap();

        // "subject" itself must survive so the walk can reach "subject.CN".
        assert!(filter.should_include(&["subject"]));
        assert!(filter.should_include(&["subject", "CN"]));
        assert!(!filter.should_include(&["subject", "O"]));
    }

    #[test]
    fn test_projection_leaf_selection() {
        let filter = FieldFilter::parse("subject.CN,source").unwrap();
        let record = r#"{"subject":{"CN":"a","O":["x"]},"issuer":{"CN":"b"},"source":"L","timestamp":1}"#;

        let out = project_str(record, &filter);
        assert_eq!(
            out,
            serde_json::json!({"subject": {"CN": "a"}, "source": "L"})
        );
    }

    #[test]
    fn test_projection_whole_object_selection() {
        let filter = FieldFilter::parse("subject").unwrap();
        let record = r#"{"subject":{"CN":"a","O":["x"]},"issuer":{"CN":"b"},"source":"L","timestamp":1}"#;

        let out = project_str(record, &filter);
        assert_eq!(out, serde_json::json!({"subject": {"CN": "a", "O": ["x"]}}));
    }

    #[test]
    fn test_projection_drops_empty_intermediate_objects() {
        let filter = FieldFilter::parse("subject.CN").unwrap();
        let record = r#"{"subject":{"O":["x"]},"source":"L"}"#;

        let out = project_str(record, &filter);
        assert_eq!(out, serde_json::json!({}));
    }

    #[test]
    fn test_projection_rejects_non_object_input() {
        let filter = FieldFilter::parse("source").unwrap();
        assert!(project(b"not json", &filter).is_err());
        assert!(project(b"[1,2,3]", &filter).is_err());
    }

    #[test]
    fn test_projection_tolerates_trailing_newline() {
        let filter = FieldFilter::parse("source").unwrap();
        let out = project(b"{\"source\":\"L\"}\n", &filter).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value, serde_json::json!({"source": "L"}));
    }

    #[test]
    fn test_all_paths_round_trip() {
        let filter = FieldFilter::parse(&super::ALLOWED_FIELDS.join(",")).unwrap();
        let record = serde_json::json!({
            "cert_pem": "-----BEGIN CERTIFICATE-----",
            "cert_fingerprint": {"sha256": "ab"},
            "subject": {"CN": "a", "O": ["x"], "OU": [], "C": ["US"], "raw": "CN=a"},
            "sans": {"dns_names": ["a.example"]},
            "issuer": {"CN": "b", "O": [], "OU": [], "C": [], "raw": "CN=b"},
            "not_before": "2024-01-01T00:00:00Z",
            "not_after": "2025-01-01T00:00:00Z",
            "source": "L",
            "timestamp": 1
        });

        let msg = serde_json::to_vec(&record).unwrap();
        let out = project(&msg, &filter).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value, record);
    }
}
