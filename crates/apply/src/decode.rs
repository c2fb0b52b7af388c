//! Split a YAML document stream (or a whitespace separated JSON stream) into
//! resource objects, preserving document order.

use std::io;

use keel_core::{ObjectError, ResourceObject};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::trace;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Upper bound on one document's compact JSON encoding.
    pub max_bytes: usize,
    /// Upper bound on JSON nodes per document.
    pub max_nodes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self { max_bytes: 1_000_000, max_nodes: 100_000 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    #[error("document too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("document too complex (>{0} nodes)")]
    TooComplex(usize),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error("list item {index}: {source}")]
    ListItem { index: usize, source: ObjectError },
}

/// Decoding stopped at document `ordinal` (1-based). `decoded` holds the
/// objects read before it.
#[derive(Debug, thiserror::Error)]
#[error("parsing document {ordinal}: {failure}")]
pub struct DecodeError {
    pub ordinal: usize,
    pub decoded: Vec<ResourceObject>,
    #[source]
    pub failure: DecodeFailure,
}

pub fn decode(data: &[u8], limits: &DecodeLimits) -> Result<Vec<ResourceObject>, DecodeError> {
    let mut out = Vec::new();
    match data.iter().find(|b| !b.is_ascii_whitespace()) {
        None => Ok(out),
        Some(b'{') => {
            let mut ordinal = 1;
            for item in serde_json::Deserializer::from_slice(data).into_iter::<Json>() {
                match item.map_err(DecodeFailure::from).and_then(|v| accept(v, limits, &mut out)) {
                    Ok(true) => ordinal += 1,
                    Ok(false) => {}
                    Err(failure) => return Err(DecodeError { ordinal, decoded: out, failure }),
                }
            }
            Ok(out)
        }
        Some(_) => {
            let mut ordinal = 1;
            for doc in serde_yaml::Deserializer::from_slice(data) {
                let res = serde_yaml::Value::deserialize(doc)
                    .map_err(DecodeFailure::from)
                    .and_then(|y| serde_json::to_value(y).map_err(DecodeFailure::from))
                    .and_then(|v| accept(v, limits, &mut out));
                match res {
                    Ok(true) => ordinal += 1,
                    Ok(false) => {}
                    Err(failure) => return Err(DecodeError { ordinal, decoded: out, failure }),
                }
            }
            Ok(out)
        }
    }
}

// Returns false for empty documents, which do not count as a section.
fn accept(v: Json, limits: &DecodeLimits, out: &mut Vec<ResourceObject>) -> Result<bool, DecodeFailure> {
    if v.is_null() {
        return Ok(false);
    }
    if node_budget_exceeded(&v, limits.max_nodes) {
        return Err(DecodeFailure::TooComplex(limits.max_nodes));
    }
    if encoded_len(&v) > limits.max_bytes {
        return Err(DecodeFailure::TooLarge(limits.max_bytes));
    }
    let obj = ResourceObject::from_value(v)?;
    if !is_list(&obj) {
        trace!(kind = obj.kind(), name = obj.name(), "decoded document");
        out.push(obj);
        return Ok(true);
    }
    let items = match obj.into_value() {
        Json::Object(mut map) => match map.remove("items") {
            Some(Json::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    trace!(items = items.len(), "expanding list document");
    for (index, item) in items.into_iter().enumerate() {
        let obj = ResourceObject::from_value(item).map_err(|source| DecodeFailure::ListItem { index, source })?;
        out.push(obj);
    }
    Ok(true)
}

fn is_list(obj: &ResourceObject) -> bool {
    obj.kind().ends_with("List") && obj.as_value().get("items").map(Json::is_array).unwrap_or(false)
}

struct ByteCount(usize);

impl io::Write for ByteCount {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn encoded_len(v: &Json) -> usize {
    let mut count = ByteCount(0);
    // writing a Value into a counter cannot fail
    let _ = serde_json::to_writer(&mut count, v);
    count.0
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    // bail as soon as the running count reaches max
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(objs: &[ResourceObject]) -> Vec<&str> {
        objs.iter().map(|o| o.name()).collect()
    }

    #[test]
    fn yaml_stream_keeps_order() {
        let y = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: team\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: one\n  namespace: team\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: two\n";
        let objs = decode(y.as_bytes(), &DecodeLimits::default()).unwrap();
        assert_eq!(names(&objs), vec!["team", "one", "two"]);
        assert_eq!(objs[2].gvk().key(), "apps/v1/Deployment");
    }

    #[test]
    fn empty_input_and_empty_documents() {
        assert!(decode(b"", &DecodeLimits::default()).unwrap().is_empty());
        assert!(decode(b"  \n\t\n", &DecodeLimits::default()).unwrap().is_empty());
        let y = "---\n# only a comment\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n";
        let objs = decode(y.as_bytes(), &DecodeLimits::default()).unwrap();
        assert_eq!(names(&objs), vec!["a"]);
    }

    #[test]
    fn malformed_document_reports_ordinal_and_keeps_prefix() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: [unclosed\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\n";
        let err = decode(y.as_bytes(), &DecodeLimits::default()).unwrap_err();
        assert_eq!(err.ordinal, 2);
        assert_eq!(names(&err.decoded), vec!["a"]);
        assert!(err.to_string().starts_with("parsing document 2:"), "{}", err);
    }

    #[test]
    fn document_without_kind_is_rejected() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nmetadata:\n  name: b\n";
        let err = decode(y.as_bytes(), &DecodeLimits::default()).unwrap_err();
        assert_eq!(err.ordinal, 2);
        assert!(matches!(err.failure, DecodeFailure::Object(ObjectError::MissingField("kind"))));
    }

    #[test]
    fn json_stream_is_sniffed() {
        let j = br#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}}
  {"apiVersion":"v1","kind":"Secret","metadata":{"name":"b"}}"#;
        let objs = decode(j, &DecodeLimits::default()).unwrap();
        assert_eq!(names(&objs), vec!["a", "b"]);
        assert_eq!(objs[1].kind(), "Secret");
    }

    #[test]
    fn list_documents_expand_in_order() {
        let y = "apiVersion: v1\nkind: List\nitems:\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: a\n- apiVersion: v1\n  kind: ConfigMap\n  metadata:\n    name: b\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: c\n";
        let objs = decode(y.as_bytes(), &DecodeLimits::default()).unwrap();
        assert_eq!(names(&objs), vec!["a", "b", "c"]);
    }

    #[test]
    fn limits_are_enforced() {
        let y = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  a: '1'\n  b: '2'\n";
        let tight = DecodeLimits { max_bytes: 10, max_nodes: 100 };
        assert!(matches!(decode(y.as_bytes(), &tight).unwrap_err().failure, DecodeFailure::TooLarge(10)));
        let shallow = DecodeLimits { max_bytes: 1_000, max_nodes: 4 };
        let err = decode(y.as_bytes(), &shallow).unwrap_err();
        assert!(matches!(err.failure, DecodeFailure::TooComplex(4)));
        assert!(err.decoded.is_empty());
    }

    fn big_config_map(name: &str, size: usize) -> String {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\ndata:\n  blob: {}\n", name, "x".repeat(size))
    }

    #[test]
    fn byte_limit_applies_per_document() {
        let y = format!("{}---\n{}", big_config_map("a", 600_000), big_config_map("b", 600_000));
        assert!(y.len() > 1_000_000);
        let objs = decode(y.as_bytes(), &DecodeLimits::default()).unwrap();
        assert_eq!(names(&objs), vec!["a", "b"]);

        let y = format!("{}---\n{}", big_config_map("a", 100), big_config_map("b", 2_000));
        let err = decode(y.as_bytes(), &DecodeLimits { max_bytes: 1_000, max_nodes: 100 }).unwrap_err();
        assert_eq!(err.ordinal, 2);
        assert!(matches!(err.failure, DecodeFailure::TooLarge(1_000)));
        assert_eq!(names(&err.decoded), vec!["a"]);
    }

    #[test]
    fn malformed_json_stream_reports_ordinal() {
        let j = br#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}} {"broken""#;
        let err = decode(j, &DecodeLimits::default()).unwrap_err();
        assert_eq!(err.ordinal, 2);
        assert_eq!(names(&err.decoded), vec!["a"]);
        assert!(matches!(err.failure, DecodeFailure::Json(_)));
    }
}
