//! Document - loosely-typed result documents
//!
//! Every reply carries a sequence of documents. A document is an ordered
//! string-keyed map: key order is significant because the first key of a
//! command document names the command, and clients read error documents
//! field by field.

use serde_json::{Map, Value};

/// Ordered key/value document exchanged with clients and the backend
pub type Document = Map<String, Value>;

/// Key carrying the success marker
pub const OK_KEY: &str = "ok";

/// Key carrying the human-readable error message
pub const ERRMSG_KEY: &str = "errmsg";

/// Key carrying the numeric error code
pub const CODE_KEY: &str = "code";

/// Key echoing the offending command document of an unknown command
pub const BAD_CMD_KEY: &str = "bad cmd";

/// Build a document from `(key, value)` pairs, keeping their order
pub fn doc<K, I>(pairs: I) -> Document
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Mark a document as successful (`ok: 1.0`)
pub fn mark_ok(document: &mut Document) {
    document.insert(OK_KEY.to_string(), Value::from(1.0));
}

/// Join version components with dots (`[2, 4, 0]` -> `"2.4.0"`)
pub fn join_version(parts: &[u32]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod document_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_keeps_insertion_order() {
        let d = doc([("z", json!(1)), ("a", json!(2)), ("m", json!(3))]);
        let keys: Vec<&str> = d.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_mark_ok() {
        let mut d = Document::new();
        mark_ok(&mut d);
        assert_eq!(d.get(OK_KEY), Some(&json!(1.0)));
    }

    #[test]
    fn test_mark_ok_overwrites() {
        let mut d = doc([(OK_KEY, json!(0)), (ERRMSG_KEY, json!("boom"))]);
        mark_ok(&mut d);
        assert_eq!(d.get(OK_KEY), Some(&json!(1.0)));
        assert_eq!(d.keys().next().map(String::as_str), Some(OK_KEY));
    }

    #[test]
    fn test_join_version() {
        assert_eq!(join_version(&[2, 4, 0]), "2.4.0");
        assert_eq!(join_version(&[7]), "7");
        assert_eq!(join_version(&[]), "");
    }
}
