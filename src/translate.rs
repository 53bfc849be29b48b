//! Error translation - failures to error documents
//!
//! Every query-path failure ends up as exactly one document in the reply.
//! The four shapes are distinguishable by clients:
//!
//! | Kind            | Fields                                   |
//! |-----------------|------------------------------------------|
//! | NoSuchCommand   | `errmsg`, `bad cmd`, `code`, `ok: 0`     |
//! | Classified      | `errmsg`, `code`, `ok: 0`                |
//! | Silent          | `errmsg`, `ok: 0`                        |
//! | Unclassified    | `errmsg`, `ok: 0`                        |
//!
//! `HostResolution` uses the Classified shape.

use std::error::Error as _;

use serde_json::Value;

use crate::document::{Document, BAD_CMD_KEY, CODE_KEY, ERRMSG_KEY, OK_KEY};
use crate::error::ServerError;
use crate::message::Query;

/// Build the error document for a failed query.
///
/// `query` supplies the `bad cmd` echo for unknown commands.
pub fn error_document(error: &ServerError, query: &Query) -> Document {
    let mut document = Document::new();
    document.insert(ERRMSG_KEY.to_string(), Value::from(error.to_string()));

    if let ServerError::NoSuchCommand { .. } = error {
        document.insert(BAD_CMD_KEY.to_string(), Value::Object(query.query.clone()));
    }
    if let Some(code) = error.code() {
        document.insert(CODE_KEY.to_string(), Value::from(code));
    }

    document.insert(OK_KEY.to_string(), Value::from(0));
    document
}

/// Log a failed query at the severity its kind calls for.
///
/// Silent failures are expected conditions and only show up at debug level.
pub fn log_failure(error: &ServerError, query: &Query) {
    match error {
        ServerError::NoSuchCommand { command } => {
            tracing::error!(command = %command, ns = %query.namespace, query = ?query.query, "unknown command");
        }
        ServerError::Silent(message) => {
            tracing::debug!(ns = %query.namespace, message = %message, "query failed silently");
        }
        ServerError::Classified { .. } | ServerError::HostResolution => {
            tracing::error!(
                kind = error.kind(),
                code = ?error.code(),
                ns = %query.namespace,
                query = ?query.query,
                "failed to handle query: {}", error
            );
        }
        ServerError::Unclassified { .. } => {
            tracing::error!(
                kind = error.kind(),
                ns = %query.namespace,
                query = ?query.query,
                cause = %cause_chain(error),
                "failed to handle query: {}", error
            );
        }
    }
}

/// Render the `source()` chain of an error as `a: b: c`
fn cause_chain(error: &ServerError) -> String {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes.join(": ")
}

#[cfg(test)]
mod translate_tests {
    use super::*;
    use crate::document::doc;
    use crate::message::{MessageHeader, Namespace};
    use serde_json::json;

    fn make_query(query: Document) -> Query {
        Query::new(MessageHeader::request(1), Namespace::new("test", "$cmd"), query)
    }

    fn keys(d: &Document) -> Vec<&str> {
        d.keys().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_no_such_command_shape() {
        let query = make_query(doc([("frobnicate", json!(1))]));
        let d = error_document(&ServerError::no_such_command("frobnicate"), &query);

        assert_eq!(keys(&d), vec!["errmsg", "bad cmd", "code", "ok"]);
        assert_eq!(d["errmsg"], json!("no such cmd: frobnicate"));
        assert_eq!(d["bad cmd"], json!({"frobnicate": 1}));
        assert_eq!(d["code"], json!(59));
        assert_eq!(d["ok"], json!(0));
    }

    #[test]
    fn test_classified_shape_is_exact() {
        let query = make_query(Document::new());
        let d = error_document(&ServerError::classified(50, "bad state"), &query);

        assert_eq!(Value::Object(d), json!({"errmsg": "bad state", "code": 50, "ok": 0}));
    }

    #[test]
    fn test_silent_has_no_code() {
        let query = make_query(Document::new());
        let d = error_document(&ServerError::silent("no match"), &query);

        assert_eq!(Value::Object(d), json!({"errmsg": "no match", "ok": 0}));
    }

    #[test]
    fn test_unclassified_has_no_code() {
        let query = make_query(Document::new());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let d = error_document(&ServerError::unclassified_with("write failed", io), &query);

        assert_eq!(Value::Object(d), json!({"errmsg": "write failed", "ok": 0}));
    }

    #[test]
    fn test_host_resolution_is_classified() {
        let query = make_query(Document::new());
        let d = error_document(&ServerError::HostResolution, &query);

        assert_eq!(Value::Object(d), json!({"errmsg": "failed to get hostname", "code": 7, "ok": 0}));
    }

    #[test]
    fn test_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ServerError::unclassified_with("write failed", io);
        assert_eq!(cause_chain(&err), "disk gone");
        assert_eq!(cause_chain(&ServerError::silent("x")), "");
    }
}
