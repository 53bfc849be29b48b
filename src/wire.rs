//! Wire format - framing and envelopes
//!
//! Frame:    [4-byte length BE] [MessagePack payload]
//!
//! Request payload (map):
//!   `{requestId, op: "query"|"insert"|"update"|"delete", ns, ...}`
//!
//! Reply payload (map):
//!   `{requestId: <response id>, responseTo: <echoed requestId>, documents: [...]}`
//!
//! Only queries are answered. An `op` outside the four known kinds is a
//! protocol fault: decoding fails with `WireError::UnsupportedOperation` and
//! the transport drops the connection.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Document;
use crate::message::{ClientRequest, Delete, Insert, MessageHeader, Namespace, Query, Reply, Update};

/// Default upper bound on a single frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Message too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),
}

// ============================================================================
// Envelopes
// ============================================================================

/// Request envelope: captures requestId alongside the tagged operation.
#[derive(Debug, Serialize, Deserialize)]
struct RequestEnvelope {
    #[serde(rename = "requestId")]
    request_id: i32,
    #[serde(flatten)]
    operation: WireOperation,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum WireOperation {
    Query {
        ns: String,
        query: Document,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Document>,
        #[serde(default, rename = "numberToSkip")]
        number_to_skip: u32,
        #[serde(default, rename = "numberToReturn")]
        number_to_return: i32,
    },
    Insert {
        ns: String,
        documents: Vec<Document>,
        #[serde(default, rename = "continueOnError")]
        continue_on_error: bool,
    },
    Update {
        ns: String,
        selector: Document,
        update: Document,
        #[serde(default)]
        upsert: bool,
        #[serde(default)]
        multi: bool,
    },
    Delete {
        ns: String,
        selector: Document,
        #[serde(default, rename = "singleRemove")]
        single_remove: bool,
    },
    #[serde(other)]
    Unsupported,
}

/// Just the `op` tag, read again to name an unsupported operation
#[derive(Deserialize)]
struct OperationTag {
    #[serde(default)]
    op: Option<String>,
}

/// Reply envelope as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReply {
    #[serde(rename = "requestId")]
    pub request_id: i32,
    #[serde(rename = "responseTo")]
    pub response_to: i32,
    pub documents: Vec<Document>,
}

impl From<&Reply> for WireReply {
    fn from(reply: &Reply) -> Self {
        WireReply {
            request_id: reply.header.request_id,
            response_to: reply.header.response_to,
            documents: reply.documents.clone(),
        }
    }
}

// ============================================================================
// Decode / encode
// ============================================================================

fn parse_namespace(ns: &str) -> Result<Namespace, WireError> {
    Namespace::parse(ns).map_err(|_| WireError::InvalidNamespace(ns.to_string()))
}

/// Decode a request payload into a typed request
pub fn decode_request(payload: &[u8]) -> Result<ClientRequest, WireError> {
    let envelope: RequestEnvelope = rmp_serde::from_slice(payload)?;
    let header = MessageHeader::request(envelope.request_id);

    let request = match envelope.operation {
        WireOperation::Query { ns, query, fields, number_to_skip, number_to_return } => {
            let mut q = Query::new(header, parse_namespace(&ns)?, query);
            q.field_selector = fields;
            q.number_to_skip = number_to_skip;
            q.number_to_return = number_to_return;
            ClientRequest::Query(q)
        }
        WireOperation::Insert { ns, documents, continue_on_error } => ClientRequest::Insert(Insert {
            header,
            namespace: parse_namespace(&ns)?,
            documents,
            continue_on_error,
        }),
        WireOperation::Update { ns, selector, update, upsert, multi } => ClientRequest::Update(Update {
            header,
            namespace: parse_namespace(&ns)?,
            selector,
            update,
            upsert,
            multi,
        }),
        WireOperation::Delete { ns, selector, single_remove } => ClientRequest::Delete(Delete {
            header,
            namespace: parse_namespace(&ns)?,
            selector,
            single_remove,
        }),
        WireOperation::Unsupported => {
            let tag: OperationTag = rmp_serde::from_slice(payload)?;
            return Err(WireError::UnsupportedOperation(tag.op.unwrap_or_default()));
        }
    };

    Ok(request)
}

/// Encode a request payload (client side)
pub fn encode_request(request: &ClientRequest) -> Result<Vec<u8>, WireError> {
    let operation = match request {
        ClientRequest::Query(q) => WireOperation::Query {
            ns: q.namespace.full_name(),
            query: q.query.clone(),
            fields: q.field_selector.clone(),
            number_to_skip: q.number_to_skip,
            number_to_return: q.number_to_return,
        },
        ClientRequest::Insert(i) => WireOperation::Insert {
            ns: i.namespace.full_name(),
            documents: i.documents.clone(),
            continue_on_error: i.continue_on_error,
        },
        ClientRequest::Update(u) => WireOperation::Update {
            ns: u.namespace.full_name(),
            selector: u.selector.clone(),
            update: u.update.clone(),
            upsert: u.upsert,
            multi: u.multi,
        },
        ClientRequest::Delete(d) => WireOperation::Delete {
            ns: d.namespace.full_name(),
            selector: d.selector.clone(),
            single_remove: d.single_remove,
        },
    };
    let envelope = RequestEnvelope { request_id: request.header().request_id, operation };
    Ok(rmp_serde::to_vec_named(&envelope)?)
}

/// Encode a reply payload
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(&WireReply::from(reply))?)
}

/// Decode a reply payload (client side)
pub fn decode_reply(payload: &[u8]) -> Result<WireReply, WireError> {
    Ok(rmp_serde::from_slice(payload)?)
}

// ============================================================================
// Framing
// ============================================================================

/// Read one frame; `Ok(None)` on a clean end of stream.
///
/// End of stream is clean only at a frame boundary. A stream that stops
/// inside the length prefix or the payload is an `Io` error.
pub fn read_frame<R: Read>(stream: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>, WireError> {
    // Read 4-byte length prefix (big-endian)
    let mut len_buf = [0u8; 4];
    loop {
        match stream.read(&mut len_buf[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    stream.read_exact(&mut len_buf[1..])?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;

    Ok(Some(buf))
}

/// Write one frame and flush
pub fn write_frame<W: Write>(stream: &mut W, data: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(data.len()).map_err(|_| WireError::FrameTooLarge(data.len()))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod wire_tests {
    use super::*;
    use crate::document::doc;
    use serde_json::json;
    use std::io::Cursor;

    fn encode_raw(value: serde_json::Value) -> Vec<u8> {
        rmp_serde::to_vec_named(&value).unwrap()
    }

    // ============================================================================
    // Requests
    // ============================================================================

    #[test]
    fn test_decode_query() {
        let payload = encode_raw(json!({
            "requestId": 17,
            "op": "query",
            "ns": "shop.orders",
            "query": {"qty": 5},
            "numberToSkip": 2,
            "numberToReturn": 10,
        }));

        match decode_request(&payload).unwrap() {
            ClientRequest::Query(q) => {
                assert_eq!(q.header.request_id, 17);
                assert_eq!(q.namespace, Namespace::new("shop", "orders"));
                assert_eq!(q.query, doc([("qty", json!(5))]));
                assert_eq!(q.number_to_skip, 2);
                assert_eq!(q.number_to_return, 10);
                assert!(q.field_selector.is_none());
            }
            other => panic!("Expected Query, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_delete_defaults() {
        let payload = encode_raw(json!({
            "requestId": 3,
            "op": "delete",
            "ns": "shop.orders",
            "selector": {},
        }));

        match decode_request(&payload).unwrap() {
            ClientRequest::Delete(d) => {
                assert_eq!(d.header.request_id, 3);
                assert!(!d.single_remove);
            }
            other => panic!("Expected Delete, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unsupported_operation() {
        let payload = encode_raw(json!({"requestId": 1, "op": "getMore", "ns": "shop.orders"}));

        match decode_request(&payload) {
            Err(WireError::UnsupportedOperation(op)) => assert_eq!(op, "getMore"),
            other => panic!("Expected UnsupportedOperation, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_namespace() {
        let payload = encode_raw(json!({"requestId": 1, "op": "query", "ns": "orders", "query": {}}));

        assert!(matches!(decode_request(&payload), Err(WireError::InvalidNamespace(ns)) if ns == "orders"));
    }

    #[test]
    fn test_encode_request_is_decodable() {
        let insert = ClientRequest::Insert(Insert {
            header: MessageHeader::request(5),
            namespace: Namespace::new("shop", "orders"),
            documents: vec![doc([("_id", json!(1)), ("item", json!("pen"))])],
            continue_on_error: true,
        });

        let decoded = decode_request(&encode_request(&insert).unwrap()).unwrap();
        assert_eq!(decoded, insert);
    }

    // ============================================================================
    // Replies
    // ============================================================================

    #[test]
    fn test_reply_envelope_fields() {
        let reply = Reply::new(MessageHeader::reply(8, 17), vec![doc([("ok", json!(1.0))])]);

        let payload = encode_reply(&reply).unwrap();
        let raw: serde_json::Value = rmp_serde::from_slice(&payload).unwrap();

        assert_eq!(raw, json!({"requestId": 8, "responseTo": 17, "documents": [{"ok": 1.0}]}));
        assert_eq!(decode_reply(&payload).unwrap(), WireReply::from(&reply));
    }

    // ============================================================================
    // Framing
    // ============================================================================

    #[test]
    fn test_frame_layout() {
        let mut out = Vec::new();
        write_frame(&mut out, b"abc").unwrap();
        assert_eq!(out, vec![0, 0, 0, 3, b'a', b'b', b'c']);

        let mut cursor = Cursor::new(out);
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), None);
    }

    #[test]
    fn test_frame_too_large() {
        let mut cursor = Cursor::new(vec![0, 0, 4, 0]);
        assert!(matches!(read_frame(&mut cursor, 1000), Err(WireError::FrameTooLarge(1024))));
    }

    #[test]
    fn test_truncated_length_prefix_is_error() {
        for partial in [vec![0], vec![0, 0], vec![0, 0, 0]] {
            let mut cursor = Cursor::new(partial);
            match read_frame(&mut cursor, 1024) {
                Err(WireError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
                other => panic!("Expected Io error, got: {:?}", other),
            }
        }
    }

    #[test]
    fn test_empty_stream_is_clean_end() {
        let mut cursor = Cursor::new(Vec::new());
        assert_eq!(read_frame(&mut cursor, 1024).unwrap(), None);
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 5, 1, 2]);
        assert!(matches!(read_frame(&mut cursor, 1024), Err(WireError::Io(_))));
    }
}
