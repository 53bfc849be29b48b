//! TCP transport
//!
//! Blocking accept loop with one thread per connection. Requests from one
//! connection are handled in arrival order on its own thread; a slow backend
//! call only holds up that connection.
//!
//! A connection is closed when the client hangs up, when a frame cannot be
//! decoded (including unsupported operations), or when the backend rejects a
//! write. `on_connection_close` runs exactly once in every case.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::wire::{self, WireError};

/// Requests slower than this are logged at warn level
pub const SLOW_REQUEST_THRESHOLD_MS: u64 = 100;

/// Why a connection loop ended
#[derive(Debug)]
pub enum ConnectionEnd {
    /// Client closed the stream
    Disconnected,
    /// Unreadable frame, undecodable payload or failed reply write
    Protocol(WireError),
    /// The backend rejected a write; there is no reply channel to report it
    WriteFailed(crate::error::ServerError),
}

pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    max_frame_bytes: usize,
}

impl Server {
    pub fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>, max_frame_bytes: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, dispatcher, max_frame_bytes })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails
    pub fn serve(self) {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let max_frame_bytes = self.max_frame_bytes;
                    thread::spawn(move || handle_client(stream, dispatcher, max_frame_bytes));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                }
            }
        }
    }
}

/// Run one TCP connection to completion
pub fn handle_client(mut stream: TcpStream, dispatcher: Arc<Dispatcher>, max_frame_bytes: usize) {
    let connection = Connection::new(stream.peer_addr().ok());
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(connection = %connection, error = %e, "could not set TCP_NODELAY");
    }

    dispatcher.on_connection_open(&connection);
    let end = serve_connection(&mut stream, &connection, &dispatcher, max_frame_bytes);

    match &end {
        ConnectionEnd::Disconnected => {}
        ConnectionEnd::Protocol(e) => {
            tracing::error!(connection = %connection, error = %e, "protocol error, closing connection");
        }
        ConnectionEnd::WriteFailed(e) => {
            tracing::error!(
                connection = %connection,
                kind = e.kind(),
                code = ?e.code(),
                "write rejected by backend, closing connection: {}", e
            );
        }
    }

    dispatcher.on_connection_close(&connection);
}

/// Read, dispatch and answer requests until the connection ends
pub fn serve_connection<S: Read + Write>(
    stream: &mut S,
    connection: &Connection,
    dispatcher: &Dispatcher,
    max_frame_bytes: usize,
) -> ConnectionEnd {
    loop {
        let frame = match wire::read_frame(stream, max_frame_bytes) {
            Ok(Some(frame)) => frame,
            Ok(None) => return ConnectionEnd::Disconnected,
            Err(e) => return ConnectionEnd::Protocol(e),
        };

        let request = match wire::decode_request(&frame) {
            Ok(request) => request,
            Err(e) => return ConnectionEnd::Protocol(e),
        };

        let start = Instant::now();
        let outcome = dispatcher.on_request(connection, &request);

        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms >= SLOW_REQUEST_THRESHOLD_MS {
            tracing::warn!(
                connection = %connection,
                op = request.operation_name(),
                ns = %request.namespace(),
                duration_ms,
                "slow request"
            );
        }

        let reply = match outcome {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => return ConnectionEnd::WriteFailed(e),
        };

        let written = wire::encode_reply(&reply).and_then(|bytes| wire::write_frame(stream, &bytes));
        if let Err(e) = written {
            return ConnectionEnd::Protocol(e);
        }
    }
}

#[cfg(test)]
mod server_tests {
    use super::*;
    use crate::document::doc;
    use crate::memory::MemoryBackend;
    use crate::message::{ClientRequest, Insert, MessageHeader, Namespace, Query};
    use serde_json::json;
    use std::io::Cursor;

    /// In-memory stream: reads from a scripted input, collects written bytes
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(frames: &[Vec<u8>]) -> Self {
            let mut input = Vec::new();
            for frame in frames {
                wire::write_frame(&mut input, frame).unwrap();
            }
            Self { input: Cursor::new(input), output: Vec::new() }
        }

        fn replies(&self) -> Vec<wire::WireReply> {
            let mut cursor = Cursor::new(self.output.clone());
            let mut replies = Vec::new();
            while let Some(frame) = wire::read_frame(&mut cursor, usize::MAX).unwrap() {
                replies.push(wire::decode_reply(&frame).unwrap());
            }
            replies
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn query_frame(request_id: i32, ns: &str, filter: serde_json::Value) -> Vec<u8> {
        let serde_json::Value::Object(filter) = filter else { panic!("filter must be an object") };
        let query = Query::new(MessageHeader::request(request_id), Namespace::parse(ns).unwrap(), filter);
        wire::encode_request(&ClientRequest::Query(query)).unwrap()
    }

    fn insert_frame(documents: Vec<crate::document::Document>) -> Vec<u8> {
        wire::encode_request(&ClientRequest::Insert(Insert {
            header: MessageHeader::request(1),
            namespace: Namespace::new("shop", "orders"),
            documents,
            continue_on_error: false,
        }))
        .unwrap()
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(std::sync::Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_queries_answered_in_order_until_eof() {
        let dispatcher = dispatcher();
        let conn = Connection::new(None);
        let mut stream = ScriptedStream::new(&[
            insert_frame(vec![doc([("_id", json!(1))])]),
            query_frame(10, "shop.orders", json!({})),
            query_frame(11, "admin.$cmd", json!({"ping": 1})),
        ]);

        let end = serve_connection(&mut stream, &conn, &dispatcher, 1024);

        assert!(matches!(end, ConnectionEnd::Disconnected));
        let replies = stream.replies();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].response_to, 10);
        assert_eq!(replies[0].documents, vec![doc([("_id", json!(1))])]);
        assert_eq!(replies[1].response_to, 11);
    }

    #[test]
    fn test_rejected_write_ends_connection() {
        let dispatcher = dispatcher();
        let conn = Connection::new(None);
        let mut stream = ScriptedStream::new(&[
            insert_frame(vec![doc([("$bad", json!(1))])]),
            query_frame(10, "shop.orders", json!({})),
        ]);

        let end = serve_connection(&mut stream, &conn, &dispatcher, 1024);

        match end {
            ConnectionEnd::WriteFailed(e) => assert_eq!(e.code(), Some(2)),
            other => panic!("Expected WriteFailed, got: {:?}", other),
        }
        assert!(stream.replies().is_empty());
    }

    #[test]
    fn test_oversized_frame_is_protocol_error() {
        let dispatcher = dispatcher();
        let conn = Connection::new(None);
        let mut stream = ScriptedStream::new(&[query_frame(1, "shop.orders", json!({"pad": "x".repeat(64)}))]);

        let end = serve_connection(&mut stream, &conn, &dispatcher, 16);

        assert!(matches!(end, ConnectionEnd::Protocol(WireError::FrameTooLarge(_))));
    }

    #[test]
    fn test_undecodable_payload_is_protocol_error() {
        let dispatcher = dispatcher();
        let conn = Connection::new(None);
        let mut stream = ScriptedStream::new(&[vec![0xc1]]);

        let end = serve_connection(&mut stream, &conn, &dispatcher, 1024);

        assert!(matches!(end, ConnectionEnd::Protocol(WireError::Decode(_))));
    }
}
