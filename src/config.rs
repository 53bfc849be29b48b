//! Server configuration from the command line

use std::net::SocketAddr;

use clap::Parser;

use crate::wire::DEFAULT_MAX_FRAME_BYTES;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:27017";

/// Document database wire-protocol server backed by an in-memory store
#[derive(Debug, Clone, Parser)]
#[command(name = "docwire-server", version, about)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Log filter (tracing EnvFilter syntax); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Largest accepted request frame in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::parse_from(["docwire-server"])
    }
}
