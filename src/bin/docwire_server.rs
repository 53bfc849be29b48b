//! docwire server - TCP front end for the dispatcher
//!
//! Usage:
//!   docwire-server [--bind 127.0.0.1:27017] [--log-filter info] [--max-frame-bytes N]
//!
//! Serves an in-memory store. See `docwire::wire` for the frame layout.

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;

use docwire::config::ServerConfig;
use docwire::server::Server;
use docwire::{telemetry, Dispatcher, MemoryBackend};

fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    telemetry::init(&config.log_filter).context("failed to initialise logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting docwire-server");

    // Must run before any thread is spawned: the local UTC offset is read here
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(MemoryBackend::new())));
    let server = Server::bind(config.bind, Arc::clone(&dispatcher), config.max_frame_bytes)
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(addr = %server.local_addr()?, "listening");

    // Set up signal handler for graceful shutdown
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("failed to register signal handlers")?;

    let dispatcher_for_signal = Arc::clone(&dispatcher);
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let open = dispatcher_for_signal.registry().connections();
            tracing::info!(signal = sig, open_connections = open.len(), "received signal, exiting");
            for connection in &open {
                tracing::info!(
                    connection = %connection,
                    age_secs = connection.age().as_secs(),
                    "dropping open connection"
                );
            }
            std::process::exit(0);
        }
    });

    server.serve();
    Ok(())
}
