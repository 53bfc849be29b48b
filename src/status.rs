//! Server status reporting
//!
//! Builds the `serverStatus` document. It is generated fresh on every
//! request from the live registry size and the monotonic start instant;
//! nothing here is cached.
//!
//! Uptime is measured with `Instant`, never with wall-clock deltas, so it
//! cannot go backwards when the system clock is adjusted.
//!
//! The local UTC offset for `localTime` is sampled once, when the reporter is
//! built. On Unix the offset can only be read while the process is still
//! single-threaded; after that the reporter falls back to UTC. Build the
//! reporter (or the `Dispatcher` owning it) before spawning threads.

use std::time::Instant;

use serde_json::Value;
use sysinfo::System;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::document::{doc, join_version, mark_ok, Document};
use crate::error::{Result, ServerError};
use crate::registry::ConnectionRegistry;

/// Process name reported in the status document
pub const PROCESS_NAME: &str = "docwire";

/// Looks up the local host name; `None` when it cannot be determined
pub type HostNameFn = fn() -> Option<String>;

/// Builder of point-in-time status snapshots
#[derive(Debug, Clone)]
pub struct StatusReporter {
    started_at: Instant,
    host_name: HostNameFn,
    local_offset: UtcOffset,
}

impl StatusReporter {
    /// Create a reporter whose uptime counts from `started_at`
    pub fn new(started_at: Instant) -> Self {
        Self::with_host_name(started_at, System::host_name)
    }

    /// Create a reporter with a custom host name lookup
    pub fn with_host_name(started_at: Instant, host_name: HostNameFn) -> Self {
        let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Self { started_at, host_name, local_offset }
    }

    /// Report `localTime` in a fixed offset instead of the sampled one
    pub fn with_local_offset(mut self, offset: UtcOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Build the status document.
    ///
    /// # Errors
    /// `ServerError::HostResolution` if the host name is unavailable.
    pub fn snapshot(&self, registry: &ConnectionRegistry, version: &[u32]) -> Result<Document> {
        let host = (self.host_name)().ok_or(ServerError::HostResolution)?;
        let uptime = self.started_at.elapsed();

        let mut status = Document::new();
        status.insert("host".to_string(), Value::from(host));
        status.insert("version".to_string(), Value::from(join_version(version)));
        status.insert("process".to_string(), Value::from(PROCESS_NAME));
        status.insert("pid".to_string(), Value::from(std::process::id()));
        status.insert("uptime".to_string(), Value::from(uptime.as_secs()));
        status.insert("uptimeMillis".to_string(), Value::from(uptime.as_millis() as u64));
        status.insert("localTime".to_string(), Value::from(self.local_time()?));
        status.insert(
            "connections".to_string(),
            Value::Object(doc([("current", Value::from(registry.size()))])),
        );
        // No cursors are kept by this layer
        status.insert(
            "cursors".to_string(),
            Value::Object(doc([("totalOpen", Value::from(0))])),
        );
        mark_ok(&mut status);

        Ok(status)
    }
}

impl StatusReporter {
    /// Current wall-clock time in RFC 3339, in the sampled local offset
    fn local_time(&self) -> Result<String> {
        OffsetDateTime::now_utc()
            .to_offset(self.local_offset)
            .format(&Rfc3339)
            .map_err(|e| ServerError::unclassified_with("failed to format local time", e))
    }
}
