//! Runtime knobs for one server instance.
//!
//! Loading is up to the host process; `Config` only derives `Deserialize` with
//! defaults on every field so partial documents work.

use serde::Deserialize;

/// Default token expected in the `Upgrade` header.
pub const DEFAULT_UPGRADE_PROTOCOL: &str = "eventstream";

/// Largest request the byte-level entry point buffers before rejecting it (8 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Token that must appear (case-insensitively) in the `Upgrade` header for
    /// a request to switch to bidirectional-event mode.
    pub upgrade_protocol: String,

    /// Retry hint, in milliseconds, stamped on pushed frames that carry none.
    pub push_retry_ms: Option<u64>,

    /// Buffered bytes after which an unparsed request is answered with `413`.
    pub max_request_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upgrade_protocol: DEFAULT_UPGRADE_PROTOCOL.to_owned(),
            push_retry_ms: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}
