//! Server configuration.
//!
//! Unlike a long-lived storage daemon, an XCP server carries no persisted
//! state and nothing worth reloading at runtime — configuration is therefore
//! a plain builder struct constructed in-process, not a YAML file or
//! environment-variable overlay.

use std::net::SocketAddr;
use std::time::Duration;
use xcp_protocol::DEFAULT_MAX_FRAME_BYTES;

/// Server configuration, built with the `with_*` methods and handed to
/// [`crate::server::Server::new`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_frame_bytes: u64,
    pub idle_timeout: Duration,
    pub max_connections: usize,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: u64) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}
