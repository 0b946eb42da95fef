//! # xcp-server
//!
//! Async TCP server for XCP (eXtensible Coordination Protocol).
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Frame-level protocol dispatch (HELLO/CAPS handshake, DATA, PING/PONG)
//! - Per-connection session state
//! - Pluggable Ether-level request callbacks

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::{ConnectionHandler, HandshakeOutcome};
pub use server::Server;
pub use session::{ConnectionPhase, Session};
