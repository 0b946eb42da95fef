//! # xcp-client
//!
//! Async TCP client for XCP (eXtensible Coordination Protocol).
//!
//! This crate provides:
//! - A HELLO/CAPS handshake client with no request pipelining
//! - `Ether` send/receive with smart JSON-vs-binary codec selection
//! - Codec usage metrics for detecting JSON overuse on large payloads

pub mod client;
pub mod connection;
pub mod error;

pub use client::{Client, CodecMetrics};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
