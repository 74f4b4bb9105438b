//! Kafka fetch integration for FetchForge
//!
//! This module provides:
//! - Framed wire codec for fetch requests and responses
//! - Per-broker fetch connections with a dedicated I/O task and bounded
//!   reconnect handling
//! - A lazy per-endpoint connection registry
//! - The fetch response reader that filters records to a work unit's window

pub mod conn;
pub mod reader;
pub mod registry;
pub mod wire;

pub use conn::FetchConn;
pub use reader::{read_fetch, FetchParse};
pub use registry::ProducerRegistry;

use bytes::Bytes;

/// An event delivered on a fetch connection's read channel
///
/// The source protocol mixes response payloads and connection-state
/// sentinels on one channel; here the sentinels are variants of a single
/// tagged type so workers classify by variant.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// A complete response frame (header + body, length prefix stripped)
    Payload(Bytes),

    /// The connection dropped and was re-established; the in-flight request
    /// was lost and will not be answered
    Reconnected,

    /// The connection is gone for good; no further events will arrive
    Poison,
}
