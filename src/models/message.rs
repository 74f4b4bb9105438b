//! Messages and fetch-level errors produced by parsing fetch responses

use serde::{Deserialize, Serialize};

/// A single Kafka record accepted from a fetch response
///
/// Messages are transient: they are produced by the fetch reader and
/// forwarded to the downstream channel as part of a per-unit batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMessage {
    /// Topic the record belongs to
    pub topic: String,

    /// Partition the record belongs to
    pub partition: i32,

    /// Record offset within the partition
    pub offset: i64,

    /// Record value bytes (empty for null-value records)
    pub payload: Vec<u8>,
}

/// A broker- or decode-level error observed while reading one fetch response
///
/// Fetch errors accumulate alongside accepted messages; they never abort the
/// work unit by themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The broker reported a partition-level error code
    Broker {
        topic: String,
        partition: i32,
        code: i16,
    },

    /// A record batch could not be decoded
    Decode {
        topic: String,
        partition: i32,
        detail: String,
    },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Broker {
                topic,
                partition,
                code,
            } => write!(
                f,
                "broker error code {} for {}/{}",
                code, topic, partition
            ),
            FetchError::Decode {
                topic,
                partition,
                detail,
            } => write!(f, "decode error for {}/{}: {}", topic, partition, detail),
        }
    }
}
