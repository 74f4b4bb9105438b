//! Redis-backed reliable work queue
//!
//! This module implements the three-list queue protocol that coordinates a
//! fleet of consumer processes:
//!
//! - `work` holds ready units published by external planners
//! - `working` holds units that are claimed but not yet settled
//! - `complete` holds immutable settled outcomes
//!
//! A claim atomically moves a unit from `work` to `working`, so a unit a
//! worker crashed on is always recoverable from `working`. Settling pushes
//! the outcome onto `complete` and removes the unit from `working` in a
//! single transaction.
//!
//! Queue payloads are versioned JSON objects (`"v": 1`); every producer and
//! consumer sharing a queue must agree on this encoding.

pub mod redis_queue;

pub use redis_queue::{QueueDepths, RedisWorkQueue};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{WorkOutcome, WorkUnit};

/// Version tag carried by every queue payload
pub const WIRE_VERSION: u8 = 1;

/// How long a single blocking claim waits, in seconds
pub const CLAIM_BLOCK_SECS: u64 = 1;

/// A work unit claimed from the queue, together with the verbatim list
/// payload it was claimed as
///
/// The raw payload is what `LREM` removes at settle time, so the exact list
/// element that was claimed is the one that disappears from `working` —
/// independent of JSON field ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedUnit {
    /// The decoded work unit
    pub unit: WorkUnit,

    /// The payload exactly as it appeared on the list
    pub raw: String,
}

/// Operations of the reliable work queue
#[async_trait]
pub trait UnitQueue: Send + Sync {
    /// Block up to [`CLAIM_BLOCK_SECS`] for a unit, moving it from `work`
    /// to `working`. Returns `None` when the wait timed out.
    async fn claim(&self) -> Result<Option<ClaimedUnit>>;

    /// Settle a claimed unit: push the outcome onto `complete` and remove
    /// the claimed payload from `working`, atomically.
    async fn settle(&self, claimed: &ClaimedUnit, outcome: &WorkOutcome) -> Result<()>;

    /// Validate a unit and push it onto `work`. Invalid units are rejected
    /// synchronously and never reach the queue.
    async fn publish(&self, unit: &WorkUnit) -> Result<()>;

    /// Check queue connectivity
    async fn health_check(&self) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope<T> {
    v: u8,
    #[serde(flatten)]
    body: T,
}

/// Encode a work unit as a queue payload
pub fn encode_unit(unit: &WorkUnit) -> Result<String> {
    let envelope = WireEnvelope {
        v: WIRE_VERSION,
        body: unit,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a queue payload into a work unit
pub fn decode_unit(raw: &str) -> Result<WorkUnit> {
    let envelope: WireEnvelope<WorkUnit> = serde_json::from_str(raw)?;
    if envelope.v != WIRE_VERSION {
        return Err(Error::queue(format!(
            "Unsupported work unit encoding version {}",
            envelope.v
        )));
    }
    Ok(envelope.body)
}

/// Encode a settled outcome as a queue payload
pub fn encode_outcome(outcome: &WorkOutcome) -> Result<String> {
    let envelope = WireEnvelope {
        v: WIRE_VERSION,
        body: outcome,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a queue payload into a settled outcome
pub fn decode_outcome(raw: &str) -> Result<WorkOutcome> {
    let envelope: WireEnvelope<WorkOutcome> = serde_json::from_str(raw)?;
    if envelope.v != WIRE_VERSION {
        return Err(Error::queue(format!(
            "Unsupported outcome encoding version {}",
            envelope.v
        )));
    }
    Ok(envelope.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BrokerEndpoint, FetchSummary};

    fn sample_unit() -> WorkUnit {
        WorkUnit {
            producer: BrokerEndpoint::new("broker1", 9092),
            topic: "events".to_string(),
            partition: 2,
            offset: 50,
            len: 25,
        }
    }

    #[test]
    fn test_unit_codec_round_trip() {
        let unit = sample_unit();
        let raw = encode_unit(&unit).unwrap();
        let back = decode_unit(&raw).unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn test_unit_payload_is_versioned() {
        let raw = encode_unit(&sample_unit()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["topic"], "events");
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut value: serde_json::Value =
            serde_json::from_str(&encode_unit(&sample_unit()).unwrap()).unwrap();
        value["v"] = serde_json::json!(99);
        assert!(decode_unit(&value.to_string()).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_unit("not json").is_err());
        assert!(decode_unit("{}").is_err());
    }

    #[test]
    fn test_outcome_codec_round_trip() {
        let outcome =
            WorkOutcome::ok(sample_unit(), Some(FetchSummary { offset_read: 74 }));
        let raw = encode_outcome(&outcome).unwrap();
        let back = decode_outcome(&raw).unwrap();
        assert_eq!(back, outcome);
    }
}
