//! Work unit and outcome types
//!
//! A work unit is a planner-produced request to fetch up to `len` messages
//! from a (topic, partition) starting at `offset` from a given broker. Units
//! travel through the Redis work queue and are settled exactly once with a
//! [`WorkOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single Kafka broker address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    /// Broker hostname or IP
    pub host: String,

    /// Broker port
    pub port: u16,
}

impl BrokerEndpoint {
    /// Create a new broker endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the endpoint as a `host:port` address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A request to fetch a window of messages from one partition of one broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Broker to fetch from
    pub producer: BrokerEndpoint,

    /// Topic to fetch
    pub topic: String,

    /// Partition to fetch
    pub partition: i32,

    /// First offset of the window
    pub offset: i64,

    /// Window length in messages
    pub len: i64,
}

impl WorkUnit {
    /// Validate that the unit carries everything a worker needs
    ///
    /// Publishers must reject invalid units synchronously, before they ever
    /// reach the work queue.
    pub fn validate(&self) -> Result<()> {
        if self.producer.host.is_empty() {
            return Err(Error::validation("Work unit producer host is empty"));
        }
        if self.producer.port == 0 {
            return Err(Error::validation("Work unit producer port is 0"));
        }
        if self.topic.is_empty() {
            return Err(Error::validation("Work unit topic is empty"));
        }
        if self.partition < 0 {
            return Err(Error::validation("Work unit partition is negative"));
        }
        if self.offset < 0 {
            return Err(Error::validation("Work unit offset is negative"));
        }
        if self.len < 0 {
            return Err(Error::validation("Work unit length is negative"));
        }
        Ok(())
    }

    /// Exclusive upper bound of the offset window
    pub fn window_end(&self) -> i64 {
        self.offset.saturating_add(self.len)
    }

    /// Check whether an offset lies inside the unit's window
    pub fn contains_offset(&self, offset: i64) -> bool {
        offset >= self.offset && offset < self.window_end()
    }
}

/// Final status of a settled work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    /// The fetch succeeded (possibly with an empty window)
    Ok,
    /// The fetch failed; the unit may be replanned
    Fail,
}

impl WorkStatus {
    /// Check if the status is ok
    pub fn is_ok(&self) -> bool {
        matches!(self, WorkStatus::Ok)
    }
}

/// Summary of the progress a successful fetch made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSummary {
    /// Highest message offset delivered downstream for this unit
    pub offset_read: i64,
}

/// The settled result of one worker cycle
///
/// An outcome embeds the originating unit so that entries on the complete
/// list are self-describing. Outcomes are written once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOutcome {
    /// The work unit this outcome settles
    #[serde(flatten)]
    pub unit: WorkUnit,

    /// Final status of the attempt
    pub status: WorkStatus,

    /// Progress summary, present only for a successful non-empty fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<FetchSummary>,

    /// When the outcome was settled
    pub settled_at: DateTime<Utc>,
}

impl WorkOutcome {
    /// Create a successful outcome
    pub fn ok(unit: WorkUnit, resp_data: Option<FetchSummary>) -> Self {
        Self {
            unit,
            status: WorkStatus::Ok,
            resp_data,
            settled_at: Utc::now(),
        }
    }

    /// Create a failed outcome
    pub fn fail(unit: WorkUnit) -> Self {
        Self {
            unit,
            status: WorkStatus::Fail,
            resp_data: None,
            settled_at: Utc::now(),
        }
    }
}
