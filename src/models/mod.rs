//! Domain models for FetchForge
//!
//! This module contains the core data types that flow through the system:
//! work units claimed from the queue, outcomes settled back into it, and
//! the messages extracted from Kafka fetch responses.

pub mod message;
pub mod unit;

pub use message::{ConsumedMessage, FetchError};
pub use unit::{BrokerEndpoint, FetchSummary, WorkOutcome, WorkStatus, WorkUnit};
