//! Consumer engine: worker cycle and supervision
//!
//! This module ties the work queue and the fetch layer together:
//! - A dispatcher task bridges Redis claims into a bounded pool queue
//! - N workers pull claimed units, run the fetch cycle, and settle outcomes
//! - The supervisor restarts failed workers and coordinates shutdown
//!
//! Accepted message batches leave the engine through the [`Downstream`]
//! trait; the default implementation sends into a bounded channel whose
//! backpressure propagates through the workers to the dispatcher and
//! ultimately stops the Redis work list from draining.

pub mod supervisor;
pub mod worker;

pub use supervisor::{start, ConsumerHandle, ConsumerStats};
pub use worker::Worker;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::ConsumedMessage;

/// Destination for accepted message batches
///
/// Implementations must treat delivery as fallible: a delivery error fails
/// the work unit but never the worker.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Deliver one batch of accepted messages for one work unit
    async fn deliver(&self, messages: &[ConsumedMessage]) -> Result<()>;
}

/// Downstream that forwards batches into a bounded channel
///
/// The send blocks when the channel is full; that is the backpressure the
/// rest of the pipeline is built around.
pub struct ChannelDownstream {
    tx: mpsc::Sender<Vec<ConsumedMessage>>,
}

impl ChannelDownstream {
    /// Wrap a channel sender
    pub fn new(tx: mpsc::Sender<Vec<ConsumedMessage>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Downstream for ChannelDownstream {
    async fn deliver(&self, messages: &[ConsumedMessage]) -> Result<()> {
        self.tx
            .send(messages.to_vec())
            .await
            .map_err(|_| Error::internal("Downstream message channel is closed"))
    }
}
