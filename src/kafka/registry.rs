//! Lazy per-broker connection registry
//!
//! Each worker owns its own registry, so no locking is needed and a broker
//! has at most one live connection per worker. Connections are created on
//! first use and survive individual work unit failures; they are only closed
//! when the owning worker stops.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

use super::FetchConn;
use crate::error::Result;
use crate::models::BrokerEndpoint;

/// Registry of fetch connections keyed by broker endpoint
pub struct ProducerRegistry {
    conns: HashMap<BrokerEndpoint, FetchConn>,
    reconnect_max_attempts: u32,
}

impl ProducerRegistry {
    /// Create an empty registry
    pub fn new(reconnect_max_attempts: u32) -> Self {
        Self {
            conns: HashMap::new(),
            reconnect_max_attempts,
        }
    }

    /// Return the connection for a broker, creating it on first use
    pub async fn get_or_create(&mut self, endpoint: &BrokerEndpoint) -> Result<&mut FetchConn> {
        match self.conns.entry(endpoint.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let conn = FetchConn::connect(endpoint, self.reconnect_max_attempts).await?;
                Ok(entry.insert(conn))
            }
        }
    }

    /// Drop a single connection, e.g. after it was poisoned
    pub fn remove(&mut self, endpoint: &BrokerEndpoint) {
        if self.conns.remove(endpoint).is_some() {
            debug!(broker = %endpoint, "Removed fetch connection");
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Whether the registry holds no connections
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Close every connection; used when the owning worker stops or restarts
    pub fn close_all(&mut self) {
        let count = self.conns.len();
        self.conns.clear();
        if count > 0 {
            debug!(connections = count, "Closed fetch connections");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_starts_empty() {
        let registry = ProducerRegistry::new(3);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_broker_leaves_registry_empty() {
        let mut registry = ProducerRegistry::new(1);
        let endpoint = BrokerEndpoint::new("127.0.0.1", 1);

        assert!(registry.get_or_create(&endpoint).await.is_err());
        assert!(registry.is_empty());
    }
}
