//! Redis implementation of the work queue protocol

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use super::{decode_unit, encode_outcome, encode_unit, ClaimedUnit, UnitQueue, CLAIM_BLOCK_SECS};
use crate::config::{QueueConfig, RedisConfig};
use crate::error::{Error, Result};
use crate::models::{WorkOutcome, WorkUnit};

/// Work queue backed by three Redis lists
///
/// Claims run on a dedicated connection: `BRPOPLPUSH` blocks the connection
/// it is issued on, and must not stall settles and publishes that share the
/// multiplexed command connection.
pub struct RedisWorkQueue {
    /// Shared connection for settle / publish / health commands
    conn: ConnectionManager,

    /// Dedicated connection for blocking claims
    claim_conn: Mutex<ConnectionManager>,

    /// Queue list names
    queues: QueueConfig,

    /// Caps concurrently active commands on the shared connection
    limiter: Arc<Semaphore>,
}

/// Current length of each queue list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepths {
    /// Ready units
    pub work: i64,
    /// Claimed but unsettled units
    pub working: i64,
    /// Settled outcomes
    pub complete: i64,
}

impl RedisWorkQueue {
    /// Connect to Redis and set up both queue connections
    pub async fn connect(redis: &RedisConfig, queues: QueueConfig) -> Result<Self> {
        let client = redis::Client::open(redis.url())
            .map_err(|e| Error::queue(format!("Invalid Redis URL: {}", e)))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(redis.timeout())
            .set_response_timeout(redis.timeout());

        let conn = ConnectionManager::new_with_config(client.clone(), manager_config.clone())
            .await
            .map_err(|e| Error::queue(format!("Failed to connect to Redis: {}", e)))?;

        let claim_conn = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| Error::queue(format!("Failed to open claim connection: {}", e)))?;

        debug!(url = %redis.masked_url(), "Connected to Redis");

        Ok(Self {
            conn,
            claim_conn: Mutex::new(claim_conn),
            queues,
            limiter: Arc::new(Semaphore::new(redis.max_active)),
        })
    }

    /// Read the current depth of each queue list
    pub async fn depths(&self) -> Result<QueueDepths> {
        let _permit = self.acquire_permit().await?;
        let mut conn = self.conn.clone();

        let (work, working, complete): (i64, i64, i64) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.queues.work_queue)
            .cmd("LLEN")
            .arg(&self.queues.working_queue)
            .cmd("LLEN")
            .arg(&self.queues.complete_queue)
            .query_async(&mut conn)
            .await?;

        Ok(QueueDepths {
            work,
            working,
            complete,
        })
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)
    }
}

#[async_trait]
impl UnitQueue for RedisWorkQueue {
    async fn claim(&self) -> Result<Option<ClaimedUnit>> {
        let mut guard = self.claim_conn.lock().await;

        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queues.work_queue)
            .arg(&self.queues.working_queue)
            .arg(CLAIM_BLOCK_SECS)
            .query_async(&mut *guard)
            .await?;

        drop(guard);

        match raw {
            None => Ok(None),
            Some(raw) => {
                // A payload that cannot be decoded stays on the working list
                // for the external reconciler.
                let unit = decode_unit(&raw).map_err(|e| {
                    warn!(error = %e, "Claimed payload could not be decoded");
                    e
                })?;

                debug!(
                    topic = %unit.topic,
                    partition = unit.partition,
                    offset = unit.offset,
                    "Claimed work unit"
                );

                Ok(Some(ClaimedUnit { unit, raw }))
            }
        }
    }

    async fn settle(&self, claimed: &ClaimedUnit, outcome: &WorkOutcome) -> Result<()> {
        let payload = encode_outcome(outcome)?;

        let _permit = self.acquire_permit().await?;
        let mut conn = self.conn.clone();

        // LPUSH onto complete and LREM from working must land together; if
        // the transaction is lost the unit remains on working and no outcome
        // is recorded.
        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&self.queues.complete_queue)
            .arg(&payload)
            .ignore()
            .cmd("LREM")
            .arg(&self.queues.working_queue)
            .arg(-1)
            .arg(&claimed.raw)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(
            topic = %outcome.unit.topic,
            partition = outcome.unit.partition,
            offset = outcome.unit.offset,
            status = ?outcome.status,
            "Settled work unit"
        );

        Ok(())
    }

    async fn publish(&self, unit: &WorkUnit) -> Result<()> {
        unit.validate()?;
        let payload = encode_unit(unit)?;

        let _permit = self.acquire_permit().await?;
        let mut conn = self.conn.clone();

        let _: i64 = redis::cmd("LPUSH")
            .arg(&self.queues.work_queue)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        let mut conn = self.conn.clone();

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(Error::queue(format!("Unexpected PING reply: {}", pong)));
        }
        Ok(())
    }
}

// These tests require a running Redis instance.
// Run with: docker run -d -p 6379:6379 redis:7
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BrokerEndpoint, FetchSummary};

    fn test_queue_config(suffix: &str) -> QueueConfig {
        QueueConfig {
            work_queue: format!("test:work:{}", suffix),
            working_queue: format!("test:working:{}", suffix),
            complete_queue: format!("test:complete:{}", suffix),
        }
    }

    fn test_redis_config() -> RedisConfig {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            timeout_ms: 4000,
            max_active: 20,
        }
    }

    fn sample_unit() -> WorkUnit {
        WorkUnit {
            producer: BrokerEndpoint::new("broker1", 9092),
            topic: "events".to_string(),
            partition: 0,
            offset: 0,
            len: 10,
        }
    }

    async fn flush_lists(queue: &RedisWorkQueue) {
        let mut conn = queue.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(&queue.queues.work_queue)
            .arg(&queue.queues.working_queue)
            .arg(&queue.queues.complete_queue)
            .query_async(&mut conn)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_publish_claim_settle_cycle() {
        let queue = RedisWorkQueue::connect(&test_redis_config(), test_queue_config("cycle"))
            .await
            .unwrap();
        flush_lists(&queue).await;

        queue.publish(&sample_unit()).await.unwrap();

        let claimed = queue.claim().await.unwrap().expect("unit should be ready");
        assert_eq!(claimed.unit, sample_unit());

        // Claimed unit is parked on the working list
        let depths = queue.depths().await.unwrap();
        assert_eq!(depths.work, 0);
        assert_eq!(depths.working, 1);

        let outcome =
            WorkOutcome::ok(claimed.unit.clone(), Some(FetchSummary { offset_read: 9 }));
        queue.settle(&claimed, &outcome).await.unwrap();

        let depths = queue.depths().await.unwrap();
        assert_eq!(depths.working, 0);
        assert_eq!(depths.complete, 1);

        flush_lists(&queue).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_claim_times_out_on_empty_queue() {
        let queue = RedisWorkQueue::connect(&test_redis_config(), test_queue_config("empty"))
            .await
            .unwrap();
        flush_lists(&queue).await;

        let claimed = queue.claim().await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_double_settle_leaves_no_working_duplicates() {
        let queue = RedisWorkQueue::connect(&test_redis_config(), test_queue_config("double"))
            .await
            .unwrap();
        flush_lists(&queue).await;

        queue.publish(&sample_unit()).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();

        let outcome = WorkOutcome::fail(claimed.unit.clone());
        queue.settle(&claimed, &outcome).await.unwrap();
        // At-least-once: the second settle duplicates the complete entry but
        // the second LREM is a no-op.
        queue.settle(&claimed, &outcome).await.unwrap();

        let depths = queue.depths().await.unwrap();
        assert_eq!(depths.working, 0);
        assert_eq!(depths.complete, 2);

        flush_lists(&queue).await;
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_publish_rejects_invalid_unit() {
        let queue = RedisWorkQueue::connect(&test_redis_config(), test_queue_config("invalid"))
            .await
            .unwrap();
        flush_lists(&queue).await;

        let mut unit = sample_unit();
        unit.topic = String::new();
        assert!(queue.publish(&unit).await.is_err());

        let depths = queue.depths().await.unwrap();
        assert_eq!(depths.work, 0);
    }
}
