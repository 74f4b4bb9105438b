//! Consumer supervisor
//!
//! Owns the dispatcher task and the worker pool. The dispatcher bridges
//! blocking Redis claims into a bounded pool queue; each worker slot
//! restarts its worker on failure or panic. Shutdown drains the pool within
//! a grace period, then force-stops whatever is left, dispatcher last.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::worker::Worker;
use super::{ChannelDownstream, Downstream};
use crate::config::Config;
use crate::models::ConsumedMessage;
use crate::queue::{ClaimedUnit, UnitQueue};
use crate::Result;

/// Pause after a failed claim before trying again
const CLAIM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Pause before a restarted worker resumes pulling from the pool queue
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// How long shutdown waits for the dispatcher after the pool is stopped
const DISPATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Counters exposed by a running consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Units settled with status ok
    pub units_ok: AtomicU64,

    /// Units settled with status fail
    pub units_failed: AtomicU64,

    /// Times a worker was restarted after a failure or panic
    pub worker_restarts: AtomicU64,

    /// Whether the consumer is accepting work
    pub running: AtomicBool,
}

impl ConsumerStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self::default()
    }
}

/// Handle to a running consumer
pub struct ConsumerHandle {
    messages: Option<mpsc::Receiver<Vec<ConsumedMessage>>>,
    shutdown: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ConsumerStats>,
    grace: Duration,
}

impl ConsumerHandle {
    /// Take the downstream message receiver; callers own draining it
    pub fn take_messages(&mut self) -> Option<mpsc::Receiver<Vec<ConsumedMessage>>> {
        self.messages.take()
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the consumer: grace period for the worker pool, then force
    pub async fn shutdown(mut self) {
        info!("Consumer shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
        self.stats.running.store(false, Ordering::Relaxed);

        // Phase 1: the dispatcher observes the flag within one claim
        // interval and closes the pool queue; workers drain what is left.
        let drained = tokio::time::timeout(
            self.grace,
            futures::future::join_all(self.workers.iter_mut()),
        )
        .await;
        if drained.is_err() {
            warn!("Worker pool did not stop within grace period, aborting");
            for worker in &self.workers {
                worker.abort();
            }
        }

        // Phase 2: force-stop the dispatcher.
        if tokio::time::timeout(DISPATCHER_STOP_TIMEOUT, &mut self.dispatcher)
            .await
            .is_err()
        {
            warn!("Dispatcher did not stop, aborting");
            self.dispatcher.abort();
        }

        info!("Consumer shutdown complete");
    }
}

/// Start the dispatcher and worker pool against a work queue
pub async fn start(config: Arc<Config>, queue: Arc<dyn UnitQueue>) -> Result<ConsumerHandle> {
    let (msg_tx, msg_rx) = mpsc::channel(config.consumer.message_channel_capacity);
    let (pool_tx, pool_rx) = mpsc::channel(config.consumer.queue_limit);
    let pool_rx = Arc::new(Mutex::new(pool_rx));

    let shutdown = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(ConsumerStats::new());
    stats.running.store(true, Ordering::Relaxed);

    let downstream: Arc<dyn Downstream> = Arc::new(ChannelDownstream::new(msg_tx));

    let dispatcher = tokio::spawn(dispatch_loop(
        Arc::clone(&queue),
        pool_tx,
        Arc::clone(&shutdown),
    ));

    let workers = (0..config.consumer.consumer_threads)
        .map(|id| {
            tokio::spawn(worker_slot(
                id,
                Arc::clone(&config),
                Arc::clone(&queue),
                Arc::clone(&pool_rx),
                Arc::clone(&downstream),
                Arc::clone(&shutdown),
                Arc::clone(&stats),
            ))
        })
        .collect();

    info!(
        workers = config.consumer.consumer_threads,
        queue_limit = config.consumer.queue_limit,
        "Consumer started"
    );

    Ok(ConsumerHandle {
        messages: Some(msg_rx),
        shutdown,
        dispatcher,
        workers,
        stats,
        grace: config.consumer.shutdown_timeout(),
    })
}

/// Dispatcher loop: claim one unit, hand it to the pool, repeat
async fn dispatch_loop(
    queue: Arc<dyn UnitQueue>,
    pool_tx: mpsc::Sender<ClaimedUnit>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Dispatcher started");

    while !shutdown.load(Ordering::Relaxed) {
        match queue.claim().await {
            Ok(Some(claimed)) => {
                // Blocks when the pool is full; downstream backpressure
                // reaches Redis through this send.
                if pool_tx.send(claimed).await.is_err() {
                    break;
                }
            }
            // The blocking claim timed out; loop around and re-check the
            // shutdown flag.
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Work queue claim failed");
                tokio::time::sleep(CLAIM_RETRY_DELAY).await;
            }
        }
    }

    debug!("Dispatcher stopped");
}

/// One worker slot: run the worker, restart it when it fails or panics
async fn worker_slot(
    id: usize,
    config: Arc<Config>,
    queue: Arc<dyn UnitQueue>,
    pool_rx: Arc<Mutex<mpsc::Receiver<ClaimedUnit>>>,
    downstream: Arc<dyn Downstream>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ConsumerStats>,
) {
    loop {
        // Every (re)start gets a fresh connection registry; the queue handle
        // and downstream sender are preserved across restarts.
        let worker = Worker::new(
            id,
            Arc::clone(&queue),
            Arc::clone(&downstream),
            Arc::clone(&pool_rx),
            config.consumer.fetch_timeout(),
            config.consumer.reconnect_max_attempts,
            Arc::clone(&stats),
        );

        let run = tokio::spawn(worker.run());
        match run.await {
            // The pool queue closed; clean exit.
            Ok(Ok(())) => break,
            Ok(Err(e)) => {
                error!(worker = id, error = %e, "Worker failed, restarting");
            }
            Err(join_error) => {
                if join_error.is_panic() {
                    error!(worker = id, "Worker panicked, restarting");
                } else {
                    break;
                }
            }
        }

        stats.worker_restarts.fetch_add(1, Ordering::Relaxed);
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(RESTART_DELAY).await;
    }

    debug!(worker = id, "Worker slot finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsumerConfig, QueueConfig, RedisConfig, ServerConfig};
    use crate::test_utils::MockUnitQueue;

    fn test_config(workers: usize) -> Arc<Config> {
        Arc::new(Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                log_level: "info".to_string(),
                environment: "test".to_string(),
                request_timeout_secs: 30,
            },
            redis: RedisConfig {
                host: "localhost".to_string(),
                port: 6379,
                password: None,
                timeout_ms: 4000,
                max_active: 20,
            },
            queues: QueueConfig {
                work_queue: "work".to_string(),
                working_queue: "working".to_string(),
                complete_queue: "complete".to_string(),
            },
            consumer: ConsumerConfig {
                fetch_timeout_ms: 500,
                consumer_threads: workers,
                queue_limit: 10,
                message_channel_capacity: 100,
                reconnect_max_attempts: 1,
                shutdown_timeout_ms: 2000,
            },
        })
    }

    #[tokio::test]
    async fn test_consumer_starts_and_shuts_down_cleanly() {
        let queue = Arc::new(MockUnitQueue::new());
        let handle = start(test_config(2), queue).await.unwrap();

        assert!(handle.stats().running.load(Ordering::Relaxed));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_take_messages_is_one_shot() {
        let queue = Arc::new(MockUnitQueue::new());
        let mut handle = start(test_config(1), queue).await.unwrap();

        assert!(handle.take_messages().is_some());
        assert!(handle.take_messages().is_none());

        handle.shutdown().await;
    }
}
