//! Worker cycle: claim → fetch → wait → classify → deliver → settle
//!
//! A worker pulls claimed units from the pool queue, resolves a fetch
//! connection for the unit's broker, dispatches the fetch, waits on the
//! multiplexed connection channels bounded by the fetch timeout, delivers
//! accepted messages downstream, and settles the unit exactly once.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use super::supervisor::ConsumerStats;
use super::Downstream;
use crate::kafka::{read_fetch, FetchConn, FetchEvent, ProducerRegistry};
use crate::logging::Timer;
use crate::models::{ConsumedMessage, FetchSummary, WorkOutcome, WorkStatus, WorkUnit};
use crate::queue::{ClaimedUnit, UnitQueue};
use crate::Result;

/// How many reconnect sentinels one fetch wait tolerates before giving up
const RECONNECT_REWAIT_LIMIT: u32 = 3;

/// What a single fetch attempt produced
enum FetchCycle {
    /// The wait classified to a final status and message list
    Done(WorkStatus, Vec<ConsumedMessage>),

    /// The connection is unusable; drop it so the next unit reconnects
    Poisoned,
}

/// A single consumer worker
pub struct Worker {
    id: usize,
    queue: Arc<dyn UnitQueue>,
    downstream: Arc<dyn Downstream>,
    pool_rx: Arc<Mutex<mpsc::Receiver<ClaimedUnit>>>,
    registry: ProducerRegistry,
    fetch_timeout: Duration,
    stats: Arc<ConsumerStats>,
}

impl Worker {
    /// Create a worker with a fresh connection registry
    pub fn new(
        id: usize,
        queue: Arc<dyn UnitQueue>,
        downstream: Arc<dyn Downstream>,
        pool_rx: Arc<Mutex<mpsc::Receiver<ClaimedUnit>>>,
        fetch_timeout: Duration,
        reconnect_max_attempts: u32,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            id,
            queue,
            downstream,
            pool_rx,
            registry: ProducerRegistry::new(reconnect_max_attempts),
            fetch_timeout,
            stats,
        }
    }

    /// Process units until the pool queue closes
    ///
    /// Returns an error only when the cycle itself breaks (a settle that
    /// could not be issued); the supervisor restarts the worker then. A unit
    /// whose settle was lost stays on the working list for the external
    /// reconciler.
    pub async fn run(mut self) -> Result<()> {
        debug!(worker = self.id, "Worker started");

        loop {
            let claimed = {
                let mut rx = self.pool_rx.lock().await;
                rx.recv().await
            };
            let Some(claimed) = claimed else {
                break;
            };

            if let Err(e) = self.process_unit(&claimed).await {
                error!(
                    worker = self.id,
                    error = %e,
                    topic = %claimed.unit.topic,
                    partition = claimed.unit.partition,
                    "Worker cycle failed"
                );
                self.registry.close_all();
                return Err(e);
            }
        }

        self.registry.close_all();
        debug!(worker = self.id, "Worker stopped");
        Ok(())
    }

    /// Run one full cycle for a claimed unit and settle it exactly once
    async fn process_unit(&mut self, claimed: &ClaimedUnit) -> Result<()> {
        let unit = &claimed.unit;
        let timer = Timer::start("work_unit");

        let (mut status, messages) = self.fetch_unit(unit).await;

        if status.is_ok() && !messages.is_empty() {
            if let Err(e) = self.downstream.deliver(&messages).await {
                // Nothing reached the downstream, so the unit must not
                // advertise progress.
                warn!(
                    worker = self.id,
                    error = %e,
                    topic = %unit.topic,
                    partition = unit.partition,
                    "Downstream delivery failed"
                );
                status = WorkStatus::Fail;
            }
        }

        let outcome = match status {
            WorkStatus::Ok => {
                let summary = messages
                    .iter()
                    .map(|m| m.offset)
                    .max()
                    .map(|offset_read| FetchSummary { offset_read });
                WorkOutcome::ok(unit.clone(), summary)
            }
            WorkStatus::Fail => WorkOutcome::fail(unit.clone()),
        };

        self.queue.settle(claimed, &outcome).await?;

        match outcome.status {
            WorkStatus::Ok => self.stats.units_ok.fetch_add(1, Ordering::Relaxed),
            WorkStatus::Fail => self.stats.units_failed.fetch_add(1, Ordering::Relaxed),
        };

        debug!(
            worker = self.id,
            topic = %unit.topic,
            partition = unit.partition,
            offset = unit.offset,
            status = ?outcome.status,
            messages = messages.len(),
            "Work unit settled"
        );
        timer.stop();

        Ok(())
    }

    /// Resolve the broker connection and run the fetch wait
    async fn fetch_unit(&mut self, unit: &WorkUnit) -> (WorkStatus, Vec<ConsumedMessage>) {
        let cycle = match self.registry.get_or_create(&unit.producer).await {
            Ok(conn) => run_fetch_cycle(conn, unit, self.fetch_timeout).await,
            Err(e) => {
                // The next unit targeting this broker retries creation.
                warn!(
                    worker = self.id,
                    broker = %unit.producer,
                    error = %e,
                    "Producer connection failed"
                );
                return (WorkStatus::Fail, Vec::new());
            }
        };

        match cycle {
            FetchCycle::Done(status, messages) => (status, messages),
            FetchCycle::Poisoned => {
                self.registry.remove(&unit.producer);
                (WorkStatus::Fail, Vec::new())
            }
        }
    }
}

/// Dispatch one fetch and classify what comes back within the deadline
async fn run_fetch_cycle(
    conn: &mut FetchConn,
    unit: &WorkUnit,
    fetch_timeout: Duration,
) -> FetchCycle {
    // Events from an abandoned earlier request must not answer this one.
    conn.drain_pending();

    if let Err(e) = conn.send_fetch(&unit.topic, unit.partition, unit.offset).await {
        warn!(broker = %unit.producer, error = %e, "Fetch dispatch failed");
        return FetchCycle::Poisoned;
    }

    let deadline = Instant::now() + fetch_timeout;
    let mut reconnects = 0u32;

    loop {
        tokio::select! {
            event = conn.read_rx.recv() => match event {
                Some(FetchEvent::Payload(frame)) => {
                    return match read_fetch(unit, &frame) {
                        Ok(parse) => {
                            for fetch_error in &parse.errors {
                                warn!(error = %fetch_error, "Fetch error in response");
                            }
                            FetchCycle::Done(WorkStatus::Ok, parse.messages)
                        }
                        Err(e) => {
                            warn!(error = %e, "Unreadable fetch response");
                            FetchCycle::Done(WorkStatus::Fail, Vec::new())
                        }
                    };
                }
                Some(FetchEvent::Reconnected) => {
                    // Keep waiting against the same deadline; the request is
                    // not resent.
                    reconnects += 1;
                    if reconnects > RECONNECT_REWAIT_LIMIT {
                        warn!(broker = %unit.producer, "Too many reconnects during one fetch");
                        return FetchCycle::Done(WorkStatus::Fail, Vec::new());
                    }
                }
                Some(FetchEvent::Poison) | None => return FetchCycle::Poisoned,
            },
            transport_error = conn.error_rx.recv() => {
                if let Some(e) = transport_error {
                    warn!(broker = %unit.producer, error = %e, "Transport error during fetch");
                }
                return FetchCycle::Done(WorkStatus::Fail, Vec::new());
            }
            _ = sleep_until(deadline) => {
                debug!(
                    topic = %unit.topic,
                    partition = unit.partition,
                    offset = unit.offset,
                    "Fetch timed out"
                );
                return FetchCycle::Done(WorkStatus::Fail, Vec::new());
            }
        }
    }
}
