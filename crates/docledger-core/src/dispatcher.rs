//! Background outbox dispatcher.
//!
//! A single worker thread drains due pending outbox rows each tick and hands
//! them to the configured publisher. Delivery is at-least-once: publish and
//! mark-dispatched are separate steps, so a crash between them re-publishes
//! the event on restart and consumers must dedupe by `event_id`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::error::Error;
use crate::event::{EventEnvelope, OutboxEvent};
use crate::ports::{EventPublisher, OutboxRepository};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_BATCH_SIZE: usize = 50;
const MAX_RETRY: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Snapshot of the dispatcher's monotonic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherMetrics {
    pub dispatch_success_total: u64,
    pub dispatch_failure_total: u64,
    pub dispatch_dead_total: u64,
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct OutboxDispatcher {
    repo: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    batch_size: usize,
    max_retry: u32,
    worker: Mutex<Option<Worker>>,
    success_total: AtomicU64,
    failure_total: AtomicU64,
    dead_total: AtomicU64,
}

impl OutboxDispatcher {
    /// A zero interval falls back to 2 s, a zero batch size to 50.
    #[must_use]
    pub fn new(
        repo: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            repo,
            publisher,
            interval: if interval.is_zero() { DEFAULT_INTERVAL } else { interval },
            batch_size: if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size },
            max_retry: MAX_RETRY,
            worker: Mutex::new(None),
            success_total: AtomicU64::new(0),
            failure_total: AtomicU64::new(0),
            dead_total: AtomicU64::new(0),
        }
    }

    /// Spawn the worker thread. Calling `start` while a worker is already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let dispatcher = Arc::clone(self);
        let handle = thread::spawn(move || dispatcher.run(&stop_rx));
        *worker = Some(Worker { stop: stop_tx, handle });
    }

    /// Signal the worker to stop and wait for it to exit. Safe to call more
    /// than once.
    pub fn close(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            drop(worker.stop);
            if worker.handle.join().is_err() {
                tracing::error!("outbox dispatcher worker panicked");
            }
        }
    }

    #[must_use]
    pub fn metrics(&self) -> DispatcherMetrics {
        DispatcherMetrics {
            dispatch_success_total: self.success_total.load(Ordering::Relaxed),
            dispatch_failure_total: self.failure_total.load(Ordering::Relaxed),
            dispatch_dead_total: self.dead_total.load(Ordering::Relaxed),
        }
    }

    fn run(&self, stop: &Receiver<()>) {
        loop {
            if let Err(err) = self.dispatch_batch() {
                tracing::warn!(error = %err, "outbox dispatch batch failed");
            }
            match stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// One tick: fetch due pending events and attempt each once. A single
    /// event's failure never aborts the batch; a repository mark failure
    /// does, and is retried on the next tick.
    fn dispatch_batch(&self) -> Result<(), Error> {
        let events = self.repo.fetch_pending(self.batch_size)?;

        for event in events {
            let envelope: EventEnvelope = match serde_json::from_str(&event.payload_json) {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.mark_failure(&event, &format!("decode payload: {err}"))?;
                    self.failure_total.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if let Err(err) = self.publisher.publish(&event.topic, &envelope) {
                self.mark_failure(&event, &err.to_string())?;
                self.failure_total.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.repo.mark_dispatched(event.id)?;
            self.success_total.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }

    fn mark_failure(&self, event: &OutboxEvent, message: &str) -> Result<(), Error> {
        let attempts = event.attempts + 1;
        if attempts >= self.max_retry {
            self.repo.mark_dead(event.id, attempts, message)?;
            self.dead_total.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let next_attempt_at = OffsetDateTime::now_utc() + backoff(attempts);
        self.repo.mark_failed(event.id, attempts, next_attempt_at, message)
    }
}

/// Retry backoff: 1 s for the first attempt, then `attempts²` seconds capped
/// at five minutes.
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::from_secs(1);
    }
    Duration::from_secs(u64::from(attempt) * u64::from(attempt)).min(MAX_BACKOFF)
}
