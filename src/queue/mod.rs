//! Delivery queue: ordered, bounded, single-consumer send pipeline.
//!
//! Producers (batch submissions) append [`SendTask`]s from any number of
//! concurrent callers; a single drain loop pops them strictly in FIFO
//! order, executes them against the current driver, and paces itself
//! between sends. At most one task is ever in flight.

pub mod deliver;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::session::SessionManager;
use crate::store::ContentStore;
use crate::types::{ConnectionState, DeliveryOutcome, SendTask};

pub use deliver::deliver;

/// Fixed pause between consecutive sends.
///
/// The chat network enforces informal rate limits; spacing sends keeps the
/// account under them. The exact value is a tunable, not a correctness
/// property, and tests set it to zero.
#[derive(Debug, Clone, Copy)]
pub struct PacingPolicy {
    interval: Duration,
}

impl PacingPolicy {
    /// Pace sends by `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// No pacing at all (tests).
    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    /// The configured inter-send interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep out the pacing interval, if any.
    async fn pause(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Ordered FIFO queue of pending send tasks with a bounded capacity.
pub struct DeliveryQueue {
    tasks: Mutex<VecDeque<SendTask>>,
    capacity: usize,
    notify: Notify,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
        }
    }

    /// Lock the task list, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, VecDeque<SendTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task to the tail. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns the task back when the queue is at capacity; the caller
    /// resolves it with [`DeliveryOutcome::QueueFull`].
    pub fn enqueue(&self, task: SendTask) -> Result<(), SendTask> {
        {
            let mut tasks = self.lock();
            if tasks.len() >= self.capacity {
                warn!(task = %task.id, capacity = self.capacity, "queue full, rejecting task");
                return Err(task);
            }
            debug!(task = %task.id, depth = tasks.len(), "task enqueued");
            tasks.push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Number of queued (not yet executing) tasks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no tasks are queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolve every queued task with a transport error and empty the
    /// queue. Called on hard disconnect so callers never wait on sends
    /// that can no longer happen.
    pub fn flush(&self, reason: &str) {
        let drained: Vec<SendTask> = self.lock().drain(..).collect();
        if drained.is_empty() {
            return;
        }
        warn!(count = drained.len(), reason, "flushing queued tasks");
        for task in drained {
            task.complete(DeliveryOutcome::TransportError(reason.to_owned()));
        }
    }

    /// Pop the head task.
    fn pop(&self) -> Option<SendTask> {
        self.lock().pop_front()
    }

    /// Return a popped-but-unexecuted task to the head, preserving order.
    fn push_front(&self, task: SendTask) {
        self.lock().push_front(task);
    }

    /// Run the drain loop: the single consumer that executes queued tasks
    /// against the session's current driver.
    ///
    /// Parks while the session is not Connected and resumes on `Ready`.
    /// Runs until the gateway aborts it at shutdown.
    pub async fn run_drain(
        self: Arc<Self>,
        session: Arc<SessionManager>,
        store: Arc<dyn ContentStore>,
        pacing: PacingPolicy,
        country_prefix: String,
    ) {
        let mut connected = session.subscribe_connected();
        info!("delivery drain loop started");

        loop {
            // Park until the session is connected.
            while !*connected.borrow_and_update() {
                if connected.changed().await.is_err() {
                    info!("session gone, drain loop stopping");
                    return;
                }
            }

            // Register interest before checking the queue so an enqueue
            // between the check and the await still wakes us.
            let notified = self.notify.notified();
            let Some(task) = self.pop() else {
                tokio::select! {
                    () = notified => {}
                    result = connected.changed() => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
                continue;
            };

            let Some(driver) = session.current_driver() else {
                // A teardown raced the pop. Hard disconnects already
                // flushed the rest of the queue, so resolve this task the
                // same way; softer pauses keep it queued for the next
                // connection.
                if session.status().state == ConnectionState::Disconnected {
                    task.complete(DeliveryOutcome::TransportError("disconnected".to_owned()));
                } else {
                    self.push_front(task);
                }
                continue;
            };

            let task_id = task.id;
            let outcome = deliver(driver.as_ref(), store.as_ref(), &country_prefix, &task).await;
            debug!(task = %task_id, ?outcome, "task executed");
            task.complete(outcome);

            pacing.pause().await;
        }
    }
}
