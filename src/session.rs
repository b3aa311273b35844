//! Session lifecycle: the connection state machine and its self-healing
//! restart policy.
//!
//! [`SessionManager`] owns at most one [`ConnectionDriver`] at a time and is
//! the only component that mutates [`ConnectionState`]. Driver lifecycle
//! events are consumed by a single event-loop task per driver generation,
//! so transition handling is serialized and testable with a fake driver.
//!
//! A generation counter guards against stale drivers: teardown bumps it,
//! and events (or scheduled restarts) carrying a superseded generation are
//! ignored. This is what makes "disconnect, then exactly one re-init" hold
//! even when duplicate events race an explicit stop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::credentials::CredentialStore;
use crate::driver::{ConnectionDriver, DriverFactory};
use crate::queue::DeliveryQueue;
use crate::types::{ConnectionState, DriverEvent, PairingChallenge, StatusSnapshot};

/// Bounds for the automatic-restart backoff.
///
/// The original behavior restarted unconditionally on every failure event;
/// a permanently rejected credential would loop forever. Restarts are now
/// budgeted: after `max_attempts` consecutive failures the session parks in
/// `Disconnected` and [`SessionManager::status`] carries a persistent
/// error. An explicit [`SessionManager::start_session`] resets the budget.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Backoff before the first restart attempt.
    pub initial: Duration,
    /// Backoff ceiling.
    pub max: Duration,
    /// Consecutive failed attempts before the session parks.
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl RestartPolicy {
    /// Backoff before restart `attempt` (1-based): doubled per attempt,
    /// capped at `max`, with up to 10% added jitter so a fleet of gateways
    /// does not thunder back in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let doubling = attempt.saturating_sub(1).min(32);
        let factor = 1_u64.checked_shl(doubling).unwrap_or(u64::MAX);
        let base = initial_ms.saturating_mul(factor).min(max_ms);
        let jitter = rand::thread_rng().gen_range(0..=base / 10);
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Mutable lifecycle state, guarded by a single mutex so state transitions
/// and driver handover are mutually exclusive.
struct Lifecycle {
    state: ConnectionState,
    pairing: Option<PairingChallenge>,
    driver: Option<Arc<dyn ConnectionDriver>>,
    /// Bumped on every driver construction and teardown; events and
    /// scheduled restarts from older generations are ignored.
    generation: u64,
    restart_attempts: u32,
    /// Generation a restart is currently scheduled for, if any. Tagged so a
    /// stale pending restart never suppresses scheduling one for the
    /// current generation.
    restart_pending: Option<u64>,
    last_error: Option<String>,
}

/// Shared core of the session manager.
struct SessionInner {
    factory: Arc<dyn DriverFactory>,
    credentials: CredentialStore,
    queue: Arc<DeliveryQueue>,
    restart: RestartPolicy,
    lifecycle: Mutex<Lifecycle>,
    connected_tx: watch::Sender<bool>,
}

impl SessionInner {
    /// Lock the lifecycle state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the connection lifecycle: one driver at a time, an explicit state
/// machine, and the credential-wipe-then-restart policy.
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a manager wired to a driver factory, the session-credential
    /// store, and the delivery queue it pauses, resumes, and flushes.
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        credentials: CredentialStore,
        queue: Arc<DeliveryQueue>,
        restart: RestartPolicy,
    ) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                factory,
                credentials,
                queue,
                restart,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    pairing: None,
                    driver: None,
                    generation: 0,
                    restart_attempts: 0,
                    restart_pending: None,
                    last_error: None,
                }),
                connected_tx,
            }),
        }
    }

    /// Latest known state and pairing challenge. Never blocks on I/O and is
    /// safe to call concurrently with transitions.
    pub fn status(&self) -> StatusSnapshot {
        let lifecycle = self.inner.lock();
        StatusSnapshot {
            state: lifecycle.state,
            pairing: lifecycle.pairing.clone(),
            restart_attempts: lifecycle.restart_attempts,
            last_error: lifecycle.last_error.clone(),
        }
    }

    /// Watch channel that flips to `true` while the session is Connected.
    /// The delivery queue's drain loop parks on this.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    /// The driver of the current session, if one exists right now.
    ///
    /// Only the drain loop should call the send primitives on it.
    pub fn current_driver(&self) -> Option<Arc<dyn ConnectionDriver>> {
        self.inner.lock().driver.clone()
    }

    /// Wait up to `timeout` for the session to reach Connected.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.subscribe_connected();
        tokio::time::timeout(timeout, async move {
            loop {
                if *connected.borrow_and_update() {
                    return true;
                }
                if connected.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Begin a session if none is active.
    ///
    /// Idempotent: a call while Initializing, AwaitingPairing,
    /// Authenticating, or Connected is a no-op; exactly one driver is
    /// constructed per transition out of Disconnected. An explicit call
    /// also clears an exhausted restart budget.
    pub async fn start_session(&self) {
        {
            let mut lifecycle = self.inner.lock();
            if lifecycle.state == ConnectionState::Disconnected {
                // Operator-driven restart: forgive prior failures.
                lifecycle.restart_attempts = 0;
            }
        }
        Self::start_attempt(Arc::clone(&self.inner), None).await;
    }

    /// Tear down the session and clear credentials.
    ///
    /// Always succeeds from the caller's perspective: driver disconnect
    /// errors are logged, not surfaced, since the desired end state
    /// (disconnected) is reached regardless. Does NOT auto-restart.
    pub async fn stop_session(&self) {
        let driver = {
            let mut lifecycle = self.inner.lock();
            // Invalidate in-flight events and any scheduled restart.
            lifecycle.generation = lifecycle.generation.saturating_add(1);
            lifecycle.state = ConnectionState::Disconnecting;
            lifecycle.pairing = None;
            lifecycle.restart_pending = None;
            let _ = self.inner.connected_tx.send(false);
            lifecycle.driver.take()
        };

        if let Some(driver) = driver {
            if let Err(e) = driver.disconnect().await {
                warn!(error = %e, "driver disconnect failed during stop, continuing");
            }
        }
        self.inner.credentials.wipe();

        let mut lifecycle = self.inner.lock();
        lifecycle.state = ConnectionState::Disconnected;
        lifecycle.restart_attempts = 0;
        lifecycle.last_error = None;
        info!("session stopped");
    }

    /// One initialization attempt. `expected_generation` is set by
    /// scheduled restarts so a stop or manual start in the meantime
    /// supersedes them.
    async fn start_attempt(inner: Arc<SessionInner>, expected_generation: Option<u64>) {
        let generation = {
            let mut lifecycle = inner.lock();
            if let Some(expected) = expected_generation {
                if lifecycle.generation != expected {
                    debug!("scheduled restart superseded, skipping");
                    return;
                }
            }
            if lifecycle.state != ConnectionState::Disconnected {
                debug!(state = ?lifecycle.state, "start_session ignored, session already active");
                return;
            }
            lifecycle.state = ConnectionState::Initializing;
            lifecycle.pairing = None;
            lifecycle.generation = lifecycle.generation.saturating_add(1);
            lifecycle.generation
        };

        if let Err(e) = inner.credentials.ensure() {
            warn!(error = %e, "session state directory unavailable, continuing");
        }

        info!(generation, "initializing chat-network session");
        match inner.factory.connect().await {
            Ok(handle) => {
                let mut lifecycle = inner.lock();
                if lifecycle.generation != generation
                    || lifecycle.state != ConnectionState::Initializing
                {
                    // A stop raced construction; discard the fresh driver.
                    drop(lifecycle);
                    let driver = handle.driver;
                    tokio::spawn(async move {
                        let _ = driver.disconnect().await;
                    });
                    return;
                }
                lifecycle.driver = Some(Arc::clone(&handle.driver));
                drop(lifecycle);
                tokio::spawn(Self::run_event_loop(inner, handle.events, generation));
            }
            Err(e) => {
                warn!(error = %e, "driver construction failed");
                let mut lifecycle = inner.lock();
                if lifecycle.generation != generation {
                    return;
                }
                lifecycle.state = ConnectionState::Disconnected;
                lifecycle.last_error = Some(format!("initialization failed: {e}"));
                Self::schedule_restart(&inner, &mut lifecycle);
            }
        }
    }

    /// Consume one driver generation's events until teardown or channel
    /// close.
    async fn run_event_loop(
        inner: Arc<SessionInner>,
        mut events: mpsc::Receiver<DriverEvent>,
        generation: u64,
    ) {
        while let Some(event) = events.recv().await {
            if !Self::handle_event(&inner, generation, event) {
                return;
            }
        }
        // The driver's event stream ended without a disconnect event;
        // treat it as one so the session still heals.
        Self::handle_event(
            &inner,
            generation,
            DriverEvent::Disconnected {
                reason: Some("event stream closed".to_owned()),
            },
        );
    }

    /// Apply one event to the state machine. Returns `false` when the
    /// event loop for this generation should stop.
    fn handle_event(inner: &Arc<SessionInner>, generation: u64, event: DriverEvent) -> bool {
        let mut lifecycle = inner.lock();
        if lifecycle.generation != generation {
            debug!(generation, "ignoring event from superseded session");
            return false;
        }

        match event {
            DriverEvent::PairingChallenge { token } => {
                if matches!(
                    lifecycle.state,
                    ConnectionState::Initializing | ConnectionState::AwaitingPairing
                ) {
                    info!("pairing challenge received, awaiting out-of-band confirmation");
                    lifecycle.state = ConnectionState::AwaitingPairing;
                    lifecycle.pairing = Some(PairingChallenge::new(token));
                } else {
                    warn!(state = ?lifecycle.state, "unexpected pairing challenge ignored");
                }
                true
            }
            DriverEvent::Authenticated => {
                if matches!(
                    lifecycle.state,
                    ConnectionState::Initializing | ConnectionState::AwaitingPairing
                ) {
                    info!("session authenticated");
                    lifecycle.state = ConnectionState::Authenticating;
                    lifecycle.pairing = None;
                }
                true
            }
            DriverEvent::Ready => {
                if lifecycle.state != ConnectionState::Connected {
                    info!("session connected, resuming delivery");
                    lifecycle.state = ConnectionState::Connected;
                    lifecycle.pairing = None;
                    lifecycle.restart_attempts = 0;
                    lifecycle.last_error = None;
                    let _ = inner.connected_tx.send(true);
                }
                true
            }
            DriverEvent::AuthFailed { reason } => {
                let reason = reason.unwrap_or_else(|| "credentials rejected".to_owned());
                warn!(%reason, "authentication failed, wiping credentials");
                Self::teardown(inner, &mut lifecycle, &reason, false);
                false
            }
            DriverEvent::Disconnected { reason } => {
                let reason = reason.unwrap_or_else(|| "connection dropped".to_owned());
                warn!(%reason, "session disconnected");
                Self::teardown(inner, &mut lifecycle, &reason, true);
                false
            }
        }
    }

    /// Common teardown for failure events: invalidate the generation, drop
    /// the driver, wipe credentials, optionally flush the queue, and
    /// schedule a restart.
    fn teardown(
        inner: &Arc<SessionInner>,
        lifecycle: &mut Lifecycle,
        reason: &str,
        flush_queue: bool,
    ) {
        lifecycle.generation = lifecycle.generation.saturating_add(1);
        let driver = lifecycle.driver.take();
        lifecycle.state = ConnectionState::Disconnected;
        lifecycle.pairing = None;
        lifecycle.last_error = Some(reason.to_owned());
        let _ = inner.connected_tx.send(false);

        if let Some(driver) = driver {
            // Best effort; the session is already considered dead.
            tokio::spawn(async move {
                let _ = driver.disconnect().await;
            });
        }

        inner.credentials.wipe();

        if flush_queue {
            inner.queue.flush("disconnected");
        }

        Self::schedule_restart(inner, lifecycle);
    }

    /// Schedule one bounded-backoff restart unless one is already pending
    /// or the budget is spent.
    fn schedule_restart(inner: &Arc<SessionInner>, lifecycle: &mut Lifecycle) {
        if lifecycle.restart_pending == Some(lifecycle.generation) {
            return;
        }
        if lifecycle.restart_attempts >= inner.restart.max_attempts {
            let message = format!(
                "session failed permanently after {} restart attempts: {}",
                lifecycle.restart_attempts,
                lifecycle.last_error.as_deref().unwrap_or("unknown error")
            );
            error!(attempts = lifecycle.restart_attempts, "restart budget exhausted");
            lifecycle.last_error = Some(message);
            return;
        }

        lifecycle.restart_attempts = lifecycle.restart_attempts.saturating_add(1);
        lifecycle.restart_pending = Some(lifecycle.generation);
        let attempt = lifecycle.restart_attempts;
        let generation = lifecycle.generation;
        let delay = inner.restart.delay_for(attempt);
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling session restart"
        );

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut lifecycle = inner.lock();
                if lifecycle.restart_pending == Some(generation) {
                    lifecycle.restart_pending = None;
                }
                if lifecycle.generation != generation {
                    debug!("restart superseded before firing");
                    return;
                }
            }
            Self::start_attempt(inner, Some(generation)).await;
        });
    }
}
