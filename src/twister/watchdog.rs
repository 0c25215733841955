//! Inactivity watchdog
//!
//! A one-shot timer that fires once the [`ActivityClock`] it watches has been
//! idle for the configured timeout. Every touch of the clock pushes the
//! deadline back. The timer runs as a task on the Tokio runtime and can be
//! cancelled at any point before it fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Last-activity timestamp on the monotonic clock
pub struct ActivityClock {
    /// Monotonic start time for relative timestamps
    start: Instant,

    /// Last activity (milliseconds since `start`)
    last_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Record activity now
    pub fn touch(&self) {
        self.last_ms.fetch_max(self.now_ms(), Ordering::Relaxed);
    }

    /// Time since the last activity
    pub fn idle(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running watchdog timer
pub struct Watchdog {
    id: u64,
    token: CancellationToken,
}

impl Watchdog {
    /// Start a timer on `runtime` that calls `on_timeout` with the watchdog's
    /// id once `clock` has been idle for `timeout`
    ///
    /// Can be called from any thread.
    pub fn spawn<F>(runtime: &Handle, clock: Arc<ActivityClock>, timeout: Duration, on_timeout: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        runtime.spawn(run(id, clock, timeout, token.clone(), on_timeout));
        trace!(watchdog = id, ?timeout, "Watchdog armed");

        Self { id, token }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the timer; no-op if it already fired
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once cancelled or fired
    pub fn is_finished(&self) -> bool {
        self.token.is_cancelled()
    }
}

async fn run<F>(
    id: u64,
    clock: Arc<ActivityClock>,
    timeout: Duration,
    token: CancellationToken,
    on_timeout: F,
) where
    F: FnOnce(u64) + Send + 'static,
{
    loop {
        let idle = clock.idle();
        if idle >= timeout {
            break;
        }

        tokio::select! {
            _ = token.cancelled() => {
                trace!(watchdog = id, "Watchdog cancelled");
                return;
            }
            _ = tokio::time::sleep(timeout - idle) => {}
        }
    }

    if token.is_cancelled() {
        return;
    }
    token.cancel();

    trace!(watchdog = id, "Watchdog fired");
    on_timeout(id);
}
