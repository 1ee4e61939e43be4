//! Single-slot liveness timer.

use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

// Deadline used when `now + duration` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

struct Armed {
    generation: u64,
    duration: Duration,
    task: AbortHandle,
}

/// One timer slot per resolver.
///
/// Arming replaces whatever was pending. The expiry callback receives the
/// generation it was armed with; the owner passes that back to
/// [`TimeoutMonitor::expire`], which rejects expiries of timers that were
/// disarmed or replaced after their callback had already been queued.
///
/// Must be armed from within a tokio runtime.
#[derive(Default)]
pub struct TimeoutMonitor {
    pending: Option<Armed>,
    generation: u64,
}

impl TimeoutMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` after `duration`, cancelling any pending timer.
    pub fn arm<F>(&mut self, duration: Duration, on_expire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.disarm();
        self.generation += 1;
        let generation = self.generation;
        let now = Instant::now();
        let deadline = now.checked_add(duration).unwrap_or(now + FAR_FUTURE);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expire(generation);
        })
        .abort_handle();

        self.pending = Some(Armed {
            generation,
            duration,
            task,
        });
        generation
    }

    /// Cancel the pending timer, if any. Returns whether one was pending.
    pub fn disarm(&mut self) -> bool {
        match self.pending.take() {
            Some(armed) => {
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Accept an expiry for `generation`, clearing the slot.
    ///
    /// Returns `false` for stale generations.
    pub fn expire(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some(armed) if armed.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Duration the pending timer was armed with.
    pub fn armed_duration(&self) -> Option<Duration> {
        self.pending.as_ref().map(|armed| armed.duration)
    }
}

impl Drop for TimeoutMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl std::fmt::Debug for TimeoutMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutMonitor")
            .field("armed", &self.armed_duration())
            .field("generation", &self.generation)
            .finish()
    }
}
