//! Deferred reclamation of unloaded plugin code
//!
//! Replaced or removed descriptors are queued here instead of being dropped
//! on the spot. A handler call that is still running keeps its own reference
//! to the unit; a periodic sweep releases the descriptor's reference once the
//! grace period has passed, so old code is freed only after in-flight calls
//! finish.

use hotwire_kernel::PluginState;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::index::PluginDescriptor;

struct Queued {
    descriptor: Arc<PluginDescriptor>,
    queued_at: Instant,
}

/// Deferred release queue for unloaded plugins
pub struct Reclaimer {
    grace: Duration,
    queue: Mutex<VecDeque<Queued>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Reclaimer {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            queue: Mutex::new(VecDeque::new()),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Queue descriptors that left the index. They are marked `Removed`.
    pub fn enqueue(&self, descriptors: impl IntoIterator<Item = Arc<PluginDescriptor>>) {
        let now = Instant::now();
        let mut queue = self.queue.lock();
        for descriptor in descriptors {
            descriptor.set_state(PluginState::Removed);
            debug!(plugin = %descriptor.id(), "queued for reclamation");
            queue.push_back(Queued {
                descriptor,
                queued_at: now,
            });
        }
    }

    /// Release every queued descriptor older than the grace period.
    ///
    /// Returns how many were released.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let due: Vec<Queued> = {
            let mut queue = self.queue.lock();
            let mut due = Vec::new();
            while queue
                .front()
                .is_some_and(|q| now.saturating_duration_since(q.queued_at) >= self.grace)
            {
                if let Some(q) = queue.pop_front() {
                    due.push(q);
                }
            }
            due
        };

        let mut released = 0;
        for queued in due {
            // dropped outside the queue lock
            if queued.descriptor.release().is_some() {
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, "reclaimed plugin code");
        }
        released
    }

    /// Descriptors still waiting for release
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Start the periodic sweep on the current tokio runtime.
    pub fn spawn(self: &Arc<Self>, interval: Duration) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        if let Some(previous) = self.shutdown_tx.lock().replace(shutdown_tx) {
            let _ = previous.try_send(());
        }

        let reclaimer = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(reclaimer) = reclaimer.upgrade() else {
                            return;
                        };
                        reclaimer.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("reclaimer shutting down");
                        return;
                    }
                }
            }
        });
        info!(interval_ms = interval.as_millis() as u64, "reclaimer started");
    }

    /// Stop the periodic sweep and release everything still queued.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
        let drained: Vec<Queued> = self.queue.lock().drain(..).collect();
        for queued in drained {
            queued.descriptor.release();
        }
    }
}

impl Default for Reclaimer {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticUnit;
    use hotwire_kernel::PluginUnit;

    fn descriptor(name: &str) -> Arc<PluginDescriptor> {
        Arc::new(PluginDescriptor::new(
            "p/x.rhai",
            name,
            10,
            1,
            StaticUnit::new("p/x.rhai").into_arc(),
        ))
    }

    #[test]
    fn enqueue_marks_removed_and_sweep_releases() {
        let reclaimer = Reclaimer::default();
        let a = descriptor("A");
        let b = descriptor("B");
        reclaimer.enqueue([a.clone(), b.clone()]);

        assert_eq!(a.state(), PluginState::Removed);
        assert_eq!(reclaimer.pending(), 2);
        assert_eq!(reclaimer.sweep(), 2);
        assert!(a.is_released() && b.is_released());
        assert_eq!(reclaimer.pending(), 0);
    }

    #[test]
    fn grace_period_defers_release() {
        let reclaimer = Reclaimer::new(Duration::from_secs(10));
        let a = descriptor("A");
        reclaimer.enqueue([a.clone()]);

        assert_eq!(reclaimer.sweep(), 0);
        assert!(!a.is_released());
        assert_eq!(reclaimer.sweep_at(Instant::now() + Duration::from_secs(11)), 1);
        assert!(a.is_released());
    }

    #[test]
    fn in_flight_reference_outlives_release() {
        let reclaimer = Reclaimer::default();
        let a = descriptor("A");
        let in_flight = a.unit().unwrap();
        reclaimer.enqueue([a.clone()]);
        reclaimer.sweep();

        assert!(a.unit().is_none());
        assert_eq!(in_flight.source(), std::path::Path::new("p/x.rhai"));
    }

    #[test]
    fn stop_drains_queue() {
        let reclaimer = Reclaimer::new(Duration::from_secs(60));
        let a = descriptor("A");
        reclaimer.enqueue([a.clone()]);
        reclaimer.stop();
        assert!(a.is_released());
        assert_eq!(reclaimer.pending(), 0);
    }

    #[tokio::test]
    async fn periodic_sweep_runs_until_stopped() {
        let reclaimer = Arc::new(Reclaimer::default());
        reclaimer.spawn(Duration::from_millis(10));

        let a = descriptor("A");
        reclaimer.enqueue([a.clone()]);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !a.is_released() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(a.is_released());
        reclaimer.stop();
    }
}
