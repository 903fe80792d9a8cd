//! World clock and tick distribution to time-aware entities.
//!
//! The clock periodically produces a monotonically increasing logical
//! timestamp and hands it to every registered listener's private channel.
//! How a full channel is treated is a configuration choice, see
//! [`TickDelivery`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::metrics;
use crate::world::state::{wait_for_shutdown, World};
use crate::world::types::{EntityId, Tick};

/// Policy for a listener whose tick channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickDelivery {
    /// Wait for room in the channel. A stalled entity holds up the whole tick.
    #[default]
    Block,
    /// Skip that listener for this tick and move on.
    Skip,
}

struct Subscriber {
    id: EntityId,
    tx: mpsc::Sender<Tick>,
}

/// Registry of time-aware entities' tick channels.
#[derive(Default)]
pub struct TimeListeners {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl TimeListeners {
    pub fn register(&self, id: EntityId, tx: mpsc::Sender<Tick>) {
        self.lock().push(Subscriber { id, tx });
    }

    /// Drop `id`'s channel so no further ticks are sent to it.
    pub fn unregister(&self, id: EntityId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<(EntityId, mpsc::Sender<Tick>)> {
        self.lock().iter().map(|s| (s.id, s.tx.clone())).collect()
    }

    /// Deliver `now` to every listener registered at call time.
    pub async fn deliver(&self, now: Tick, mode: TickDelivery) -> TickReport {
        let mut report = TickReport {
            now,
            ..TickReport::default()
        };
        let mut closed = Vec::new();
        for (id, tx) in self.snapshot() {
            match mode {
                TickDelivery::Block => match tx.send(now).await {
                    Ok(()) => report.delivered += 1,
                    Err(_) => closed.push(id),
                },
                TickDelivery::Skip => match tx.try_send(now) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        trace!("tick {} skipped for entity {}", now, id);
                        report.skipped += 1;
                    }
                    Err(TrySendError::Closed(_)) => closed.push(id),
                },
            }
        }
        if !closed.is_empty() {
            self.lock().retain(|s| !closed.contains(&s.id));
            report.pruned = closed.len();
            debug!("pruned {} closed tick listener(s)", report.pruned);
        }
        metrics::add_ticks_delivered(report.delivered as u64);
        metrics::add_ticks_skipped(report.skipped as u64);
        report
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub now: Tick,
    pub delivered: usize,
    pub skipped: usize,
    pub pruned: usize,
}

/// Run the clock: every `period`, advance by `step` ticks and deliver.
pub(crate) fn spawn_clock(world: Arc<World>, period: Duration, step: Tick) -> JoinHandle<()> {
    let mut shutdown = world.shutdown_signal();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = interval.tick() => {}
            }
            let now = world.now().saturating_add(step.max(1));
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                report = world.deliver_tick(now) => {
                    trace!(
                        "tick {}: delivered={} skipped={} pruned={}",
                        report.now, report.delivered, report.skipped, report.pruned
                    );
                }
            }
        }
        debug!("world clock stopped at tick {}", world.now());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skip_mode_never_waits_on_full_channel() {
        let listeners = TimeListeners::default();
        let (stalled_tx, _stalled_rx) = mpsc::channel(1);
        let (live_tx, mut live_rx) = mpsc::channel(4);
        listeners.register(EntityId::next(), stalled_tx);
        listeners.register(EntityId::next(), live_tx);

        let first = listeners.deliver(1, TickDelivery::Skip).await;
        assert_eq!(first.delivered, 2);
        let second = listeners.deliver(2, TickDelivery::Skip).await;
        assert_eq!(second.delivered, 1);
        assert_eq!(second.skipped, 1);

        assert_eq!(live_rx.recv().await, Some(1));
        assert_eq!(live_rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn closed_listeners_are_pruned() {
        let listeners = TimeListeners::default();
        let (tx, rx) = mpsc::channel(1);
        let id = EntityId::next();
        listeners.register(id, tx);
        drop(rx);

        let report = listeners.deliver(5, TickDelivery::Block).await;
        assert_eq!(report.pruned, 1);
        assert!(listeners.is_empty());
        assert!(!listeners.unregister(id));
    }
}
