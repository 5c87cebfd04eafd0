//! Periodic refresh of MIB data from the backing stores.
//!
//! Each [`Refreshable`] gets its own tokio task. Store I/O runs on the
//! blocking pool and publishes through a [`Snapshot`], so request handling
//! never waits on a refresh.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::store::StoreError;

/// Errors raised while refreshing MIB data.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Backing store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0} has no layout yet")]
    NotInitialized(String),
}

/// A data provider that can rebuild its structure and re-read its values.
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &str;

    /// Rediscovers what exists (namespaces, ports, queues).
    fn reinit_data(&self) -> Result<(), UpdateError>;

    /// Re-reads every known counter and publishes a new snapshot.
    ///
    /// On error the previously published snapshot stays in place.
    fn update_data(&self) -> Result<(), UpdateError>;
}

/// An atomically replaced value with a generation counter.
///
/// Readers get an `Arc` to one complete generation; publishing never
/// mutates a generation that is already visible.
pub struct Snapshot<T> {
    current: ArcSwap<T>,
    generation: AtomicU64,
}

impl<T> Snapshot<T> {
    pub fn new(initial: T) -> Self {
        Snapshot {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Replaces the current value and returns the new generation number.
    pub fn publish(&self, next: T) -> u64 {
        self.current.store(Arc::new(next));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Decides when a periodic round must reinitialize before updating.
///
/// The first round always reinitializes, then every `reinit_rate` rounds,
/// and again on the round after a failed reinit.
#[derive(Debug, Clone)]
pub struct RefreshCycle {
    reinit_rate: u32,
    countdown: u32,
    needs_reinit: bool,
}

impl RefreshCycle {
    pub fn new(reinit_rate: u32) -> Self {
        RefreshCycle {
            reinit_rate: reinit_rate.max(1),
            countdown: 0,
            needs_reinit: true,
        }
    }

    /// True when the next round will run `reinit_data` first.
    pub fn reinit_due(&self) -> bool {
        self.needs_reinit || self.countdown == 0
    }

    /// Runs one refresh round against `target`.
    pub fn run_once(&mut self, target: &dyn Refreshable) -> Result<(), UpdateError> {
        if self.reinit_due() {
            if let Err(e) = target.reinit_data() {
                self.needs_reinit = true;
                return Err(e);
            }
            self.needs_reinit = false;
            self.countdown = self.reinit_rate;
        }
        self.countdown -= 1;
        target.update_data()
    }
}

/// Spawns one refresh task per updater.
pub fn spawn_updaters(
    updaters: &[Arc<dyn Refreshable>],
    frequency: Duration,
    reinit_rate: u32,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    updaters
        .iter()
        .map(|updater| {
            tokio::spawn(run_updater(
                updater.clone(),
                frequency,
                reinit_rate,
                cancel.clone(),
            ))
        })
        .collect()
}

/// Refreshes `updater` every `frequency` until `cancel` fires.
pub async fn run_updater(
    updater: Arc<dyn Refreshable>,
    frequency: Duration,
    reinit_rate: u32,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(frequency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle = RefreshCycle::new(reinit_rate);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("Updater {} stopped", updater.name());
                return;
            }
            _ = ticker.tick() => {}
        }

        let target = updater.clone();
        let round = tokio::task::spawn_blocking(move || {
            let result = cycle.run_once(target.as_ref());
            (cycle, result)
        })
        .await;

        match round {
            Ok((next, result)) => {
                cycle = next;
                if let Err(e) = result {
                    log::warn!(
                        "Refresh of {} failed, keeping previous data: {}",
                        updater.name(),
                        e
                    );
                }
            }
            Err(e) => {
                log::error!("Refresh task for {} panicked: {}", updater.name(), e);
                cycle = RefreshCycle::new(reinit_rate);
            }
        }
    }
}
