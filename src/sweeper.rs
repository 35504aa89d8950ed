use crate::store::OfferStore;
use crate::warehouse::Warehouse;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Counts host ticks and sweeps expired offers every `interval_ticks`.
///
/// Ticks are expected one at a time; the counter is atomic only so the
/// sweeper can be shared behind an `Arc`.
pub struct ExpirationSweeper {
    offers: Arc<OfferStore>,
    warehouse: Arc<Warehouse>,
    interval_ticks: u64,
    counter: AtomicU64,
}

impl ExpirationSweeper {
    pub fn new(offers: Arc<OfferStore>, warehouse: Arc<Warehouse>, interval_ticks: u64) -> Self {
        Self {
            offers,
            warehouse,
            interval_ticks: interval_ticks.max(1),
            counter: AtomicU64::new(0),
        }
    }

    pub fn interval_ticks(&self) -> u64 {
        self.interval_ticks
    }

    /// Advances the counter. Returns the number of offers swept when this
    /// tick completed an interval.
    pub fn on_tick(&self) -> Option<usize> {
        let ticks = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        if ticks < self.interval_ticks {
            return None;
        }
        self.counter.store(0, Ordering::SeqCst);
        Some(self.sweep_now())
    }

    /// Sweeps and then writes both stores regardless of what was removed.
    pub fn sweep_now(&self) -> usize {
        let removed = self.offers.sweep_expired();
        if removed > 0 {
            info!(removed, "Cleaned expired trade offers");
        } else {
            debug!("No expired trade offers");
        }

        if let Err(e) = self.offers.flush() {
            warn!(error = %e, "Periodic offer save failed");
        }
        if let Err(e) = self.warehouse.flush() {
            warn!(error = %e, "Periodic warehouse save failed");
        }
        removed
    }

    /// Drives `on_tick` every `tick` until `shutdown` resolves.
    pub async fn run<F>(&self, tick: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_ticks = self.interval_ticks,
            tick_ms = tick.as_millis() as u64,
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.on_tick();
                }
            }
        }

        info!("Expiration sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ManualClock;
    use crate::model::{offer_ttl, ItemDescriptor};
    use crate::persistence::{MemoryBackend, PersistenceBackend};
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn setup(interval: u64) -> (ExpirationSweeper, Arc<OfferStore>, Arc<MemoryBackend>, Arc<ManualClock>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::default());
        let offers = Arc::new(OfferStore::open(backend.clone(), clock.clone()));
        let warehouse = Arc::new(Warehouse::open(backend.clone(), clock.clone()));
        let sweeper = ExpirationSweeper::new(offers.clone(), warehouse, interval);
        (sweeper, offers, backend, clock)
    }

    fn create(offers: &OfferStore) {
        offers
            .create(
                Uuid::new_v4(),
                "P1",
                ItemDescriptor::new("wood", 10),
                ItemDescriptor::new("diamond", 1),
            )
            .unwrap();
    }

    #[test]
    fn test_sweeps_on_interval_boundary() {
        let (sweeper, offers, backend, clock) = setup(3);
        create(&offers);
        clock.advance(offer_ttl() + ChronoDuration::seconds(1));

        assert_eq!(sweeper.on_tick(), None);
        assert_eq!(sweeper.on_tick(), None);
        assert_eq!(sweeper.on_tick(), Some(1));
        assert!(backend.load_offers().unwrap().is_empty());

        assert_eq!(sweeper.on_tick(), None);
        assert_eq!(sweeper.on_tick(), None);
        assert_eq!(sweeper.on_tick(), Some(0));
    }

    #[test]
    fn test_sweep_persists_even_when_nothing_expired() {
        let (sweeper, offers, backend, _) = setup(1);
        create(&offers);
        let offer_writes = backend.offer_writes();
        let warehouse_writes = backend.warehouse_writes();

        assert_eq!(sweeper.on_tick(), Some(0));
        assert!(backend.offer_writes() > offer_writes);
        assert_eq!(backend.warehouse_writes(), warehouse_writes + 1);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let (sweeper, _, _, _) = setup(0);
        assert_eq!(sweeper.interval_ticks(), 1);
        assert_eq!(sweeper.on_tick(), Some(0));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, offers, backend, clock) = setup(2);
        create(&offers);
        clock.advance(offer_ttl() + ChronoDuration::seconds(1));

        sweeper
            .run(Duration::from_millis(1), tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert_eq!(offers.total_active(), 0);
        assert!(backend.load_offers().unwrap().is_empty());
    }
}
