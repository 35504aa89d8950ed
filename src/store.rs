use crate::capability::Clock;
use crate::model::{ItemDescriptor, Offer};
use crate::persistence::{PersistenceBackend, PersistenceResult};
use crate::{BarterError, OfferId, PartyId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Keyed registry of live offers.
///
/// Expired offers behave as absent everywhere. They are dropped from memory
/// when a read trips over them and from disk by the next write, which is
/// usually the sweeper's batch save.
pub struct OfferStore {
    offers: Mutex<HashMap<OfferId, Offer>>,
    offer_locks: Mutex<HashMap<OfferId, Arc<Mutex<()>>>>,
    save_lock: Mutex<()>,
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
}

impl OfferStore {
    /// Opens the store and loads whatever the backend holds.
    /// Unreadable state is logged and treated as empty.
    pub fn open(backend: Arc<dyn PersistenceBackend>, clock: Arc<dyn Clock>) -> Self {
        let store = Self {
            offers: Mutex::new(HashMap::new()),
            offer_locks: Mutex::new(HashMap::new()),
            save_lock: Mutex::new(()),
            backend,
            clock,
        };
        store.load();
        store
    }

    pub fn create(
        &self,
        creator_id: PartyId,
        creator_display_name: &str,
        offered: ItemDescriptor,
        requested: ItemDescriptor,
    ) -> Result<OfferId> {
        let offer = Offer::new(
            creator_id,
            creator_display_name.to_string(),
            offered,
            requested,
            self.clock.now(),
        );
        offer.validate()?;

        let offer_id = offer.id;
        info!(offer_id = %offer_id, creator = %creator_id, "New trade offer created: {}", offer);
        self.offers.lock().insert(offer_id, offer);

        self.save_or_report(offer_id)?;
        Ok(offer_id)
    }

    pub fn get(&self, offer_id: OfferId) -> Option<Offer> {
        let now = self.clock.now();
        {
            let mut offers = self.offers.lock();
            let offer = offers.get(&offer_id)?;
            if !offer.is_expired(now) {
                return Some(offer.clone());
            }
            offers.remove(&offer_id);
        }
        self.forget_locks(&[offer_id]);
        None
    }

    /// Snapshot of every unexpired offer, oldest first.
    pub fn list_active(&self) -> Vec<Offer> {
        self.collect_active(|_| true)
    }

    pub fn list_active_by(&self, creator_id: PartyId) -> Vec<Offer> {
        self.collect_active(|offer| offer.creator_id == creator_id)
    }

    /// Active offers whose requested item type contains `query`, ignoring case.
    pub fn search_requested(&self, query: &str) -> Vec<Offer> {
        let needle = query.to_lowercase();
        self.collect_active(|offer| offer.requested_item.type_id.to_lowercase().contains(&needle))
    }

    pub fn total_active(&self) -> usize {
        let now = self.clock.now();
        self.offers.lock().values().filter(|offer| !offer.is_expired(now)).count()
    }

    /// Removes an offer. Returns false when it was not there.
    ///
    /// Waits for an accept or cancel already running on the same offer.
    pub fn remove(&self, offer_id: OfferId) -> Result<bool> {
        let lock = self.offer_lock(offer_id);
        let outcome = {
            let _guard = lock.lock();
            self.remove_locked(offer_id)
        };
        self.release_offer_lock(offer_id);
        outcome
    }

    /// Removal for callers already holding the offer's lock.
    pub(crate) fn remove_locked(&self, offer_id: OfferId) -> Result<bool> {
        let removed = self.offers.lock().remove(&offer_id).is_some();
        if !removed {
            return Ok(false);
        }
        self.forget_locks(&[offer_id]);

        info!(offer_id = %offer_id, "Trade offer removed");
        self.save_or_report(offer_id)?;
        Ok(true)
    }

    /// Creator-only removal.
    pub fn cancel(&self, requester: PartyId, offer_id: OfferId) -> Result<Offer> {
        let lock = self.offer_lock(offer_id);
        let outcome = {
            let _guard = lock.lock();
            self.cancel_locked(requester, offer_id)
        };
        self.release_offer_lock(offer_id);
        outcome
    }

    fn cancel_locked(&self, requester: PartyId, offer_id: OfferId) -> Result<Offer> {
        let offer = self.get(offer_id).ok_or(BarterError::OfferNotFound(offer_id))?;
        if offer.creator_id != requester {
            warn!(offer_id = %offer_id, party = %requester, "Tried to cancel someone else's offer");
            return Err(BarterError::Unauthorized {
                party: requester,
                offer: offer_id,
            });
        }

        self.remove_locked(offer_id)?;
        info!(offer_id = %offer_id, party = %requester, "Offer cancelled");
        Ok(offer)
    }

    /// Drops every expired offer and saves once.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let removed: Vec<OfferId> = {
            let mut offers = self.offers.lock();
            let expired: Vec<OfferId> = offers
                .values()
                .filter(|offer| offer.is_expired(now))
                .map(|offer| offer.id)
                .collect();
            for offer_id in &expired {
                offers.remove(offer_id);
            }
            expired
        };
        self.forget_locks(&removed);

        for offer_id in &removed {
            info!(offer_id = %offer_id, "Expired offer cleaned");
        }

        if let Err(e) = self.save() {
            warn!(error = %e, "Failed to save offers after sweep");
        }
        removed.len()
    }

    /// Writes the current in-memory set.
    pub fn flush(&self) -> Result<()> {
        self.save().map_err(BarterError::from)
    }

    /// Discards in-memory state and loads it again from the backend.
    pub fn reload(&self) {
        self.offers.lock().clear();
        self.offer_locks.lock().clear();
        self.load();
        info!("Trade offer store reloaded");
    }

    /// Lock that serializes accept and cancel on one offer.
    pub(crate) fn offer_lock(&self, offer_id: OfferId) -> Arc<Mutex<()>> {
        self.offer_locks
            .lock()
            .entry(offer_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forgets the lock of an offer that is gone. Late arrivals that create a
    /// fresh lock will find the offer missing.
    pub(crate) fn release_offer_lock(&self, offer_id: OfferId) {
        if !self.offers.lock().contains_key(&offer_id) {
            self.offer_locks.lock().remove(&offer_id);
        }
    }

    /// Drops lock table entries of offers that left the map. Never called
    /// with the offers map locked.
    fn forget_locks(&self, offer_ids: &[OfferId]) {
        if offer_ids.is_empty() {
            return;
        }
        let mut locks = self.offer_locks.lock();
        for offer_id in offer_ids {
            locks.remove(offer_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.offer_locks.lock().len()
    }

    fn collect_active<F>(&self, keep: F) -> Vec<Offer>
    where
        F: Fn(&Offer) -> bool,
    {
        let now = self.clock.now();
        let (mut active, expired) = {
            let mut offers = self.offers.lock();
            let expired: Vec<OfferId> = offers
                .values()
                .filter(|offer| offer.is_expired(now))
                .map(|offer| offer.id)
                .collect();
            for offer_id in &expired {
                offers.remove(offer_id);
            }
            let active: Vec<Offer> = offers.values().filter(|offer| keep(offer)).cloned().collect();
            (active, expired)
        };
        self.forget_locks(&expired);

        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        active
    }

    fn load(&self) {
        let loaded = match self.backend.load_offers() {
            Ok(offers) => offers,
            Err(e) => {
                warn!(error = %e, "Failed to load trade offers; starting with none");
                return;
            }
        };

        let now = self.clock.now();
        let mut offers = self.offers.lock();
        for offer in loaded {
            if offer.is_expired(now) {
                continue;
            }
            if let Err(e) = offer.validate() {
                warn!(offer_id = %offer.id, error = %e, "Skipping invalid stored offer");
                continue;
            }
            offers.insert(offer.id, offer);
        }
        info!(count = offers.len(), "Loaded trade offers");
    }

    /// Snapshot is taken after the save lock so a newer snapshot is never
    /// overwritten by an older one.
    fn save(&self) -> PersistenceResult<()> {
        let _guard = self.save_lock.lock();
        let mut snapshot: Vec<Offer> = self.offers.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.backend.save_offers(&snapshot)?;
        info!(count = snapshot.len(), "Saved trade offers");
        Ok(())
    }

    fn save_or_report(&self, offer_id: OfferId) -> Result<()> {
        self.save().map_err(|e| {
            warn!(offer_id = %offer_id, error = %e, "Failed to save trade offers");
            BarterError::Unsaved {
                offer_id,
                reason: e.to_string(),
            }
        })
    }
}
