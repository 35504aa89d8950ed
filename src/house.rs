use crate::capability::{Clock, InventoryCapability, PartyDirectory};
use crate::config::AppConfig;
use crate::exchange::{ExchangeEngine, ExchangeReceipt};
use crate::model::{ItemDescriptor, Offer, WarehouseEntry};
use crate::notify::{Notification, Notifier};
use crate::persistence::PersistenceBackend;
use crate::store::OfferStore;
use crate::sweeper::ExpirationSweeper;
use crate::warehouse::Warehouse;
use crate::{BarterError, OfferId, PartyId, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// What the host plugs into the house.
#[derive(Clone)]
pub struct HostServices {
    pub inventory: Arc<dyn InventoryCapability>,
    pub directory: Arc<dyn PartyDirectory>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
}

/// Owns the offer store, warehouse, exchange engine and sweeper of one
/// installation.
pub struct BarterHouse {
    offers: Arc<OfferStore>,
    warehouse: Arc<Warehouse>,
    engine: ExchangeEngine,
    sweeper: ExpirationSweeper,
    inventory: Arc<dyn InventoryCapability>,
    directory: Arc<dyn PartyDirectory>,
    notifier: Arc<dyn Notifier>,
    blocked_items: HashSet<String>,
}

impl BarterHouse {
    pub fn open(config: &AppConfig, backend: Arc<dyn PersistenceBackend>, host: HostServices) -> Self {
        let offers = Arc::new(OfferStore::open(backend.clone(), host.clock.clone()));
        let warehouse = Arc::new(Warehouse::open(backend, host.clock.clone()));

        let engine = ExchangeEngine::new(
            offers.clone(),
            warehouse.clone(),
            host.inventory.clone(),
            host.directory.clone(),
            host.notifier.clone(),
        );
        let sweeper = ExpirationSweeper::new(offers.clone(), warehouse.clone(), config.sweeper.interval_ticks);

        let blocked_items = config
            .exchange
            .blocked_items
            .iter()
            .map(|item| item.to_ascii_lowercase())
            .collect();

        info!(active_offers = offers.total_active(), "BarterHouse opened");

        Self {
            offers,
            warehouse,
            engine,
            sweeper,
            inventory: host.inventory,
            directory: host.directory,
            notifier: host.notifier,
            blocked_items,
        }
    }

    /// Publishes an offer under the creator's current display name.
    ///
    /// An `Unsaved` error still means the offer is live.
    pub fn create_offer(
        &self,
        creator_id: PartyId,
        offered: ItemDescriptor,
        requested: ItemDescriptor,
    ) -> Result<OfferId> {
        for item in [&offered, &requested] {
            if self.is_blocked(&item.type_id) {
                return Err(BarterError::InvalidInput(format!("{} cannot be traded", item.type_id)));
            }
        }

        let display_name = self.directory.display_name(creator_id);
        let outcome = self.offers.create(creator_id, &display_name, offered, requested);
        let created = match &outcome {
            Ok(offer_id) | Err(BarterError::Unsaved { offer_id, .. }) => Some(*offer_id),
            Err(_) => None,
        };

        if let Some(offer) = created.and_then(|offer_id| self.offers.get(offer_id)) {
            self.notifier.notify(Notification::OfferCreated { offer });
        }
        outcome
    }

    pub fn get_offer(&self, offer_id: OfferId) -> Option<Offer> {
        self.offers.get(offer_id)
    }

    pub fn list_active(&self) -> Vec<Offer> {
        self.offers.list_active()
    }

    pub fn list_active_by(&self, creator_id: PartyId) -> Vec<Offer> {
        self.offers.list_active_by(creator_id)
    }

    pub fn search_requested(&self, query: &str) -> Vec<Offer> {
        self.offers.search_requested(query)
    }

    pub fn total_active(&self) -> usize {
        self.offers.total_active()
    }

    pub fn remove_offer(&self, offer_id: OfferId) -> Result<bool> {
        self.offers.remove(offer_id)
    }

    pub fn cancel_offer(&self, requester: PartyId, offer_id: OfferId) -> Result<Offer> {
        let offer = self.offers.cancel(requester, offer_id)?;
        self.notifier.notify(Notification::OfferCancelled { offer: offer.clone() });
        Ok(offer)
    }

    pub fn accept(&self, acceptor_id: PartyId, offer_id: OfferId) -> Result<ExchangeReceipt> {
        self.engine.accept(acceptor_id, offer_id)
    }

    pub fn deposit(&self, owner: PartyId, item: ItemDescriptor, source_display_name: &str) {
        self.warehouse.deposit(owner, item, source_display_name);
    }

    pub fn warehouse_list(&self, owner: PartyId) -> Vec<WarehouseEntry> {
        self.warehouse.list(owner)
    }

    pub fn withdraw(&self, owner: PartyId, index: usize) -> Result<WarehouseEntry> {
        self.warehouse.withdraw(owner, index)
    }

    pub fn reduce(&self, owner: PartyId, index: usize, amount: u64) -> Result<u64> {
        self.warehouse.reduce(owner, index, amount)
    }

    /// Moves a warehouse entry into the owner's live holdings. When the
    /// holdings have no room the entry goes back where it was, unchanged.
    pub fn claim(&self, owner: PartyId, index: usize) -> Result<WarehouseEntry> {
        let entry = self.warehouse.withdraw(owner, index)?;
        if self.inventory.credit(owner, &entry.item) {
            return Ok(entry);
        }

        warn!(owner = %owner, item = %entry.item, "No room in holdings, returning item to warehouse");
        let item = entry.item.clone();
        self.warehouse.restore(owner, index, entry);
        Err(BarterError::NoRoom(item))
    }

    pub fn total_items(&self, owner: PartyId) -> u64 {
        self.warehouse.total_items(owner)
    }

    /// Host tick entry point.
    pub fn on_tick(&self) -> Option<usize> {
        self.sweeper.on_tick()
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweeper.sweep_now()
    }

    pub fn flush(&self) -> Result<()> {
        self.offers.flush()?;
        self.warehouse.flush()
    }

    pub fn reload(&self) {
        self.offers.reload();
        self.warehouse.reload();
    }

    pub fn sweeper(&self) -> &ExpirationSweeper {
        &self.sweeper
    }

    pub fn offers(&self) -> &Arc<OfferStore> {
        &self.offers
    }

    pub fn warehouse(&self) -> &Arc<Warehouse> {
        &self.warehouse
    }

    fn is_blocked(&self, type_id: &str) -> bool {
        self.blocked_items.contains(&type_id.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ManualClock;
    use crate::ledger::HoldingsLedger;
    use crate::persistence::MemoryBackend;
    use parking_lot::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Notification>>,
    }

    impl Notifier for Recorder {
        fn notify(&self, notification: Notification) {
            self.events.lock().push(notification);
        }
    }

    fn setup() -> (BarterHouse, Arc<HoldingsLedger>, Arc<Recorder>) {
        let ledger = Arc::new(HoldingsLedger::new(64, Some(2)));
        let recorder = Arc::new(Recorder::default());
        let host = HostServices {
            inventory: ledger.clone(),
            directory: ledger.clone(),
            clock: Arc::new(ManualClock::default()),
            notifier: recorder.clone(),
        };
        let house = BarterHouse::open(&AppConfig::default(), Arc::new(MemoryBackend::new()), host);
        (house, ledger, recorder)
    }

    fn party(ledger: &HoldingsLedger, name: &str) -> PartyId {
        let id = Uuid::new_v4();
        ledger.add_party(id, name).unwrap();
        id
    }

    #[test]
    fn test_blocked_items_rejected() {
        let (house, ledger, recorder) = setup();
        let p1 = party(&ledger, "P1");

        let err = house
            .create_offer(p1, ItemDescriptor::new("minecraft:bedrock", 1), ItemDescriptor::new("minecraft:diamond", 1))
            .unwrap_err();
        assert!(matches!(err, BarterError::InvalidInput(_)));
        assert_eq!(house.total_active(), 0);
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_create_uses_directory_name_and_notifies() {
        let (house, ledger, recorder) = setup();
        let p1 = party(&ledger, "P1");

        let offer_id = house
            .create_offer(p1, ItemDescriptor::new("wood", 10), ItemDescriptor::new("diamond", 1))
            .unwrap();
        assert_eq!(house.get_offer(offer_id).unwrap().creator_display_name, "P1");
        assert!(matches!(recorder.events.lock()[0], Notification::OfferCreated { .. }));

        house.cancel_offer(p1, offer_id).unwrap();
        assert!(matches!(recorder.events.lock()[1], Notification::OfferCancelled { .. }));
        assert!(house.get_offer(offer_id).is_none());
    }

    #[test]
    fn test_claim_returns_item_when_holdings_full() {
        let (house, ledger, _) = setup();
        let p1 = party(&ledger, "P1");
        ledger.grant(p1, &ItemDescriptor::new("dirt", 128)).unwrap();

        house.deposit(p1, ItemDescriptor::new("wood", 10), "P2");
        house.deposit(p1, ItemDescriptor::new("stone", 3), "P3");
        let before = house.warehouse_list(p1);

        let err = house.claim(p1, 0).unwrap_err();
        assert!(matches!(err, BarterError::NoRoom(ref item) if *item == ItemDescriptor::new("wood", 10)));
        assert_eq!(house.warehouse_list(p1), before);

        ledger.debit(p1, &ItemDescriptor::new("dirt", 64));
        let entry = house.claim(p1, 0).unwrap();
        assert_eq!(entry, before[0]);
        assert_eq!(ledger.count(p1, &ItemDescriptor::new("wood", 1)), 10);
        assert_eq!(house.warehouse_list(p1), vec![before[1].clone()]);
    }

    #[test]
    fn test_failed_claim_keeps_receive_time() {
        let ledger = Arc::new(HoldingsLedger::new(64, Some(1)));
        let clock = Arc::new(ManualClock::default());
        let host = HostServices {
            inventory: ledger.clone(),
            directory: ledger.clone(),
            clock: clock.clone(),
            notifier: Arc::new(Recorder::default()),
        };
        let house = BarterHouse::open(&AppConfig::default(), Arc::new(MemoryBackend::new()), host);
        let p1 = party(&ledger, "P1");
        ledger.grant(p1, &ItemDescriptor::new("dirt", 64)).unwrap();

        house.deposit(p1, ItemDescriptor::new("wood", 10), "P2");
        let received_at = house.warehouse_list(p1)[0].received_at;
        clock.advance(chrono::Duration::hours(1));

        assert!(matches!(house.claim(p1, 0), Err(BarterError::NoRoom(_))));
        let entry = &house.warehouse_list(p1)[0];
        assert_eq!(entry.received_at, received_at);
        assert_eq!(entry.source_display_name, "P2");
    }

    #[test]
    fn test_reload_matches_saved_state() {
        let (house, ledger, _) = setup();
        let p1 = party(&ledger, "P1");
        let kept = house
            .create_offer(p1, ItemDescriptor::new("wood", 10), ItemDescriptor::new("diamond", 1))
            .unwrap();
        let dropped = house
            .create_offer(p1, ItemDescriptor::new("wood", 5), ItemDescriptor::new("emerald", 2))
            .unwrap();
        assert!(house.remove_offer(dropped).unwrap());
        assert!(!house.remove_offer(dropped).unwrap());

        house.deposit(p1, ItemDescriptor::new("stone", 9), "system");
        assert_eq!(house.reduce(p1, 0, 4).unwrap(), 5);

        house.reload();
        assert_eq!(house.list_active().len(), 1);
        assert!(house.get_offer(kept).is_some());
        assert_eq!(house.total_items(p1), 5);
    }

    #[test]
    fn test_tick_sweeps_on_configured_interval() {
        let (house, _, _) = setup();
        let interval = house.sweeper().interval_ticks();
        assert_eq!(interval, 1200);

        for _ in 1..interval {
            assert_eq!(house.on_tick(), None);
        }
        assert_eq!(house.on_tick(), Some(0));
    }
}
