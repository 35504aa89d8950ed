use barterhouse::{
    error::Result, AppConfig, BarterError, BarterHouse, Clock, HoldingsLedger, HostServices, InventoryCapability,
    ItemDescriptor, JsonFileBackend, LogNotifier, ManualClock, MemoryBackend, PartyId, PersistenceBackend,
};
use barterhouse::model::{offer_ttl, Offer};
use chrono::Duration;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

struct TestHouse {
    house: BarterHouse,
    ledger: Arc<HoldingsLedger>,
    clock: Arc<ManualClock>,
}

fn open_house(backend: Arc<dyn PersistenceBackend>, ledger: Arc<HoldingsLedger>, clock: Arc<ManualClock>) -> TestHouse {
    let host = HostServices {
        inventory: ledger.clone(),
        directory: ledger.clone(),
        clock: clock.clone(),
        notifier: Arc::new(LogNotifier),
    };
    let house = BarterHouse::open(&AppConfig::default(), backend, host);
    TestHouse { house, ledger, clock }
}

fn setup_test_house() -> TestHouse {
    open_house(
        Arc::new(MemoryBackend::new()),
        Arc::new(HoldingsLedger::new(64, None)),
        Arc::new(ManualClock::default()),
    )
}

fn add_party(ledger: &HoldingsLedger, name: &str) -> Result<PartyId> {
    let id = Uuid::new_v4();
    ledger.add_party(id, name)?;
    Ok(id)
}

fn wood() -> ItemDescriptor {
    ItemDescriptor::new("wood", 10)
}

fn diamond() -> ItemDescriptor {
    ItemDescriptor::new("diamond", 1)
}

#[tokio::test]
async fn test_scenario_a_successful_exchange() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    t.ledger.grant(p1, &wood())?;
    t.ledger.grant(p2, &diamond())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;
    let receipt = t.house.accept(p2, offer_id)?;
    assert_eq!(receipt.acceptor_received, wood());
    assert_eq!(receipt.creator_received, diamond());

    assert!(t.house.get_offer(offer_id).is_none());

    let p2_entries = t.house.warehouse_list(p2);
    assert_eq!(p2_entries.len(), 1);
    assert_eq!(p2_entries[0].item, wood());
    assert_eq!(p2_entries[0].source_display_name, "P1");

    let p1_entries = t.house.warehouse_list(p1);
    assert_eq!(p1_entries.len(), 1);
    assert_eq!(p1_entries[0].item, diamond());
    assert_eq!(p1_entries[0].source_display_name, "P2");

    // Live holdings were debited on both sides.
    assert_eq!(t.ledger.count(p1, &wood()), 0);
    assert_eq!(t.ledger.count(p2, &diamond()), 0);

    Ok(())
}

#[tokio::test]
async fn test_scenario_b_insufficient_funds_mutates_nothing() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    t.ledger.grant(p1, &wood())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;
    let err = t.house.accept(p2, offer_id).unwrap_err();
    assert!(matches!(
        err,
        BarterError::InsufficientFunds {
            required: 1,
            have: 0,
            missing: 1
        }
    ));

    assert!(t.house.get_offer(offer_id).is_some());
    assert!(t.house.warehouse_list(p1).is_empty());
    assert!(t.house.warehouse_list(p2).is_empty());
    assert_eq!(t.ledger.count(p1, &wood()), 10);

    Ok(())
}

#[tokio::test]
async fn test_scenario_c_and_d_warehouse() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;

    t.house.deposit(p1, ItemDescriptor::new("stone", 5), "system");
    t.house.deposit(p1, ItemDescriptor::new("stone", 3), "system");
    let entries = t.house.warehouse_list(p1);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].item.quantity, 8);

    let entry = t.house.withdraw(p1, 0)?;
    assert_eq!(entry.item, ItemDescriptor::new("stone", 8));
    assert!(t.house.warehouse_list(p1).is_empty());
    assert!(matches!(
        t.house.withdraw(p1, 0),
        Err(BarterError::IndexOutOfRange { index: 0, .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_self_accept_and_unknown_offer() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    t.ledger.grant(p1, &wood())?;
    t.ledger.grant(p1, &diamond())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;
    assert!(matches!(t.house.accept(p1, offer_id), Err(BarterError::SelfAcceptNotAllowed)));
    assert!(t.house.get_offer(offer_id).is_some());

    let unknown = Uuid::new_v4();
    assert!(matches!(t.house.accept(p2, unknown), Err(BarterError::OfferNotFound(id)) if id == unknown));
    assert_eq!(t.ledger.count(p1, &diamond()), 1);

    Ok(())
}

#[tokio::test]
async fn test_expired_offer_cannot_be_accepted() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    t.ledger.grant(p1, &wood())?;
    t.ledger.grant(p2, &diamond())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;
    t.clock.advance(offer_ttl() + Duration::seconds(1));

    assert!(t.house.list_active().is_empty());
    assert!(matches!(t.house.accept(p2, offer_id), Err(BarterError::OfferNotFound(_))));
    assert_eq!(t.ledger.count(p2, &diamond()), 1);
    assert_eq!(t.house.sweep_expired(), 0);

    Ok(())
}

#[tokio::test]
async fn test_offline_creator_withdraws_offer() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    t.ledger.grant(p1, &wood())?;
    t.ledger.grant(p2, &diamond())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;
    t.ledger.set_online(p1, false)?;

    assert!(matches!(
        t.house.accept(p2, offer_id),
        Err(BarterError::CounterpartyUnavailable(id)) if id == p1
    ));
    assert!(t.house.get_offer(offer_id).is_none());
    assert_eq!(t.ledger.count(p2, &diamond()), 1);

    Ok(())
}

#[tokio::test]
async fn test_creator_spent_items_withdraws_offer() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    t.ledger.grant(p1, &wood())?;
    t.ledger.grant(p2, &diamond())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;
    assert!(t.ledger.debit(p1, &ItemDescriptor::new("wood", 4)));

    assert!(matches!(
        t.house.accept(p2, offer_id),
        Err(BarterError::CounterpartyInsufficientFunds { required: 10, have: 6 })
    ));
    assert!(t.house.get_offer(offer_id).is_none());
    assert_eq!(t.ledger.count(p2, &diamond()), 1);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_accept_has_single_winner() -> Result<()> {
    let t = setup_test_house();
    let p1 = add_party(&t.ledger, "P1")?;
    let p2 = add_party(&t.ledger, "P2")?;
    let p3 = add_party(&t.ledger, "P3")?;
    t.ledger.grant(p1, &wood())?;
    t.ledger.grant(p2, &diamond())?;
    t.ledger.grant(p3, &diamond())?;

    let offer_id = t.house.create_offer(p1, wood(), diamond())?;

    let house = &t.house;
    let results: Vec<Result<_>> = std::thread::scope(|scope| {
        let handles: Vec<_> = [p2, p3]
            .into_iter()
            .map(|acceptor| scope.spawn(move || house.accept(acceptor, offer_id)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("accept thread panicked"))
            .collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BarterError::OfferNotFound(id)) if *id == offer_id)));

    assert!(t.house.get_offer(offer_id).is_none());
    assert_eq!(t.house.total_items(p1), 1);
    assert_eq!(t.house.total_items(p2) + t.house.total_items(p3), 10);
    assert_eq!(t.ledger.count(p2, &diamond()) + t.ledger.count(p3, &diamond()), 1);

    Ok(())
}

#[tokio::test]
async fn test_offers_round_trip_with_extra_bytes() -> Result<()> {
    let backend = MemoryBackend::new();
    let clock = ManualClock::default();
    let big = ItemDescriptor::new("diamond", 640).with_extra(vec![0x00, 0xff, 0x10, 0x80]);
    let offers = vec![
        Offer::new(Uuid::new_v4(), "P1".to_string(), wood(), big, clock.now()),
        Offer::new(Uuid::new_v4(), "P2".to_string(), diamond(), wood(), clock.now()),
    ];

    backend.save_offers(&offers)?;
    let loaded = backend.load_offers()?;
    backend.save_offers(&loaded)?;
    let reloaded = backend.load_offers()?;

    assert_eq!(reloaded, offers);

    Ok(())
}

#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let ledger = Arc::new(HoldingsLedger::new(64, None));
    let clock = Arc::new(ManualClock::default());
    let p1 = add_party(&ledger, "P1")?;
    let p2 = add_party(&ledger, "P2")?;
    ledger.grant(p1, &wood())?;
    ledger.grant(p1, &ItemDescriptor::new("stone", 2))?;
    ledger.grant(p2, &diamond())?;

    let (kept, traded) = {
        let t = open_house(Arc::new(JsonFileBackend::new(dir.path())?), ledger.clone(), clock.clone());
        let kept = t.house.create_offer(p1, ItemDescriptor::new("stone", 2), diamond())?;
        let traded = t.house.create_offer(p1, wood(), diamond())?;
        t.house.accept(p2, traded)?;
        (kept, traded)
    };

    let t = open_house(Arc::new(JsonFileBackend::new(dir.path())?), ledger, clock);
    assert!(t.house.get_offer(kept).is_some());
    assert!(t.house.get_offer(traded).is_none());
    assert_eq!(t.house.total_active(), 1);
    assert_eq!(t.house.warehouse_list(p2)[0].item, wood());
    assert_eq!(t.house.warehouse_list(p1)[0].source_display_name, "P2");

    Ok(())
}

#[tokio::test]
async fn test_sweep_persists_removal() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let t = open_house(
        backend.clone(),
        Arc::new(HoldingsLedger::new(64, None)),
        Arc::new(ManualClock::default()),
    );
    let p1 = add_party(&t.ledger, "P1")?;
    t.house.create_offer(p1, wood(), diamond())?;
    t.clock.advance(offer_ttl() + Duration::seconds(1));
    t.house.create_offer(p1, diamond(), wood())?;

    assert_eq!(t.house.sweep_expired(), 1);
    assert_eq!(backend.load_offers()?.len(), 1);

    Ok(())
}
