//! Slot-based holdings for hosts without their own inventory model.
//!
//! Each party owns a list of slots. A slot holds up to `stack_cap` of one
//! item; `slot_capacity` bounds how many slots a party may fill.

use crate::capability::{InventoryCapability, PartyDirectory};
use crate::model::ItemDescriptor;
use crate::persistence::{read_optional, write_atomic, PersistenceError};
use crate::{BarterError, PartyId, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

pub const HOLDINGS_FILE: &str = "holdings.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyHoldings {
    pub display_name: String,
    pub online: bool,
    pub slots: Vec<ItemDescriptor>,
}

impl PartyHoldings {
    fn count(&self, item: &ItemDescriptor) -> u64 {
        self.slots
            .iter()
            .filter(|slot| slot.stacks_with(item))
            .map(|slot| slot.quantity)
            .sum()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HoldingsDocument {
    version: u32,
    parties: BTreeMap<PartyId, PartyHoldings>,
}

pub struct HoldingsLedger {
    parties: Mutex<BTreeMap<PartyId, PartyHoldings>>,
    stack_cap: u64,
    slot_capacity: Option<usize>,
}

impl HoldingsLedger {
    pub fn new(stack_cap: u64, slot_capacity: Option<usize>) -> Self {
        Self {
            parties: Mutex::new(BTreeMap::new()),
            stack_cap: stack_cap.max(1),
            slot_capacity,
        }
    }

    /// Loads a ledger file; a missing file gives an empty ledger.
    pub fn load<P: AsRef<Path>>(path: P, stack_cap: u64, slot_capacity: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        let ledger = Self::new(stack_cap, slot_capacity);

        if let Some(raw) = read_optional(path)? {
            let document: HoldingsDocument =
                serde_json::from_str(&raw).map_err(|e| PersistenceError::Corrupt {
                    file: HOLDINGS_FILE.to_string(),
                    reason: e.to_string(),
                })?;
            if document.version != FORMAT_VERSION {
                return Err(PersistenceError::Corrupt {
                    file: HOLDINGS_FILE.to_string(),
                    reason: format!("unsupported format version {}", document.version),
                }
                .into());
            }
            *ledger.parties.lock() = document.parties;
        }

        info!(path = %path.display(), parties = ledger.parties.lock().len(), "Loaded holdings");
        Ok(ledger)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let document = HoldingsDocument {
            version: FORMAT_VERSION,
            parties: self.parties.lock().clone(),
        };
        let payload = serde_json::to_string_pretty(&document)?;
        write_atomic(path.as_ref(), &payload)?;
        Ok(())
    }

    /// Registers a party. Names are unique, ignoring case.
    pub fn add_party(&self, party: PartyId, display_name: &str) -> Result<()> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(BarterError::InvalidInput("Display name cannot be empty".to_string()));
        }

        let mut parties = self.parties.lock();
        if parties.contains_key(&party) || parties.values().any(|p| p.display_name.eq_ignore_ascii_case(name)) {
            return Err(BarterError::InvalidInput(format!("Party {} already exists", name)));
        }

        parties.insert(
            party,
            PartyHoldings {
                display_name: name.to_string(),
                online: true,
                slots: Vec::new(),
            },
        );
        info!(party = %party, name, "Registered party");
        Ok(())
    }

    /// Resolves a party by id or display name.
    pub fn resolve(&self, id_or_name: &str) -> Option<PartyId> {
        let parties = self.parties.lock();
        if let Ok(id) = id_or_name.parse::<PartyId>() {
            return parties.contains_key(&id).then_some(id);
        }
        parties
            .iter()
            .find(|(_, p)| p.display_name.eq_ignore_ascii_case(id_or_name))
            .map(|(id, _)| *id)
    }

    pub fn holdings(&self, party: PartyId) -> Option<PartyHoldings> {
        self.parties.lock().get(&party).cloned()
    }

    pub fn parties(&self) -> Vec<(PartyId, PartyHoldings)> {
        self.parties.lock().iter().map(|(id, p)| (*id, p.clone())).collect()
    }

    pub fn set_online(&self, party: PartyId, online: bool) -> Result<()> {
        let mut parties = self.parties.lock();
        let holdings = parties
            .get_mut(&party)
            .ok_or_else(|| BarterError::InvalidInput(format!("Unknown party {}", party)))?;
        holdings.online = online;
        debug!(party = %party, online, "Party reachability changed");
        Ok(())
    }

    /// Adds items to a party's slots, failing when they do not fit.
    pub fn grant(&self, party: PartyId, item: &ItemDescriptor) -> Result<()> {
        item.validate()?;
        if !self.parties.lock().contains_key(&party) {
            return Err(BarterError::InvalidInput(format!("Unknown party {}", party)));
        }
        if !self.credit(party, item) {
            return Err(BarterError::NoRoom(item.clone()));
        }
        Ok(())
    }

    fn slots_needed(&self, slots: &[ItemDescriptor], item: &ItemDescriptor) -> usize {
        let room: u64 = slots
            .iter()
            .filter(|slot| slot.stacks_with(item))
            .map(|slot| self.stack_cap.saturating_sub(slot.quantity))
            .sum();
        let overflow = item.quantity.saturating_sub(room);
        overflow.div_ceil(self.stack_cap) as usize
    }
}

impl InventoryCapability for HoldingsLedger {
    fn count(&self, party: PartyId, item: &ItemDescriptor) -> u64 {
        self.parties.lock().get(&party).map_or(0, |p| p.count(item))
    }

    fn debit(&self, party: PartyId, item: &ItemDescriptor) -> bool {
        let mut parties = self.parties.lock();
        let Some(holdings) = parties.get_mut(&party) else {
            return false;
        };
        if holdings.count(item) < item.quantity {
            return false;
        }

        // Later slots are emptied first.
        let mut remaining = item.quantity;
        for slot in holdings.slots.iter_mut().rev() {
            if remaining == 0 {
                break;
            }
            if slot.stacks_with(item) {
                let taken = slot.quantity.min(remaining);
                slot.quantity -= taken;
                remaining -= taken;
            }
        }
        holdings.slots.retain(|slot| slot.quantity > 0);
        true
    }

    fn credit(&self, party: PartyId, item: &ItemDescriptor) -> bool {
        let mut parties = self.parties.lock();
        let Some(holdings) = parties.get_mut(&party) else {
            return false;
        };

        let needed = self.slots_needed(&holdings.slots, item);
        if let Some(capacity) = self.slot_capacity {
            if holdings.slots.len() + needed > capacity {
                return false;
            }
        }

        let mut remaining = item.quantity;
        for slot in holdings.slots.iter_mut().filter(|slot| slot.stacks_with(item)) {
            let added = self.stack_cap.saturating_sub(slot.quantity).min(remaining);
            slot.quantity += added;
            remaining -= added;
        }
        while remaining > 0 {
            let added = remaining.min(self.stack_cap);
            holdings.slots.push(item.with_quantity(added));
            remaining -= added;
        }
        true
    }
}

impl PartyDirectory for HoldingsLedger {
    fn is_reachable(&self, party: PartyId) -> bool {
        self.parties.lock().get(&party).is_some_and(|p| p.online)
    }

    fn display_name(&self, party: PartyId) -> String {
        self.parties
            .lock()
            .get(&party)
            .map_or_else(|| party.to_string(), |p| p.display_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn ledger_with_party(slots: Option<usize>) -> (HoldingsLedger, PartyId) {
        let ledger = HoldingsLedger::new(64, slots);
        let party = Uuid::new_v4();
        ledger.add_party(party, "P1").unwrap();
        (ledger, party)
    }

    #[test]
    fn test_credit_splits_into_capped_slots() {
        let (ledger, party) = ledger_with_party(None);
        assert!(ledger.credit(party, &ItemDescriptor::new("stone", 150)));

        let quantities: Vec<u64> = ledger.holdings(party).unwrap().slots.iter().map(|s| s.quantity).collect();
        assert_eq!(quantities, vec![64, 64, 22]);
        assert_eq!(ledger.count(party, &ItemDescriptor::new("stone", 1)), 150);
    }

    #[test]
    fn test_credit_respects_slot_capacity() {
        let (ledger, party) = ledger_with_party(Some(2));
        assert!(ledger.credit(party, &ItemDescriptor::new("stone", 100)));
        assert!(!ledger.credit(party, &ItemDescriptor::new("dirt", 1)));
        // Fits into the partially filled stone slot.
        assert!(ledger.credit(party, &ItemDescriptor::new("stone", 28)));
        assert!(!ledger.credit(party, &ItemDescriptor::new("stone", 1)));
    }

    #[test]
    fn test_debit_is_all_or_nothing() {
        let (ledger, party) = ledger_with_party(None);
        ledger.grant(party, &ItemDescriptor::new("diamond", 3)).unwrap();

        assert!(!ledger.debit(party, &ItemDescriptor::new("diamond", 4)));
        assert_eq!(ledger.count(party, &ItemDescriptor::new("diamond", 1)), 3);

        assert!(ledger.debit(party, &ItemDescriptor::new("diamond", 3)));
        assert!(ledger.holdings(party).unwrap().slots.is_empty());
        assert!(!ledger.has(party, &ItemDescriptor::new("diamond", 1)));
    }

    #[test]
    fn test_extra_keeps_items_apart() {
        let (ledger, party) = ledger_with_party(None);
        ledger.grant(party, &ItemDescriptor::new("sword", 1).with_extra(vec![1])).unwrap();

        assert_eq!(ledger.count(party, &ItemDescriptor::new("sword", 1)), 0);
        assert!(!ledger.debit(party, &ItemDescriptor::new("sword", 1)));
    }

    #[test]
    fn test_directory_tracks_reachability() {
        let (ledger, party) = ledger_with_party(None);
        assert!(ledger.is_reachable(party));
        assert_eq!(ledger.display_name(party), "P1");

        ledger.set_online(party, false).unwrap();
        assert!(!ledger.is_reachable(party));
        assert!(!ledger.is_reachable(Uuid::new_v4()));
        assert_eq!(ledger.resolve("p1"), Some(party));
        assert!(ledger.add_party(Uuid::new_v4(), "p1").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HOLDINGS_FILE);
        let (ledger, party) = ledger_with_party(None);
        ledger.grant(party, &ItemDescriptor::new("wood", 10)).unwrap();
        ledger.save(&path).unwrap();

        let loaded = HoldingsLedger::load(&path, 64, None).unwrap();
        assert_eq!(loaded.holdings(party), ledger.holdings(party));

        let empty = HoldingsLedger::load(dir.path().join("missing.json"), 64, None).unwrap();
        assert!(empty.parties().is_empty());
    }
}
