use crate::capability::Clock;
use crate::model::{ItemDescriptor, WarehouseEntry};
use crate::persistence::{PersistenceBackend, WarehouseMap};
use crate::{BarterError, PartyId, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

/// Where the exchange engine places proceeds.
#[cfg_attr(test, automock)]
pub trait Custody: Send + Sync {
    /// Credits `item` to `owner`. Returns false if it could not be held.
    fn deposit(&self, owner: PartyId, item: &ItemDescriptor, source_display_name: &str) -> bool;

    /// Takes back a previously deposited `item` from `owner`.
    fn reclaim(&self, owner: PartyId, item: &ItemDescriptor) -> bool;
}

/// Per-party inbox for items owed from trades.
///
/// Every mutation rewrites the whole map; write failures are logged and the
/// in-memory state stays authoritative.
pub struct Warehouse {
    entries: Mutex<WarehouseMap>,
    save_lock: Mutex<()>,
    backend: Arc<dyn PersistenceBackend>,
    clock: Arc<dyn Clock>,
}

impl Warehouse {
    pub fn open(backend: Arc<dyn PersistenceBackend>, clock: Arc<dyn Clock>) -> Self {
        let warehouse = Self {
            entries: Mutex::new(WarehouseMap::new()),
            save_lock: Mutex::new(()),
            backend,
            clock,
        };
        warehouse.load();
        warehouse
    }

    /// Stacks onto a matching entry or appends a new one. Never fails.
    pub fn deposit(&self, owner: PartyId, item: ItemDescriptor, source_display_name: &str) {
        if item.quantity == 0 {
            warn!(owner = %owner, item = %item.type_id, "Ignoring empty warehouse deposit");
            return;
        }

        {
            let mut entries = self.entries.lock();
            let owned = entries.entry(owner).or_default();
            match owned.iter_mut().find(|entry| entry.item.stacks_with(&item)) {
                Some(entry) => entry.item.quantity = entry.item.quantity.saturating_add(item.quantity),
                None => owned.push(WarehouseEntry {
                    owner_id: owner,
                    item: item.clone(),
                    received_at: self.clock.now(),
                    source_display_name: source_display_name.to_string(),
                }),
            }
        }

        info!(owner = %owner, source = source_display_name, "Added {} to warehouse", item);
        self.save();
    }

    /// Entries in insertion order.
    pub fn list(&self, owner: PartyId) -> Vec<WarehouseEntry> {
        self.entries.lock().get(&owner).cloned().unwrap_or_default()
    }

    /// Removes the whole entry at `index`.
    pub fn withdraw(&self, owner: PartyId, index: usize) -> Result<WarehouseEntry> {
        let entry = {
            let mut entries = self.entries.lock();
            let owned = entries.get_mut(&owner);
            let len = owned.as_ref().map_or(0, |owned| owned.len());
            let owned = match owned {
                Some(owned) if index < owned.len() => owned,
                _ => return Err(BarterError::IndexOutOfRange { index, len }),
            };
            let entry = owned.remove(index);
            if owned.is_empty() {
                entries.remove(&owner);
            }
            entry
        };

        info!(owner = %owner, "Withdrew {} from warehouse", entry.item);
        self.save();
        Ok(entry)
    }

    /// Partial withdrawal. Returns the quantity left; an entry that reaches
    /// zero is deleted.
    /// Puts a withdrawn entry back at `index`, or at the end when the list
    /// has since shrunk. The entry keeps its source and receive time.
    pub fn restore(&self, owner: PartyId, index: usize, entry: WarehouseEntry) {
        {
            let mut entries = self.entries.lock();
            let owned = entries.entry(owner).or_default();
            let at = index.min(owned.len());
            owned.insert(at, entry);
        }

        info!(owner = %owner, index, "Restored warehouse entry");
        self.save();
    }

    pub fn reduce(&self, owner: PartyId, index: usize, amount: u64) -> Result<u64> {
        let remaining = reduce_entry(&mut self.entries.lock(), owner, index, amount)?;

        info!(owner = %owner, index, amount, remaining, "Reduced warehouse entry");
        self.save();
        Ok(remaining)
    }

    pub fn total_items(&self, owner: PartyId) -> u64 {
        self.entries
            .lock()
            .get(&owner)
            .map_or(0, |owned| owned.iter().map(|entry| entry.item.quantity).sum())
    }

    pub fn flush(&self) -> Result<()> {
        let snapshot = {
            let _guard = self.save_lock.lock();
            let snapshot = self.entries.lock().clone();
            self.backend.save_warehouse(&snapshot)?;
            snapshot
        };
        info!(owners = snapshot.len(), "Saved warehouse");
        Ok(())
    }

    pub fn reload(&self) {
        self.entries.lock().clear();
        self.load();
        info!("Warehouse reloaded");
    }

    fn load(&self) {
        match self.backend.load_warehouse() {
            Ok(loaded) => {
                let mut entries = self.entries.lock();
                *entries = loaded;
                entries.retain(|_, owned| !owned.is_empty());
                info!(owners = entries.len(), "Loaded warehouse data");
            }
            Err(e) => warn!(error = %e, "Failed to load warehouse; starting empty"),
        }
    }

    fn save(&self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "Failed to save warehouse");
        }
    }
}

impl Custody for Warehouse {
    fn deposit(&self, owner: PartyId, item: &ItemDescriptor, source_display_name: &str) -> bool {
        Warehouse::deposit(self, owner, item.clone(), source_display_name);
        true
    }

    fn reclaim(&self, owner: PartyId, item: &ItemDescriptor) -> bool {
        let reclaimed = {
            let mut entries = self.entries.lock();
            let index = entries.get(&owner).and_then(|owned| {
                owned
                    .iter()
                    .position(|entry| entry.item.stacks_with(item) && entry.item.quantity >= item.quantity)
            });
            match index {
                Some(index) => reduce_entry(&mut entries, owner, index, item.quantity).is_ok(),
                None => false,
            }
        };

        if reclaimed {
            info!(owner = %owner, "Reclaimed {} from warehouse", item);
            self.save();
        }
        reclaimed
    }
}

/// Takes `amount` from one entry, dropping it at zero and dropping the
/// owner once nothing is left.
fn reduce_entry(entries: &mut WarehouseMap, owner: PartyId, index: usize, amount: u64) -> Result<u64> {
    let owned = entries.get_mut(&owner);
    let len = owned.as_ref().map_or(0, |owned| owned.len());
    let owned = match owned {
        Some(owned) if index < owned.len() => owned,
        _ => return Err(BarterError::IndexOutOfRange { index, len }),
    };

    let remaining = owned[index].item.quantity.saturating_sub(amount);
    if remaining == 0 {
        owned.remove(index);
        if owned.is_empty() {
            entries.remove(&owner);
        }
    } else {
        owned[index].item.quantity = remaining;
    }
    Ok(remaining)
}
