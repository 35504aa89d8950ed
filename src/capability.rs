//! Capabilities the host provides to the core.
//!
//! The core never reaches into host state directly; it only calls these traits.
//! All of them must be callable from the command executor thread while the core
//! holds its per-offer lock, so implementations should not block on the network.

use crate::model::ItemDescriptor;
use crate::PartyId;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

#[cfg(test)]
use mockall::automock;

/// Live holdings of a party.
///
/// Item equality is `(type_id, extra)`; quantities are summed across every
/// physical slot the party holds, including anything held in hand.
#[cfg_attr(test, automock)]
pub trait InventoryCapability: Send + Sync {
    /// Total quantity of `item` the party currently holds.
    fn count(&self, party: PartyId, item: &ItemDescriptor) -> u64;

    /// Removes `item.quantity` of `item`. Returns false and changes nothing
    /// when the party does not hold enough.
    fn debit(&self, party: PartyId, item: &ItemDescriptor) -> bool;

    /// Adds `item` to the party's holdings. Returns false when it does not fit.
    fn credit(&self, party: PartyId, item: &ItemDescriptor) -> bool;

    fn has(&self, party: PartyId, item: &ItemDescriptor) -> bool {
        self.count(party, item) >= item.quantity
    }
}

#[cfg_attr(test, automock)]
pub trait PartyDirectory: Send + Sync {
    fn is_reachable(&self, party: PartyId) -> bool;
    fn display_name(&self, party: PartyId) -> String;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
