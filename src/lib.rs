//! # BarterHouse - asynchronous barter offers
//!
//! Parties publish time-bounded "I give X, I want Y" offers and any other party
//! can accept one atomically.
//!
//! ## Architecture
//!
//! - **OfferStore**: keyed, crash-recoverable registry of live offers with a 7 day TTL
//! - **ExchangeEngine**: four-step swap between two parties with compensating rollback
//! - **Warehouse**: durable per-party inbox that receives the proceeds of every trade
//! - **ExpirationSweeper**: periodic eviction of expired offers and batched persistence
//! - **BarterHouse**: composition root wiring the above to the host capabilities

pub mod capability;
pub mod config;
pub mod error;
pub mod exchange;
pub mod house;
pub mod ledger;
pub mod model;
pub mod notify;
pub mod persistence;
pub mod store;
pub mod sweeper;
pub mod warehouse;

pub use capability::{Clock, InventoryCapability, ManualClock, PartyDirectory, SystemClock};
pub use config::AppConfig;
pub use error::{BarterError, Result};
pub use exchange::{ExchangeEngine, ExchangeReceipt};
pub use house::{BarterHouse, HostServices};
pub use ledger::HoldingsLedger;
pub use model::{ItemDescriptor, Offer, WarehouseEntry};
pub use notify::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use persistence::{JsonFileBackend, MemoryBackend, PersistenceBackend, PersistenceError};
pub use store::OfferStore;
pub use sweeper::ExpirationSweeper;
pub use warehouse::{Custody, Warehouse};

pub type OfferId = uuid::Uuid;
pub type PartyId = uuid::Uuid;
