use thiserror::Error;
use crate::exchange::{CompensationReport, SwapStep};
use crate::model::ItemDescriptor;
use crate::persistence::PersistenceError;
use crate::{OfferId, PartyId};

pub type Result<T> = std::result::Result<T, BarterError>;

#[derive(Error, Debug)]
pub enum BarterError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Offer not found: {0}")]
    OfferNotFound(OfferId),

    #[error("Warehouse index {index} out of range (entries: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not enough room in holdings for {0}")]
    NoRoom(ItemDescriptor),

    #[error("Cannot accept your own offer")]
    SelfAcceptNotAllowed,

    #[error("Party {party} is not the creator of offer {offer}")]
    Unauthorized { party: PartyId, offer: OfferId },

    #[error("Counterparty unavailable: {0}")]
    CounterpartyUnavailable(PartyId),

    #[error("Insufficient items: required {required}, have {have}, missing {missing}")]
    InsufficientFunds { required: u64, have: u64, missing: u64 },

    #[error("Offer creator no longer holds the offered items: required {required}, have {have}")]
    CounterpartyInsufficientFunds { required: u64, have: u64 },

    #[error("Exchange for offer {offer_id} failed at {step}; all prior steps were rolled back")]
    ExchangeFailed { offer_id: OfferId, step: SwapStep },

    #[error("Exchange for offer {offer_id} failed at {step} and rollback was incomplete: {report}")]
    ExchangeInconsistent {
        offer_id: OfferId,
        step: SwapStep,
        report: CompensationReport,
    },

    #[error("Offer {offer_id} changed in memory but was not saved: {reason}")]
    Unsaved { offer_id: OfferId, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl BarterError {
    /// True when the operation took effect in memory and only its write failed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BarterError::Unsaved { .. } | BarterError::Persistence(_))
    }
}

impl From<serde_json::Error> for BarterError {
    fn from(err: serde_json::Error) -> Self {
        BarterError::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for BarterError {
    fn from(err: uuid::Error) -> Self {
        BarterError::InvalidInput(err.to_string())
    }
}

impl From<std::io::Error> for BarterError {
    fn from(err: std::io::Error) -> Self {
        BarterError::Io(err.to_string())
    }
}
