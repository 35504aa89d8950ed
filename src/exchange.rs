//! Offer acceptance.
//!
//! A swap is four independent sub-steps. When one fails, the completed ones
//! are undone in reverse order. Undo is best effort: if a compensation fails
//! the error says so and the incident is logged for manual reconciliation.

use crate::capability::{InventoryCapability, PartyDirectory};
use crate::model::{ItemDescriptor, Offer};
use crate::notify::{Notification, Notifier, WithdrawReason};
use crate::store::OfferStore;
use crate::warehouse::Custody;
use crate::{BarterError, OfferId, PartyId, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

const REFUND_SOURCE: &str = "BarterHouse refund";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
    DebitAcceptor,
    DebitCreator,
    CreditAcceptor,
    CreditCreator,
}

impl SwapStep {
    const ORDER: [SwapStep; 4] = [
        SwapStep::DebitAcceptor,
        SwapStep::DebitCreator,
        SwapStep::CreditAcceptor,
        SwapStep::CreditCreator,
    ];
}

impl fmt::Display for SwapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapStep::DebitAcceptor => "debit acceptor",
            SwapStep::DebitCreator => "debit creator",
            SwapStep::CreditAcceptor => "credit acceptor warehouse",
            SwapStep::CreditCreator => "credit creator warehouse",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationAction {
    RefundAcceptor,
    RefundCreator,
    ReclaimAcceptorCredit,
    ReclaimCreatorCredit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompensationReport {
    pub succeeded: Vec<CompensationAction>,
    pub failed: Vec<CompensationAction>,
}

impl CompensationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for CompensationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "succeeded {:?}, failed {:?}", self.succeeded, self.failed)
    }
}

/// Outcome of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeReceipt {
    pub offer_id: OfferId,
    pub acceptor_id: PartyId,
    pub acceptor_display_name: String,
    pub creator_id: PartyId,
    pub creator_display_name: String,
    /// Delivered to the acceptor's warehouse.
    pub acceptor_received: ItemDescriptor,
    /// Delivered to the creator's warehouse.
    pub creator_received: ItemDescriptor,
}

pub struct ExchangeEngine {
    offers: Arc<OfferStore>,
    custody: Arc<dyn Custody>,
    inventory: Arc<dyn InventoryCapability>,
    directory: Arc<dyn PartyDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl ExchangeEngine {
    pub fn new(
        offers: Arc<OfferStore>,
        custody: Arc<dyn Custody>,
        inventory: Arc<dyn InventoryCapability>,
        directory: Arc<dyn PartyDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            offers,
            custody,
            inventory,
            directory,
            notifier,
        }
    }

    /// Swaps the offered item for the requested one.
    ///
    /// Runs under the offer's lock from lookup to removal, so of two racing
    /// acceptors one succeeds and the other sees `OfferNotFound`.
    pub fn accept(&self, acceptor_id: PartyId, offer_id: OfferId) -> Result<ExchangeReceipt> {
        let lock = self.offers.offer_lock(offer_id);
        let outcome = {
            let _guard = lock.lock();
            self.accept_locked(acceptor_id, offer_id)
        };
        self.offers.release_offer_lock(offer_id);
        outcome
    }

    fn accept_locked(&self, acceptor_id: PartyId, offer_id: OfferId) -> Result<ExchangeReceipt> {
        let offer = self
            .offers
            .get(offer_id)
            .ok_or(BarterError::OfferNotFound(offer_id))?;

        if acceptor_id == offer.creator_id {
            return Err(BarterError::SelfAcceptNotAllowed);
        }

        if !self.directory.is_reachable(offer.creator_id) {
            warn!(offer_id = %offer_id, creator = %offer.creator_id, "Creator unavailable, withdrawing offer");
            self.withdraw(&offer, acceptor_id, WithdrawReason::CreatorUnavailable);
            return Err(BarterError::CounterpartyUnavailable(offer.creator_id));
        }

        let required = offer.requested_item.quantity;
        let have = self.inventory.count(acceptor_id, &offer.requested_item);
        if have < required {
            info!(offer_id = %offer_id, acceptor = %acceptor_id, required, have, "Acceptor lacks requested items");
            return Err(BarterError::InsufficientFunds {
                required,
                have,
                missing: required - have,
            });
        }

        let offered = offer.offered_item.quantity;
        let creator_has = self.inventory.count(offer.creator_id, &offer.offered_item);
        if creator_has < offered {
            warn!(offer_id = %offer_id, creator = %offer.creator_id, "Creator no longer holds offered items, withdrawing offer");
            self.withdraw(&offer, acceptor_id, WithdrawReason::CreatorLacksItems);
            return Err(BarterError::CounterpartyInsufficientFunds {
                required: offered,
                have: creator_has,
            });
        }

        let acceptor_display_name = self.directory.display_name(acceptor_id);
        self.swap(&offer, acceptor_id, &acceptor_display_name)?;

        match self.offers.remove_locked(offer_id) {
            Ok(true) => {}
            Ok(false) => warn!(offer_id = %offer_id, "Offer disappeared before removal after exchange"),
            Err(e) => warn!(offer_id = %offer_id, error = %e, "Exchange completed but offer removal was not saved"),
        }

        let receipt = ExchangeReceipt {
            offer_id,
            acceptor_id,
            acceptor_display_name,
            creator_id: offer.creator_id,
            creator_display_name: offer.creator_display_name.clone(),
            acceptor_received: offer.offered_item.clone(),
            creator_received: offer.requested_item.clone(),
        };

        info!(
            offer_id = %offer_id,
            acceptor = %acceptor_id,
            creator = %offer.creator_id,
            "Trade executed successfully"
        );
        self.notifier.notify(Notification::OfferAccepted {
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }

    fn swap(&self, offer: &Offer, acceptor_id: PartyId, acceptor_display_name: &str) -> Result<()> {
        let mut done = Vec::with_capacity(SwapStep::ORDER.len());

        for step in SwapStep::ORDER {
            let ok = match step {
                SwapStep::DebitAcceptor => self.inventory.debit(acceptor_id, &offer.requested_item),
                SwapStep::DebitCreator => self.inventory.debit(offer.creator_id, &offer.offered_item),
                SwapStep::CreditAcceptor => {
                    self.custody
                        .deposit(acceptor_id, &offer.offered_item, &offer.creator_display_name)
                }
                SwapStep::CreditCreator => {
                    self.custody
                        .deposit(offer.creator_id, &offer.requested_item, acceptor_display_name)
                }
            };

            if !ok {
                return Err(self.roll_back(offer, acceptor_id, step, &done));
            }
            done.push(step);
        }

        Ok(())
    }

    fn roll_back(&self, offer: &Offer, acceptor_id: PartyId, failed_step: SwapStep, done: &[SwapStep]) -> BarterError {
        let mut report = CompensationReport::default();

        for step in done.iter().rev() {
            let (action, ok) = match step {
                SwapStep::DebitAcceptor => (
                    CompensationAction::RefundAcceptor,
                    self.refund(acceptor_id, &offer.requested_item),
                ),
                SwapStep::DebitCreator => (
                    CompensationAction::RefundCreator,
                    self.refund(offer.creator_id, &offer.offered_item),
                ),
                SwapStep::CreditAcceptor => (
                    CompensationAction::ReclaimAcceptorCredit,
                    self.custody.reclaim(acceptor_id, &offer.offered_item),
                ),
                SwapStep::CreditCreator => (
                    CompensationAction::ReclaimCreatorCredit,
                    self.custody.reclaim(offer.creator_id, &offer.requested_item),
                ),
            };

            if ok {
                report.succeeded.push(action);
            } else {
                report.failed.push(action);
            }
        }

        if report.is_complete() {
            warn!(
                offer_id = %offer.id,
                step = %failed_step,
                compensations = ?report.succeeded,
                "Exchange failed; prior steps rolled back"
            );
            return BarterError::ExchangeFailed {
                offer_id: offer.id,
                step: failed_step,
            };
        }

        error!(
            offer_id = %offer.id,
            acceptor = %acceptor_id,
            creator = %offer.creator_id,
            offered = %offer.offered_item,
            requested = %offer.requested_item,
            step = %failed_step,
            succeeded = ?report.succeeded,
            failed = ?report.failed,
            "Exchange rollback incomplete; manual reconciliation required"
        );
        BarterError::ExchangeInconsistent {
            offer_id: offer.id,
            step: failed_step,
            report,
        }
    }

    /// Returns a debited item to live holdings, or to the warehouse when the
    /// holdings have no room.
    fn refund(&self, party: PartyId, item: &ItemDescriptor) -> bool {
        if self.inventory.credit(party, item) {
            return true;
        }
        warn!(party = %party, item = %item, "Refund did not fit in holdings, sending to warehouse");
        self.custody.deposit(party, item, REFUND_SOURCE)
    }

    fn withdraw(&self, offer: &Offer, acceptor_id: PartyId, reason: WithdrawReason) {
        if let Err(e) = self.offers.remove_locked(offer.id) {
            warn!(offer_id = %offer.id, error = %e, "Withdrawn offer removal was not saved");
        }
        self.notifier.notify(Notification::OfferWithdrawn {
            offer: offer.clone(),
            acceptor_id,
            reason,
        });
    }
}
