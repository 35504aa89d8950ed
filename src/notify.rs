use crate::exchange::ExchangeReceipt;
use crate::model::Offer;
use crate::{PartyId, Result};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawReason {
    CreatorUnavailable,
    CreatorLacksItems,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    OfferCreated {
        offer: Offer,
    },
    OfferAccepted {
        receipt: ExchangeReceipt,
    },
    OfferCancelled {
        offer: Offer,
    },
    /// The house removed an offer on its own during an accept attempt.
    OfferWithdrawn {
        offer: Offer,
        acceptor_id: PartyId,
        reason: WithdrawReason,
    },
}

impl Notification {
    /// Parties the event should be shown to.
    pub fn recipients(&self) -> Vec<PartyId> {
        match self {
            Notification::OfferCreated { offer } | Notification::OfferCancelled { offer } => {
                vec![offer.creator_id]
            }
            Notification::OfferAccepted { receipt } => vec![receipt.acceptor_id, receipt.creator_id],
            Notification::OfferWithdrawn { offer, acceptor_id, .. } => vec![offer.creator_id, *acceptor_id],
        }
    }

    pub fn message(&self) -> String {
        match self {
            Notification::OfferCreated { offer } => format!(
                "New offer from {}: {} for {}",
                offer.creator_display_name, offer.offered_item, offer.requested_item
            ),
            Notification::OfferAccepted { receipt } => format!(
                "{} accepted {}'s offer: {} for {}",
                receipt.acceptor_display_name,
                receipt.creator_display_name,
                receipt.acceptor_received,
                receipt.creator_received
            ),
            Notification::OfferCancelled { offer } => {
                format!("{} cancelled the offer of {}", offer.creator_display_name, offer.offered_item)
            }
            Notification::OfferWithdrawn { offer, reason, .. } => match reason {
                WithdrawReason::CreatorUnavailable => format!(
                    "Offer {} was withdrawn because {} is unavailable",
                    offer.id, offer.creator_display_name
                ),
                WithdrawReason::CreatorLacksItems => format!(
                    "Offer {} was withdrawn because {} no longer holds {}",
                    offer.id, offer.creator_display_name, offer.offered_item
                ),
            },
        }
    }
}

/// Receives events from the core. Implementations must return quickly and
/// must not call back into the house.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        let recipients: Vec<String> = notification.recipients().iter().map(|p| p.to_string()).collect();
        tracing::info!(recipients = ?recipients, "{}", notification.message());
    }
}

#[derive(Default, Clone)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(notification.clone());
        }
    }
}

/// Posts created and accepted offers to a Discord-compatible webhook.
///
/// Delivery runs on the given runtime; failures are only logged.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
    runtime: Handle,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, timeout: Duration, runtime: Handle) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("BarterHouse")
            .build()?;

        Ok(Self {
            client,
            webhook_url,
            runtime,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.webhook_url
    }
}

pub fn webhook_payload(notification: &Notification) -> Option<serde_json::Value> {
    let headline = match notification {
        Notification::OfferCreated { .. } => "New offer on BarterHouse",
        Notification::OfferAccepted { .. } => "Offer accepted on BarterHouse",
        _ => return None,
    };

    Some(serde_json::json!({
        "username": "BarterHouse",
        "content": format!("**{}**\n{}", headline, notification.message()),
    }))
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        let Some(payload) = webhook_payload(&notification) else {
            return;
        };

        let client = self.client.clone();
        let url = self.webhook_url.clone();
        self.runtime.spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("Webhook notification delivered");
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "Webhook rejected notification");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to send webhook notification");
                }
            }
        });
    }
}
