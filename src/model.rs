use crate::{BarterError, OfferId, PartyId, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Offers expire seven days after creation.
pub const OFFER_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

pub fn offer_ttl() -> Duration {
    Duration::seconds(OFFER_TTL_SECONDS)
}

/// An item type and a logical quantity.
///
/// `extra` carries host metadata that must survive persistence byte for byte,
/// e.g. a quantity larger than the host's per-stack cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    pub type_id: String,
    pub quantity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "extra_bytes")]
    pub extra: Option<Vec<u8>>,
}

impl ItemDescriptor {
    pub fn new(type_id: impl Into<String>, quantity: u64) -> Self {
        Self {
            type_id: type_id.into(),
            quantity,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Same item for stacking purposes: `(type_id, extra)` equal, quantity ignored.
    pub fn stacks_with(&self, other: &ItemDescriptor) -> bool {
        self.type_id == other.type_id && self.extra == other.extra
    }

    pub fn with_quantity(&self, quantity: u64) -> Self {
        Self {
            type_id: self.type_id.clone(),
            quantity,
            extra: self.extra.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.type_id.trim().is_empty() {
            return Err(BarterError::InvalidInput("Item type cannot be empty".to_string()));
        }
        if self.quantity == 0 {
            return Err(BarterError::InvalidInput(format!(
                "Quantity of {} must be greater than 0",
                self.type_id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ItemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x {}", self.quantity, self.type_id)
    }
}

/// Parses `type_id` or `type_id*quantity`, e.g. `minecraft:oak_log*10`.
impl FromStr for ItemDescriptor {
    type Err = BarterError;

    fn from_str(s: &str) -> Result<Self> {
        let (type_id, quantity) = match s.rsplit_once('*') {
            Some((type_id, qty)) => {
                let quantity = qty.trim().parse::<u64>().map_err(|e| {
                    BarterError::InvalidInput(format!("Invalid quantity '{}': {}", qty, e))
                })?;
                (type_id.trim(), quantity)
            }
            None => (s.trim(), 1),
        };

        let item = ItemDescriptor::new(type_id, quantity);
        item.validate()?;
        Ok(item)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub creator_id: PartyId,
    pub creator_display_name: String,
    pub offered_item: ItemDescriptor,
    pub requested_item: ItemDescriptor,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    pub fn new(
        creator_id: PartyId,
        creator_display_name: String,
        offered_item: ItemDescriptor,
        requested_item: ItemDescriptor,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator_id,
            creator_display_name,
            offered_item,
            requested_item,
            created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > offer_ttl()
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        let remaining = offer_ttl() - (now - self.created_at);
        remaining.max(Duration::zero())
    }

    pub fn validate(&self) -> Result<()> {
        self.offered_item.validate()?;
        self.requested_item.validate()?;
        Ok(())
    }
}

impl fmt::Display for Offer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {}: gives {} for {}",
            self.id, self.creator_display_name, self.offered_item, self.requested_item
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseEntry {
    pub owner_id: PartyId,
    pub item: ItemDescriptor,
    pub received_at: DateTime<Utc>,
    pub source_display_name: String,
}

/// Base64 text for `ItemDescriptor::extra` so arbitrary bytes survive JSON.
mod extra_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(extra: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match extra {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
