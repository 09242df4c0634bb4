//! Identifier and value types for stock counters and reservation holds.
//!
//! This module defines strong types for the identifiers that make up a hold
//! (`ResourceId`, `HolderId`, `Quantity`) and the [`HoldKey`] that joins them
//! into the stable, parseable key stored in the shared state store.
//!
//! # Key Format
//!
//! ```text
//! stock:{resource_id}                          → integer counter
//! hold:{resource_id}:{quantity}:{holder_id}    → quantity, with TTL
//! ```
//!
//! The quantity is part of the hold key because an expiration notification
//! only carries the key: by the time it is delivered the value is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ReservationError, Result};

/// Prefix of stock counter keys.
pub const STOCK_KEY_PREFIX: &str = "stock";

/// Prefix of hold keys.
pub const HOLD_KEY_PREFIX: &str = "hold";

/// Prefix of the markers that record an expired hold as already credited.
pub const CLAIM_KEY_PREFIX: &str = "reconciled";

/// Delimiter between key components.
pub const KEY_DELIMITER: char = ':';

/// Validate a single key component.
///
/// Components are joined with [`KEY_DELIMITER`], so they may not contain it.
fn validate_component(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty()
        || value.contains(KEY_DELIMITER)
        || value.chars().any(char::is_whitespace)
    {
        return Err(ReservationError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Identifier of a ticketed resource (an event).
///
/// # Validation
///
/// - `new()` and `FromStr::from_str()`: reject empty values, whitespace and `:`
///
/// # Examples
///
/// ```
/// use stockhold_core::types::ResourceId;
///
/// let id = ResourceId::new("E1").unwrap();
/// assert_eq!(id.as_str(), "E1");
/// assert!(ResourceId::new("E:1").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a validated resource identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidIdentifier`] if the value is empty
    /// or contains whitespace or the key delimiter.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_component("resource_id", &id)?;
        Ok(Self(id))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key of this resource's stock counter.
    #[must_use]
    pub fn stock_key(&self) -> String {
        format!("{STOCK_KEY_PREFIX}{KEY_DELIMITER}{}", self.0)
    }

    /// Key pattern matching every hold on this resource.
    #[must_use]
    pub fn hold_pattern(&self) -> String {
        format!("{HOLD_KEY_PREFIX}{KEY_DELIMITER}{}{KEY_DELIMITER}*", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceId {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ReservationError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

/// Identifier of the party holding a reservation (a user).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HolderId(String);

impl HolderId {
    /// Create a validated holder identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidIdentifier`] if the value is empty
    /// or contains whitespace or the key delimiter.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_component("holder_id", &id)?;
        Ok(Self(id))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for HolderId {
    type Err = ReservationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for HolderId {
    type Error = ReservationError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<HolderId> for String {
    fn from(id: HolderId) -> Self {
        id.0
    }
}

/// A strictly positive number of units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u64")]
pub struct Quantity(u64);

impl Quantity {
    /// Create a quantity from a caller-supplied signed value.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidQuantity`] if `value <= 0`.
    pub fn new(value: i64) -> Result<Self> {
        match u64::try_from(value) {
            Ok(units) if units > 0 => Ok(Self(units)),
            _ => Err(ReservationError::InvalidQuantity(value)),
        }
    }

    /// Number of units.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = ReservationError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Quantity> for u64 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

/// Identity of a reservation hold: `(resource, quantity, holder)`.
///
/// Creation and confirmation must use the exact same triple. Because the
/// quantity is part of the identity, a holder asking for a *different*
/// quantity of the same resource gets a distinct hold.
///
/// # Examples
///
/// ```
/// use stockhold_core::types::HoldKey;
///
/// let hold = HoldKey::from_parts("E1", 3, "U1").unwrap();
/// assert_eq!(hold.store_key(), "hold:E1:3:U1");
/// assert_eq!(HoldKey::parse("hold:E1:3:U1"), Some(hold));
/// assert_eq!(HoldKey::parse("stock:E1"), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldKey {
    /// Resource the units are held on.
    pub resource_id: ResourceId,
    /// Units held.
    pub quantity: Quantity,
    /// Party holding the units.
    pub holder_id: HolderId,
}

impl HoldKey {
    /// Create a hold key from validated parts.
    #[must_use]
    pub const fn new(resource_id: ResourceId, quantity: Quantity, holder_id: HolderId) -> Self {
        Self {
            resource_id,
            quantity,
            holder_id,
        }
    }

    /// Create a hold key from raw caller input, validating every part.
    ///
    /// The quantity is validated first, so a non-positive quantity is always
    /// reported as [`ReservationError::InvalidQuantity`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-positive quantity or a malformed
    /// identifier.
    pub fn from_parts(resource_id: &str, quantity: i64, holder_id: &str) -> Result<Self> {
        let quantity = Quantity::new(quantity)?;
        Ok(Self::new(
            ResourceId::new(resource_id)?,
            quantity,
            HolderId::new(holder_id)?,
        ))
    }

    /// Key of the hold entry in the shared state store.
    #[must_use]
    pub fn store_key(&self) -> String {
        format!(
            "{HOLD_KEY_PREFIX}{d}{}{d}{}{d}{}",
            self.resource_id,
            self.quantity,
            self.holder_id,
            d = KEY_DELIMITER
        )
    }

    /// Key of the marker claiming this hold's expiration credit.
    ///
    /// Never parses as a hold key, so the marker's own expiry is ignored by
    /// the reconciler.
    #[must_use]
    pub fn claim_key(&self) -> String {
        format!("{CLAIM_KEY_PREFIX}{KEY_DELIMITER}{}", self.store_key())
    }

    /// Parse a store key back into a hold key.
    ///
    /// Returns `None` for keys of any other shape: foreign keys, stock keys,
    /// non-numeric or non-positive quantities, extra components.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split(KEY_DELIMITER);
        if parts.next()? != HOLD_KEY_PREFIX {
            return None;
        }
        let resource_id = ResourceId::new(parts.next()?).ok()?;
        let quantity = Quantity::new(parts.next()?.parse().ok()?).ok()?;
        let holder_id = HolderId::new(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(resource_id, quantity, holder_id))
    }
}

impl fmt::Display for HoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store_key())
    }
}

/// Result of a successful reserve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The hold that was created.
    pub hold: HoldKey,
    /// Counter value after the decrement.
    pub remaining_stock: u64,
    /// When the hold lapses if not confirmed.
    pub expires_at: DateTime<Utc>,
}

/// An active hold and its remaining time-to-live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHold {
    /// The hold.
    pub hold: HoldKey,
    /// Time left before the store expires it. `None` if the entry has no TTL.
    pub remaining: Option<Duration>,
}

/// Point-in-time view of a resource's stock.
///
/// `available + held` is what the counter would read if every active hold
/// expired right now. A gap against the catalog figure (minus confirmed
/// sales) means a credit was lost while no reconciler was listening.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Resource the snapshot describes.
    pub resource_id: ResourceId,
    /// Counter value, `None` if the counter has not been initialized yet.
    pub available: Option<u64>,
    /// Sum of quantities of active holds.
    pub held: u64,
    /// Number of active holds.
    pub active_holds: usize,
}

impl InventorySnapshot {
    /// `available + held`, if the counter is known.
    #[must_use]
    pub fn accounted(&self) -> Option<u64> {
        self.available.map(|available| available + self.held)
    }
}
