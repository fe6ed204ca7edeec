//! Identifiers used throughout Payrail.
//!
//! Participants (payers, payees, operators, validators, the fee owner) are
//! all addressed by [`AccountId`], a UUIDv7. Rails are numbered by the engine
//! with a monotonically increasing [`RailId`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Externally supplied monotonic time unit (e.g. a block height).
///
/// The engine never reads a clock; every call carries the current epoch.
pub type Epoch = u64;

/// `a + b` epochs, with overflow reported as [`crate::PayrailError::ArithmeticOverflow`].
pub fn add_epochs(a: Epoch, b: Epoch, context: &'static str) -> crate::Result<Epoch> {
    a.checked_add(b)
        .ok_or(crate::PayrailError::ArithmeticOverflow { context })
}

/// Type alias for asset identifiers (e.g., "USDFC", "FIL").
pub type Asset = String;

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Address of a ledger participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RailId
// ---------------------------------------------------------------------------

/// Engine-assigned rail identifier. The first rail is `RailId(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RailId(pub u64);

impl RailId {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rail:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AccountKey / ApprovalKey
// ---------------------------------------------------------------------------

/// Ledger key: one balance per (asset, owner).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountKey {
    pub asset: Asset,
    pub owner: AccountId,
}

impl AccountKey {
    #[must_use]
    pub fn new(asset: impl Into<Asset>, owner: AccountId) -> Self {
        Self {
            asset: asset.into(),
            owner,
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner, self.asset)
    }
}

/// Operator approval key: (asset, client, operator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ApprovalKey {
    pub asset: Asset,
    pub client: AccountId,
    pub operator: AccountId,
}

impl ApprovalKey {
    #[must_use]
    pub fn new(asset: impl Into<Asset>, client: AccountId, operator: AccountId) -> Self {
        Self {
            asset: asset.into(),
            client,
            operator,
        }
    }
}
