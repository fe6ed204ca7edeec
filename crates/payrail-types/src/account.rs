//! Account state for the lockup-accrual model.
//!
//! Every (asset, owner) pair has `funds` (the full balance held by the ledger)
//! and `lockup_current` (the part of `funds` committed to rails). Lockup grows
//! by `lockup_rate` per epoch until `lockup_last_settled_at`.
//!
//! Invariant: `funds >= lockup_current` after every operation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Epoch, PayrailError, Result};

/// Token amounts are whole base units held as `Decimal`.
pub type TokenAmount = Decimal;

/// `a + b`, with overflow reported as [`PayrailError::ArithmeticOverflow`].
pub fn add_amount(a: TokenAmount, b: TokenAmount, context: &'static str) -> Result<TokenAmount> {
    a.checked_add(b)
        .ok_or(PayrailError::ArithmeticOverflow { context })
}

/// A single ledger account for an (asset, owner) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Balance held by the ledger, locked or not.
    pub funds: TokenAmount,
    /// Committed-but-unspent part of `funds`.
    pub lockup_current: TokenAmount,
    /// Sum of payment rates across active rails this account pays into.
    pub lockup_rate: TokenAmount,
    /// Epoch through which lockup accrual has been applied.
    pub lockup_last_settled_at: Epoch,
}

impl Account {
    /// Create an empty account whose accrual clock starts at `epoch`.
    #[must_use]
    pub fn new(epoch: Epoch) -> Self {
        Self {
            funds: Decimal::ZERO,
            lockup_current: Decimal::ZERO,
            lockup_rate: Decimal::ZERO,
            lockup_last_settled_at: epoch,
        }
    }

    /// Funds not committed to any rail.
    #[must_use]
    pub fn available(&self) -> TokenAmount {
        (self.funds - self.lockup_current).max(Decimal::ZERO)
    }

    /// Whether lockup accrual has caught up with `epoch`.
    #[must_use]
    pub fn is_settled_at(&self, epoch: Epoch) -> bool {
        self.lockup_last_settled_at >= epoch
    }

    /// Whether locked funds are covered by funds.
    #[must_use]
    pub fn is_solvent(&self) -> bool {
        self.lockup_current <= self.funds
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Outcome of an account lockup settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockupSettlement {
    /// Epoch the lockup is now settled through.
    pub settled_at: Epoch,
    /// Whether `settled_at` reached the requested epoch.
    pub fully_settled: bool,
}

/// "What would this account look like if settled now" projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProjection {
    /// Last epoch the account can fund at its current lockup rate.
    /// `Epoch::MAX` when the lockup rate is zero.
    pub funded_until_epoch: Epoch,
    /// Funds after the projected settlement.
    pub funds: TokenAmount,
    /// Unlocked funds after the projected settlement.
    pub available_funds: TokenAmount,
    /// Current lockup rate.
    pub lockup_rate: TokenAmount,
}
