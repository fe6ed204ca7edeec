//! # Rail: a continuous payment channel
//!
//! A rail streams `payment_rate` tokens per epoch from a payer to a payee,
//! under the control of an operator and optionally a validator.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  terminate   ┌────────────┐  settled to end_epoch  ┌───────────┐
//!   │ ACTIVE ├─────────────▶│ TERMINATED ├───────────────────────▶│ FINALIZED │
//!   └────────┘              └────────────┘                        └───────────┘
//! ```
//!
//! - `end_epoch == 0` while active; set exactly once on termination.
//! - Finalization refunds the fixed lockup and zeroes the record.
//! - Transitions never go backwards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, Asset, Epoch, RailId, TokenAmount};

/// Lifecycle state of a rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RailState {
    /// Streaming; payer lockup accrues at the rail's rate.
    Active,
    /// `end_epoch` fixed; no further accrual, settlement continues to `end_epoch`.
    Terminated,
    /// Fully settled and zeroed. **Irreversible.**
    Finalized,
}

impl RailState {
    /// Can a rail in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Terminated) | (Self::Terminated, Self::Finalized)
        )
    }
}

impl std::fmt::Display for RailState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Terminated => write!(f, "TERMINATED"),
            Self::Finalized => write!(f, "FINALIZED"),
        }
    }
}

/// All queryable rail fields (the rate-change queue is held separately).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rail {
    pub id: RailId,
    pub asset: Asset,
    pub payer: AccountId,
    pub payee: AccountId,
    pub operator: AccountId,
    /// Optional arbiter consulted on every settlement segment.
    pub validator: Option<AccountId>,
    /// Tokens per epoch.
    pub payment_rate: TokenAmount,
    /// Epochs of rate-based lockup held in reserve.
    pub lockup_period: Epoch,
    /// Escrow for one-time payments.
    pub lockup_fixed: TokenAmount,
    /// Payment transferred through this epoch. Never decreases.
    pub settled_up_to: Epoch,
    /// Zero while active.
    pub end_epoch: Epoch,
    /// Operator commission on each settled amount, in basis points.
    pub commission_rate_bps: u32,
    pub state: RailState,
}

impl Rail {
    /// A fresh active rail with zero rate and lockup.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RailId,
        asset: impl Into<Asset>,
        payer: AccountId,
        payee: AccountId,
        operator: AccountId,
        validator: Option<AccountId>,
        commission_rate_bps: u32,
        epoch: Epoch,
    ) -> Self {
        Self {
            id,
            asset: asset.into(),
            payer,
            payee,
            operator,
            validator,
            payment_rate: Decimal::ZERO,
            lockup_period: 0,
            lockup_fixed: Decimal::ZERO,
            settled_up_to: epoch,
            end_epoch: 0,
            commission_rate_bps,
            state: RailState::Active,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == RailState::Active
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state == RailState::Terminated
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state == RailState::Finalized
    }

    /// Epochs of reservation still ahead of `epoch` on a terminated rail.
    #[must_use]
    pub fn remaining_epochs(&self, epoch: Epoch) -> Epoch {
        self.end_epoch.saturating_sub(epoch)
    }

    /// Whether `account` is a payer, payee, or operator of this rail.
    #[must_use]
    pub fn is_participant(&self, account: AccountId) -> bool {
        account == self.payer || account == self.payee || account == self.operator
    }

    /// Move to TERMINATED with the given end epoch.
    ///
    /// # Errors
    /// Returns error if the rail is not ACTIVE.
    pub fn mark_terminated(&mut self, end_epoch: Epoch) -> crate::Result<()> {
        if !self.state.can_transition_to(RailState::Terminated) {
            return Err(crate::PayrailError::rail_change(
                self.id,
                self.state,
                "only an active rail can be terminated",
            ));
        }
        self.end_epoch = end_epoch;
        self.state = RailState::Terminated;
        Ok(())
    }

    /// Move to FINALIZED and zero every economic field.
    ///
    /// # Errors
    /// Returns error if the rail is not TERMINATED.
    pub fn mark_finalized(&mut self) -> crate::Result<()> {
        if !self.state.can_transition_to(RailState::Finalized) {
            return Err(crate::PayrailError::rail_change(
                self.id,
                self.state,
                "only a terminated rail can be finalized",
            ));
        }
        self.payment_rate = Decimal::ZERO;
        self.lockup_period = 0;
        self.lockup_fixed = Decimal::ZERO;
        self.commission_rate_bps = 0;
        self.validator = None;
        self.state = RailState::Finalized;
        Ok(())
    }
}

/// One historical rate segment awaiting settlement: `rate` was in effect
/// up to and including `until_epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateChange {
    pub rate: TokenAmount,
    pub until_epoch: Epoch,
}
