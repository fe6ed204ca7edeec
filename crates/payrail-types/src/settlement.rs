//! Settlement result types.
//!
//! A settlement call walks a rail forward segment by segment. Each segment
//! that moves money produces a [`SegmentSettlement`]; the call as a whole
//! returns a [`SettlementOutcome`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Epoch, RailId, Result, TokenAmount, add_amount};

/// Deterministic split of a settled amount.
///
/// `net_payee + protocol_fee + operator_commission == total` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub total: TokenAmount,
    pub protocol_fee: TokenAmount,
    pub operator_commission: TokenAmount,
    pub net_payee: TokenAmount,
}

impl FeeBreakdown {
    /// Add another breakdown into this one. Unchanged on overflow.
    pub fn accumulate(&mut self, other: &Self) -> Result<()> {
        const CONTEXT: &str = "settlement totals";
        *self = Self {
            total: add_amount(self.total, other.total, CONTEXT)?,
            protocol_fee: add_amount(self.protocol_fee, other.protocol_fee, CONTEXT)?,
            operator_commission: add_amount(
                self.operator_commission,
                other.operator_commission,
                CONTEXT,
            )?,
            net_payee: add_amount(self.net_payee, other.net_payee, CONTEXT)?,
        };
        Ok(())
    }

    /// Whether the parts add back up to the total.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.net_payee + self.protocol_fee + self.operator_commission == self.total
    }
}

/// One settled span of a rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSettlement {
    pub from_epoch: Epoch,
    /// Epoch the segment actually settled to (the validator may shorten it).
    pub to_epoch: Epoch,
    pub rate: TokenAmount,
    /// `rate * (to_epoch - from_epoch)`: the payer lockup this segment releases.
    pub lockup_released: TokenAmount,
    pub fees: FeeBreakdown,
    /// Validator note, if a validator was consulted.
    pub note: Option<String>,
}

/// How far a settlement call got relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementProgress {
    /// Reached the requested epoch.
    Complete,
    /// Advanced, but stopped short (validator partial approval, payer lockup
    /// not settled far enough).
    Partial,
    /// No advancement at all. Retry later.
    Stalled,
    /// Rail reached its end epoch and was finalized.
    Finalized,
}

impl std::fmt::Display for SettlementProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "COMPLETE"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Stalled => write!(f, "STALLED"),
            Self::Finalized => write!(f, "FINALIZED"),
        }
    }
}

/// Totals and per-segment detail for one settlement call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub rail_id: RailId,
    pub totals: FeeBreakdown,
    /// `settled_up_to` after the call.
    pub settled_up_to: Epoch,
    pub progress: SettlementProgress,
    pub segments: Vec<SegmentSettlement>,
    /// Human-readable explanation, always set.
    pub note: String,
}

impl SettlementOutcome {
    /// An outcome that moved nothing.
    #[must_use]
    pub fn empty(
        rail_id: RailId,
        settled_up_to: Epoch,
        progress: SettlementProgress,
        note: impl Into<String>,
    ) -> Self {
        Self {
            rail_id,
            totals: FeeBreakdown::default(),
            settled_up_to,
            progress,
            segments: Vec::new(),
            note: note.into(),
        }
    }

    /// Total amount debited from the payer.
    #[must_use]
    pub fn total_settled(&self) -> TokenAmount {
        self.totals.total
    }

    /// Whether nothing was transferred.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.totals.total == Decimal::ZERO
    }
}
