//! Operator approval: what a client lets a delegated operator do.
//!
//! Two resources are tracked independently, each as (allowance, usage):
//! the summed payment rate across the operator's rails, and their summed
//! lockup (`lockup_fixed + rate * lockup_period` per rail).
//!
//! Usage may sit above allowance after a client lowers the allowance. The
//! operator can then only shrink usage until it is back under the limit.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Epoch, TokenAmount};

/// Allowances and running usage for one (asset, client, operator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorApproval {
    pub is_approved: bool,
    pub rate_allowance: TokenAmount,
    pub lockup_allowance: TokenAmount,
    pub rate_usage: TokenAmount,
    pub lockup_usage: TokenAmount,
    /// Hard cap on any rail's `lockup_period`.
    pub max_lockup_period: Epoch,
}

impl OperatorApproval {
    /// A fresh approval with zero usage.
    #[must_use]
    pub fn approved(
        rate_allowance: TokenAmount,
        lockup_allowance: TokenAmount,
        max_lockup_period: Epoch,
    ) -> Self {
        Self {
            is_approved: true,
            rate_allowance,
            lockup_allowance,
            rate_usage: Decimal::ZERO,
            lockup_usage: Decimal::ZERO,
            max_lockup_period,
        }
    }

    /// Headroom left under the rate allowance (zero when over the limit).
    #[must_use]
    pub fn rate_headroom(&self) -> TokenAmount {
        (self.rate_allowance - self.rate_usage).max(Decimal::ZERO)
    }

    /// Headroom left under the lockup allowance (zero when over the limit).
    #[must_use]
    pub fn lockup_headroom(&self) -> TokenAmount {
        (self.lockup_allowance - self.lockup_usage).max(Decimal::ZERO)
    }
}

impl Default for OperatorApproval {
    fn default() -> Self {
        Self {
            is_approved: false,
            rate_allowance: Decimal::ZERO,
            lockup_allowance: Decimal::ZERO,
            rate_usage: Decimal::ZERO,
            lockup_usage: Decimal::ZERO,
            max_lockup_period: 0,
        }
    }
}
