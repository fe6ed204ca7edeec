//! Supply conservation invariant checker.
//!
//! Value enters the engine through deposits and leaves through account
//! withdrawals and protocol fee withdrawals. Settlement only moves value
//! between accounts and the fee ledger, so for every asset:
//! ```text
//! Σ(account funds) + accrued fees == deposited - withdrawn - fees_withdrawn
//! ```

use std::collections::HashMap;

use payrail_types::{Asset, PayrailError, Result, TokenAmount, add_amount};

/// Cumulative value that crossed the engine boundary for one asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetFlows {
    pub deposited: TokenAmount,
    /// Withdrawn by account owners.
    pub withdrawn: TokenAmount,
    /// Withdrawn from the protocol fee ledger by the fee owner.
    pub fees_withdrawn: TokenAmount,
}

impl AssetFlows {
    /// What the engine should hold for this asset right now.
    pub fn expected_held(&self) -> Result<TokenAmount> {
        self.deposited
            .checked_sub(self.withdrawn)
            .and_then(|rest| rest.checked_sub(self.fees_withdrawn))
            .ok_or(PayrailError::ArithmeticOverflow {
                context: "expected supply",
            })
    }
}

/// Tracks per-asset value entering and leaving the engine.
#[derive(Debug, Default)]
pub struct SupplyConservation {
    flows: HashMap<Asset, AssetFlows>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_deposit(&mut self, asset: &str, amount: TokenAmount) -> Result<()> {
        self.record(asset, amount, "supply deposits", |f| &mut f.deposited)
    }

    pub fn record_withdrawal(&mut self, asset: &str, amount: TokenAmount) -> Result<()> {
        self.record(asset, amount, "supply withdrawals", |f| &mut f.withdrawn)
    }

    pub fn record_fee_withdrawal(&mut self, asset: &str, amount: TokenAmount) -> Result<()> {
        self.record(asset, amount, "supply fee withdrawals", |f| {
            &mut f.fees_withdrawn
        })
    }

    /// Add `amount` to one running total. Nothing changes on overflow.
    fn record(
        &mut self,
        asset: &str,
        amount: TokenAmount,
        context: &'static str,
        total: impl FnOnce(&mut AssetFlows) -> &mut TokenAmount,
    ) -> Result<()> {
        let mut flows = self.flows(asset);
        let slot = total(&mut flows);
        *slot = add_amount(*slot, amount, context)?;
        self.flows.insert(asset.to_string(), flows);
        Ok(())
    }

    /// Flows recorded for `asset`; zero if it was never touched.
    #[must_use]
    pub fn flows(&self, asset: &str) -> AssetFlows {
        self.flows.get(asset).copied().unwrap_or_default()
    }

    /// Compare what the engine holds, in accounts and in the fee ledger,
    /// against what entered and left.
    ///
    /// # Errors
    /// Returns [`PayrailError::SupplyInvariantViolation`] if they differ.
    pub fn verify(
        &self,
        asset: &str,
        in_accounts: TokenAmount,
        in_fee_ledger: TokenAmount,
    ) -> Result<()> {
        let flows = self.flows(asset);
        let expected = flows.expected_held()?;
        let held = add_amount(in_accounts, in_fee_ledger, "held supply")?;
        if held != expected {
            tracing::error!(
                asset,
                in_accounts = %in_accounts,
                in_fee_ledger = %in_fee_ledger,
                expected = %expected,
                "Supply conservation violated"
            );
            return Err(PayrailError::SupplyInvariantViolation {
                reason: format!(
                    "Asset {asset}: accounts {in_accounts} + fees {in_fee_ledger} != \
                     expected {expected} (deposited={}, withdrawn={}, fees_withdrawn={})",
                    flows.deposited, flows.withdrawn, flows.fees_withdrawn,
                ),
            });
        }
        Ok(())
    }
}
