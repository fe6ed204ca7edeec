//! Account ledger with lockup accrual.
//!
//! Tracks per-(asset, owner) accounts. Lockup grows by `lockup_rate` per
//! epoch; [`settle_account_lockup`] brings it up to date as far as funds
//! allow. Mutations that can fail validate before they write, so a rejected
//! call leaves the account unchanged.

use std::collections::HashMap;

use payrail_types::{
    Account, AccountId, AccountKey, AccountProjection, Epoch, LockupSettlement, PayrailError,
    Result, TokenAmount, add_amount,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::supply_conservation::SupplyConservation;

/// Bring an account's lockup accrual up to `epoch`.
///
/// Commits `lockup_rate * elapsed` if funds cover it. Otherwise commits the
/// largest whole number of epochs the unlocked funds can pay for and stops
/// there. Never fails on insufficient funds: the returned
/// [`LockupSettlement`] says how far it got. Calling it again with the same
/// epoch is a no-op.
pub fn settle_account_lockup(account: &mut Account, epoch: Epoch) -> Result<LockupSettlement> {
    if account.lockup_last_settled_at >= epoch {
        return Ok(LockupSettlement {
            settled_at: account.lockup_last_settled_at,
            fully_settled: true,
        });
    }

    let elapsed = epoch - account.lockup_last_settled_at;
    if account.lockup_rate.is_zero() {
        account.lockup_last_settled_at = epoch;
        return Ok(LockupSettlement {
            settled_at: epoch,
            fully_settled: true,
        });
    }

    // An accrual too large to represent is also too large to fund.
    let fully_locked = account
        .lockup_rate
        .checked_mul(Decimal::from(elapsed))
        .and_then(|required| account.lockup_current.checked_add(required))
        .filter(|locked| *locked <= account.funds);

    if let Some(locked) = fully_locked {
        tracing::debug!(
            settled_at = epoch,
            accrued = %(locked - account.lockup_current),
            lockup = %locked,
            "Lockup fully settled"
        );
        account.lockup_current = locked;
        account.lockup_last_settled_at = epoch;
        return Ok(LockupSettlement {
            settled_at: epoch,
            fully_settled: true,
        });
    }

    let unlocked = account.available();
    let affordable = unlocked
        .checked_div(account.lockup_rate)
        .and_then(|epochs| epochs.floor().to_u64())
        .unwrap_or(Epoch::MAX)
        .min(elapsed);
    let partial = account
        .lockup_rate
        .checked_mul(Decimal::from(affordable))
        .ok_or(PayrailError::ArithmeticOverflow {
            context: "lockup accrual",
        })?;
    account.lockup_current = add_amount(account.lockup_current, partial, "lockup accrual")?;
    account.lockup_last_settled_at += affordable;

    tracing::debug!(
        requested = epoch,
        settled_at = account.lockup_last_settled_at,
        accrued = %partial,
        "Lockup partially settled: funds exhausted"
    );
    Ok(LockupSettlement {
        settled_at: account.lockup_last_settled_at,
        fully_settled: false,
    })
}

/// Source of truth for account state.
pub struct AccountLedger {
    accounts: HashMap<AccountKey, Account>,
    supply: SupplyConservation,
}

impl AccountLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            supply: SupplyConservation::new(),
        }
    }

    /// A copy of the account, or an empty one anchored at `epoch`.
    ///
    /// Callers mutate the copy and hand it back through [`Self::put`] once
    /// every check has passed.
    #[must_use]
    pub fn account_at(&self, key: &AccountKey, epoch: Epoch) -> Account {
        self.accounts
            .get(key)
            .cloned()
            .unwrap_or_else(|| Account::new(epoch))
    }

    /// Read-only view for (asset, owner). Missing accounts read as zero.
    #[must_use]
    pub fn account(&self, asset: &str, owner: AccountId) -> Account {
        self.accounts
            .get(&AccountKey::new(asset, owner))
            .cloned()
            .unwrap_or_default()
    }

    /// Store an account that has already been validated.
    pub fn put(&mut self, key: AccountKey, account: Account) {
        debug_assert!(account.is_solvent(), "put() requires a solvent account");
        self.accounts.insert(key, account);
    }

    /// Deposit funds, then settle lockup at `epoch`.
    ///
    /// # Errors
    /// Returns `InvalidAmount` for non-positive amounts and
    /// `ArithmeticOverflow` if the balance or the asset's deposit total
    /// would overflow. Nothing is written on error.
    pub fn deposit(
        &mut self,
        asset: &str,
        owner: AccountId,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<LockupSettlement> {
        ensure_positive(amount, "deposit")?;
        let key = AccountKey::new(asset, owner);
        let mut account = self.account_at(&key, epoch);
        account.funds = add_amount(account.funds, amount, "deposit")?;
        let settlement = settle_account_lockup(&mut account, epoch)?;
        self.supply.record_deposit(asset, amount)?;
        self.accounts.insert(key, account);

        tracing::info!(
            asset,
            owner = %owner,
            amount = %amount,
            lockup_settled_at = settlement.settled_at,
            "Deposit credited"
        );
        Ok(settlement)
    }

    /// Settle lockup, then withdraw from unlocked funds.
    ///
    /// # Errors
    /// Returns `InsufficientFunds` if `amount` exceeds unlocked funds.
    pub fn withdraw(
        &mut self,
        asset: &str,
        owner: AccountId,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<()> {
        ensure_positive(amount, "withdrawal")?;
        let key = AccountKey::new(asset, owner);
        let mut account = self.account_at(&key, epoch);
        settle_account_lockup(&mut account, epoch)?;

        let available = account.available();
        if amount > available {
            return Err(PayrailError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        account.funds -= amount;
        self.supply.record_withdrawal(asset, amount)?;
        self.accounts.insert(key, account);

        tracing::info!(asset, owner = %owner, amount = %amount, "Withdrawal debited");
        Ok(())
    }

    /// Settle an account's lockup in place and persist it.
    pub fn settle_lockup(
        &mut self,
        asset: &str,
        owner: AccountId,
        epoch: Epoch,
    ) -> Result<LockupSettlement> {
        let key = AccountKey::new(asset, owner);
        let Some(account) = self.accounts.get_mut(&key) else {
            return Ok(LockupSettlement {
                settled_at: epoch,
                fully_settled: true,
            });
        };
        settle_account_lockup(account, epoch)
    }

    /// Project the account as if lockup were settled at `epoch`. Pure read.
    pub fn project(
        &self,
        asset: &str,
        owner: AccountId,
        epoch: Epoch,
    ) -> Result<AccountProjection> {
        let mut account = self.account_at(&AccountKey::new(asset, owner), epoch);
        settle_account_lockup(&mut account, epoch)?;

        let funded_until_epoch = if account.lockup_rate.is_zero() {
            Epoch::MAX
        } else {
            let spare_epochs = account
                .available()
                .checked_div(account.lockup_rate)
                .and_then(|epochs| epochs.floor().to_u64())
                .unwrap_or(Epoch::MAX);
            account.lockup_last_settled_at.saturating_add(spare_epochs)
        };

        Ok(AccountProjection {
            funded_until_epoch,
            funds: account.funds,
            available_funds: account.available(),
            lockup_rate: account.lockup_rate,
        })
    }

    /// Record protocol fees paid out to the fee owner.
    pub fn record_fee_withdrawal(&mut self, asset: &str, amount: TokenAmount) -> Result<()> {
        self.supply.record_fee_withdrawal(asset, amount)
    }

    /// Verify supply conservation for an asset, given what the fee ledger
    /// holds for it.
    pub fn verify_supply(&self, asset: &str, in_fee_ledger: TokenAmount) -> Result<()> {
        let in_accounts = self
            .accounts
            .iter()
            .filter(|(key, _)| key.asset == asset)
            .try_fold(Decimal::ZERO, |sum, (_, account)| {
                add_amount(sum, account.funds, "held supply")
            })?;
        self.supply.verify(asset, in_accounts, in_fee_ledger)
    }
}

impl Default for AccountLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_positive(amount: TokenAmount, what: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(PayrailError::InvalidAmount {
            reason: format!("{what} amount must be positive, got {amount}"),
        });
    }
    Ok(())
}
