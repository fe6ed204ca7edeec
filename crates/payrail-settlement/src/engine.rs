//! The payments engine: owned state and the non-rail operations.
//!
//! Every public method taking `&mut self` is one transaction. Methods that
//! can fail work on copies of the accounts, approvals, and rail they touch
//! and write them back only after every check has passed.
//!
//! Rail lifecycle lives in [`crate::rails`], settlement in [`crate::settle`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use payrail_ledger::{AccountLedger, AllowanceTracker};
use payrail_types::{
    Account, AccountId, AccountKey, AccountProjection, ApprovalKey, EngineConfig, Epoch,
    FeeBreakdown, LockupSettlement, OperatorApproval, PayrailError, Rail, RailId, RateChange,
    Result, TokenAmount, add_amount, constants,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::fees::{FeeLedger, FeeSplitter};
use crate::rate_queue::RateChangeQueue;
use crate::validator::{Validator, ValidatorRegistry};

/// A rail together with its pending rate segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RailRecord {
    pub(crate) rail: Rail,
    pub(crate) queue: RateChangeQueue,
}

/// A rail's current reservation against its payer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailLockup {
    pub payment_rate: TokenAmount,
    pub lockup_period: Epoch,
    pub lockup_fixed: TokenAmount,
    /// `payment_rate * lockup_period`.
    pub rate_lockup: TokenAmount,
    /// `lockup_fixed + rate_lockup`.
    pub total: TokenAmount,
}

/// Owns the ledger, allowances, rails, validators, and fee ledger.
pub struct PaymentsEngine {
    pub(crate) config: EngineConfig,
    pub(crate) ledger: AccountLedger,
    pub(crate) allowances: AllowanceTracker,
    pub(crate) rails: BTreeMap<RailId, RailRecord>,
    pub(crate) next_rail_id: RailId,
    pub(crate) validators: ValidatorRegistry,
    pub(crate) splitter: FeeSplitter,
    pub(crate) fees: FeeLedger,
    pub(crate) payer_rails: HashMap<AccountKey, Vec<RailId>>,
    pub(crate) payee_rails: HashMap<AccountKey, Vec<RailId>>,
}

impl PaymentsEngine {
    /// Build an engine from a validated config.
    ///
    /// # Errors
    /// `Configuration` if the config is out of range.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            engine = constants::ENGINE_NAME,
            version = constants::VERSION,
            protocol_fee_bps = config.protocol_fee_bps,
            max_commission_bps = config.max_commission_bps,
            approval_policy = ?config.approval_policy,
            "Payments engine started"
        );
        Ok(Self {
            splitter: FeeSplitter::new(config.protocol_fee_bps),
            config,
            ledger: AccountLedger::new(),
            allowances: AllowanceTracker::new(),
            rails: BTreeMap::new(),
            next_rail_id: RailId(constants::FIRST_RAIL_ID),
            validators: ValidatorRegistry::new(),
            fees: FeeLedger::new(),
            payer_rails: HashMap::new(),
            payee_rails: HashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Funds
    // -----------------------------------------------------------------

    /// Credit `amount` to (asset, owner). The caller has already moved the
    /// external value in.
    pub fn deposit(
        &mut self,
        asset: &str,
        owner: AccountId,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<LockupSettlement> {
        self.ledger.deposit(asset, owner, amount, epoch)
    }

    /// Debit `amount` of unlocked funds from (asset, owner).
    pub fn withdraw(
        &mut self,
        asset: &str,
        owner: AccountId,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<()> {
        self.ledger.withdraw(asset, owner, amount, epoch)
    }

    /// Bring an account's lockup accrual up to `epoch` as far as funds allow.
    pub fn settle_account_lockup(
        &mut self,
        asset: &str,
        owner: AccountId,
        epoch: Epoch,
    ) -> Result<LockupSettlement> {
        self.ledger.settle_lockup(asset, owner, epoch)
    }

    // -----------------------------------------------------------------
    // Operator approvals
    // -----------------------------------------------------------------

    /// Create or replace `operator`'s allowances on `client`'s funds.
    /// Existing usage is kept; `approved = false` revokes.
    #[allow(clippy::too_many_arguments)]
    pub fn set_operator_approval(
        &mut self,
        asset: &str,
        client: AccountId,
        operator: AccountId,
        approved: bool,
        rate_allowance: TokenAmount,
        lockup_allowance: TokenAmount,
        max_lockup_period: Epoch,
    ) -> Result<()> {
        self.allowances.set_approval(
            ApprovalKey::new(asset, client, operator),
            approved,
            rate_allowance,
            lockup_allowance,
            max_lockup_period,
        )
    }

    /// Raise an approved operator's allowances.
    pub fn increase_operator_approval(
        &mut self,
        asset: &str,
        client: AccountId,
        operator: AccountId,
        rate_delta: TokenAmount,
        lockup_delta: TokenAmount,
    ) -> Result<()> {
        self.allowances.increase_approval(
            &ApprovalKey::new(asset, client, operator),
            rate_delta,
            lockup_delta,
        )
    }

    // -----------------------------------------------------------------
    // Validators
    // -----------------------------------------------------------------

    /// Make `validator` available to rails naming `id`.
    pub fn register_validator(&mut self, id: AccountId, validator: Arc<dyn Validator>) {
        self.validators.register(id, validator);
    }

    // -----------------------------------------------------------------
    // Protocol fees
    // -----------------------------------------------------------------

    /// Protocol fees accrued for `asset` and not yet withdrawn.
    #[must_use]
    pub fn accrued_fees(&self, asset: &str) -> TokenAmount {
        self.fees.accrued(asset)
    }

    /// Pay out accrued fees. Only the configured fee owner may call this.
    pub fn withdraw_fees(
        &mut self,
        caller: AccountId,
        asset: &str,
        amount: TokenAmount,
    ) -> Result<()> {
        if self.config.fee_owner != Some(caller) {
            return Err(PayrailError::unauthorized(
                "only the fee owner can withdraw protocol fees",
            ));
        }
        let mut fees = self.fees.clone();
        fees.withdraw(asset, amount)?;
        self.ledger.record_fee_withdrawal(asset, amount)?;
        self.fees = fees;
        tracing::info!(asset, owner = %caller, amount = %amount, "Protocol fees withdrawn");
        Ok(())
    }

    /// Check `Σ funds + accrued fees == deposits - withdrawals - fee
    /// withdrawals` for `asset`.
    pub fn verify_supply(&self, asset: &str) -> Result<()> {
        self.ledger.verify_supply(asset, self.fees.accrued(asset))
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Account view. Accounts that never received funds read as zero.
    #[must_use]
    pub fn account(&self, asset: &str, owner: AccountId) -> Account {
        self.ledger.account(asset, owner)
    }

    /// Rail view (without its queue).
    pub fn rail(&self, rail_id: RailId) -> Result<Rail> {
        Ok(self.record(rail_id)?.rail.clone())
    }

    /// Pending rate segments, oldest first.
    pub fn rate_change_queue(&self, rail_id: RailId) -> Result<Vec<RateChange>> {
        Ok(self.record(rail_id)?.queue.to_vec())
    }

    /// Approval view. Unknown pairs read as unapproved with zero allowances.
    #[must_use]
    pub fn operator_approval(
        &self,
        asset: &str,
        client: AccountId,
        operator: AccountId,
    ) -> OperatorApproval {
        self.allowances
            .get(&ApprovalKey::new(asset, client, operator))
            .cloned()
            .unwrap_or_default()
    }

    /// Rails where `payer` pays, in creation order.
    #[must_use]
    pub fn rails_for_payer(&self, asset: &str, payer: AccountId) -> Vec<RailId> {
        self.payer_rails
            .get(&AccountKey::new(asset, payer))
            .cloned()
            .unwrap_or_default()
    }

    /// Rails where `payee` is paid, in creation order.
    #[must_use]
    pub fn rails_for_payee(&self, asset: &str, payee: AccountId) -> Vec<RailId> {
        self.payee_rails
            .get(&AccountKey::new(asset, payee))
            .cloned()
            .unwrap_or_default()
    }

    /// The account as it would look with lockup settled at `epoch`.
    pub fn account_info_if_settled(
        &self,
        asset: &str,
        owner: AccountId,
        epoch: Epoch,
    ) -> Result<AccountProjection> {
        self.ledger.project(asset, owner, epoch)
    }

    /// The rail's fixed and rate-based reservation.
    pub fn rail_lockup_status(&self, rail_id: RailId) -> Result<RailLockup> {
        let rail = &self.record(rail_id)?.rail;
        let rate_lockup = rail
            .payment_rate
            .checked_mul(Decimal::from(rail.lockup_period))
            .ok_or(PayrailError::ArithmeticOverflow {
                context: "rail lockup",
            })?;
        Ok(RailLockup {
            payment_rate: rail.payment_rate,
            lockup_period: rail.lockup_period,
            lockup_fixed: rail.lockup_fixed,
            rate_lockup,
            total: add_amount(rail.lockup_fixed, rate_lockup, "rail lockup")?,
        })
    }

    /// Number of rails ever created.
    #[must_use]
    pub fn rail_count(&self) -> usize {
        self.rails.len()
    }

    // -----------------------------------------------------------------
    // Internal helpers shared by rails.rs and settle.rs
    // -----------------------------------------------------------------

    pub(crate) fn record(&self, rail_id: RailId) -> Result<&RailRecord> {
        self.rails
            .get(&rail_id)
            .ok_or(PayrailError::RailNotFound(rail_id))
    }

    /// Write back a rail and its payer, and pay out `paid`: net to the
    /// payee, commission to the operator, protocol fee to the fee ledger.
    ///
    /// Every fallible step runs before the first write.
    pub(crate) fn commit_rail(
        &mut self,
        record: RailRecord,
        payer: Account,
        paid: &FeeBreakdown,
        epoch: Epoch,
    ) -> Result<()> {
        let rail = &record.rail;
        let mut staged = vec![(AccountKey::new(&rail.asset, rail.payer), payer)];
        self.stage_credit(
            &mut staged,
            AccountKey::new(&rail.asset, rail.payee),
            paid.net_payee,
            epoch,
        )?;
        self.stage_credit(
            &mut staged,
            AccountKey::new(&rail.asset, rail.operator),
            paid.operator_commission,
            epoch,
        )?;
        self.fees.accrue(&rail.asset, paid.protocol_fee)?;

        for (key, account) in staged {
            self.ledger.put(key, account);
        }
        self.rails.insert(record.rail.id, record);
        Ok(())
    }

    /// Add `amount` to the staged copy of `key`, loading it on first touch.
    fn stage_credit(
        &self,
        staged: &mut Vec<(AccountKey, Account)>,
        key: AccountKey,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let index = match staged.iter().position(|(k, _)| *k == key) {
            Some(index) => index,
            None => {
                staged.push((key.clone(), self.ledger.account_at(&key, epoch)));
                staged.len() - 1
            }
        };
        let account = &mut staged[index].1;
        account.funds = add_amount(account.funds, amount, "payout")?;
        Ok(())
    }
}

impl Default for PaymentsEngine {
    fn default() -> Self {
        Self {
            splitter: FeeSplitter::new(constants::DEFAULT_PROTOCOL_FEE_BPS),
            config: EngineConfig::default(),
            ledger: AccountLedger::new(),
            allowances: AllowanceTracker::new(),
            rails: BTreeMap::new(),
            next_rail_id: RailId(constants::FIRST_RAIL_ID),
            validators: ValidatorRegistry::new(),
            fees: FeeLedger::new(),
            payer_rails: HashMap::new(),
            payee_rails: HashMap::new(),
        }
    }
}

/// Payer lockup must cover `lockup_current` after every operation.
pub(crate) fn ensure_solvent(account: &Account, context: &str) -> Result<()> {
    if account.is_solvent() {
        Ok(())
    } else {
        Err(PayrailError::InvariantViolation {
            reason: format!(
                "{context}: lockup {} exceeds funds {}",
                account.lockup_current, account.funds
            ),
        })
    }
}

/// `rate * epochs` with overflow reported as an error.
pub(crate) fn rate_times(
    rate: TokenAmount,
    epochs: Epoch,
    context: &'static str,
) -> Result<TokenAmount> {
    rate.checked_mul(Decimal::from(epochs))
        .ok_or(PayrailError::ArithmeticOverflow { context })
}
