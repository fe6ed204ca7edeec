//! Rail lifecycle: create, modify lockup, modify payment, terminate.
//!
//! ## Rules
//!
//! | Change                  | Active rail                        | Terminated rail                  |
//! |-------------------------|------------------------------------|----------------------------------|
//! | lockup period           | payer settled; capped by approval  | frozen                           |
//! | fixed lockup up         | payer settled                      | rejected                         |
//! | fixed lockup down       | always                             | always                           |
//! | rate change             | payer settled                      | decrease only, zero past end     |
//! | one-time payment        | up to `lockup_fixed`               | up to `lockup_fixed`, zero past end |
//!
//! Every change runs the operator's usage through the allowance tracker
//! and adjusts the payer's `lockup_current` by the same reservation delta.
//! Increases must fit in the payer's unlocked funds.

use payrail_ledger::allowance::{
    check_lockup_period, consume_one_time_payment, update_lockup_usage, update_rate_usage,
};
use payrail_ledger::settle_account_lockup;
use payrail_types::{
    Account, AccountId, AccountKey, ApprovalKey, ApprovalPolicy, Epoch, FeeBreakdown,
    OperatorApproval, PayrailError, Rail, RailId, Result, TokenAmount, add_amount, add_epochs,
};
use rust_decimal::Decimal;

use crate::engine::{PaymentsEngine, RailRecord, ensure_solvent, rate_times};

impl PaymentsEngine {
    /// Open a rail from `payer` to `payee`, run by the calling `operator`.
    ///
    /// The rail starts active with zero rate and lockup, settled up to
    /// `epoch`.
    ///
    /// # Errors
    /// `InvalidCommission`, `ValidatorNotRegistered`, `OperatorNotApproved`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_rail(
        &mut self,
        operator: AccountId,
        asset: &str,
        payer: AccountId,
        payee: AccountId,
        validator: Option<AccountId>,
        commission_rate_bps: u32,
        epoch: Epoch,
    ) -> Result<RailId> {
        if commission_rate_bps > self.config.max_commission_bps {
            return Err(PayrailError::InvalidCommission {
                requested_bps: commission_rate_bps,
                max_bps: self.config.max_commission_bps,
            });
        }
        if let Some(id) = validator {
            if !self.validators.contains(id) {
                return Err(PayrailError::ValidatorNotRegistered(id));
            }
        }

        let key = ApprovalKey::new(asset, payer, operator);
        if self.config.approval_policy == ApprovalPolicy::AutoApprove
            && self.allowances.get(&key).is_none()
        {
            self.allowances.auto_approve(key.clone());
        }
        self.allowances.ensure_approved(&key)?;

        let rail_id = self.next_rail_id;
        self.next_rail_id = rail_id.next();
        let rail = Rail::new(
            rail_id,
            asset,
            payer,
            payee,
            operator,
            validator,
            commission_rate_bps,
            epoch,
        );
        self.rails.insert(
            rail_id,
            RailRecord {
                rail,
                queue: Default::default(),
            },
        );
        self.payer_rails
            .entry(AccountKey::new(asset, payer))
            .or_default()
            .push(rail_id);
        self.payee_rails
            .entry(AccountKey::new(asset, payee))
            .or_default()
            .push(rail_id);

        tracing::info!(
            rail_id = %rail_id,
            asset,
            payer = %payer,
            payee = %payee,
            operator = %operator,
            validator = ?validator,
            commission_rate_bps,
            "Rail created"
        );
        Ok(rail_id)
    }

    /// Change a rail's lockup period and fixed lockup. Operator only.
    pub fn modify_rail_lockup(
        &mut self,
        caller: AccountId,
        rail_id: RailId,
        period: Epoch,
        fixed: TokenAmount,
        current_epoch: Epoch,
    ) -> Result<()> {
        if fixed.is_sign_negative() {
            return Err(PayrailError::InvalidAmount {
                reason: format!("fixed lockup must not be negative, got {fixed}"),
            });
        }
        let (mut record, mut payer, key, mut approval) =
            self.load_for_change(caller, rail_id, current_epoch)?;
        let rail = &mut record.rail;

        if rail.is_terminated() {
            if period != rail.lockup_period {
                return Err(PayrailError::rail_change(
                    rail_id,
                    rail.state,
                    "lockup period is frozen after termination",
                ));
            }
            if fixed > rail.lockup_fixed {
                return Err(PayrailError::rail_change(
                    rail_id,
                    rail.state,
                    "fixed lockup can only be reduced after termination",
                ));
            }
        } else {
            let needs_settled = period != rail.lockup_period || fixed > rail.lockup_fixed;
            if needs_settled {
                ensure_settled(&payer, current_epoch)?;
            }
            if period > rail.lockup_period {
                check_lockup_period(&approval, period)?;
            }
        }

        let old_lockup = add_amount(
            rail.lockup_fixed,
            rate_times(rail.payment_rate, rail.lockup_period, "rail lockup")?,
            "rail lockup",
        )?;
        let new_lockup = add_amount(
            fixed,
            rate_times(rail.payment_rate, period, "rail lockup")?,
            "rail lockup",
        )?;
        update_lockup_usage(&key, &mut approval, old_lockup, new_lockup)?;
        adjust_lockup(&mut payer, old_lockup, new_lockup)?;
        ensure_solvent(&payer, "modify rail lockup")?;

        rail.lockup_period = period;
        rail.lockup_fixed = fixed;
        tracing::info!(
            rail_id = %rail_id,
            period,
            fixed = %fixed,
            payer_lockup = %payer.lockup_current,
            "Rail lockup modified"
        );
        self.commit_change(
            record,
            payer,
            key,
            approval,
            &FeeBreakdown::default(),
            current_epoch,
        )
    }

    /// Change a rail's payment rate and/or make a one-time payment from its
    /// fixed lockup. Operator only.
    pub fn modify_rail_payment(
        &mut self,
        caller: AccountId,
        rail_id: RailId,
        new_rate: TokenAmount,
        one_time_payment: TokenAmount,
        current_epoch: Epoch,
    ) -> Result<()> {
        if new_rate.is_sign_negative() || one_time_payment.is_sign_negative() {
            return Err(PayrailError::InvalidAmount {
                reason: "rate and one-time payment must not be negative".to_string(),
            });
        }
        let (mut record, mut payer, key, mut approval) =
            self.load_for_change(caller, rail_id, current_epoch)?;
        let old_rate = record.rail.payment_rate;
        let state = record.rail.state;

        if record.rail.is_terminated() {
            if new_rate > old_rate {
                return Err(PayrailError::rail_change(
                    rail_id,
                    state,
                    "rate can only be reduced after termination",
                ));
            }
            if current_epoch > record.rail.end_epoch
                && (!new_rate.is_zero() || !one_time_payment.is_zero())
            {
                return Err(PayrailError::rail_change(
                    rail_id,
                    state,
                    "rail is past its end epoch: rate and one-time payment must be zero",
                ));
            }
        } else if new_rate != old_rate {
            ensure_settled(&payer, current_epoch)?;
        }
        if one_time_payment > record.rail.lockup_fixed {
            return Err(PayrailError::rail_change(
                rail_id,
                state,
                format!(
                    "one-time payment {one_time_payment} exceeds fixed lockup {}",
                    record.rail.lockup_fixed
                ),
            ));
        }

        // Close out the segment that ran at the old rate.
        let mut settled = FeeBreakdown::default();
        if new_rate != old_rate {
            let change_epoch = if record.rail.is_terminated() {
                current_epoch.min(record.rail.end_epoch)
            } else {
                current_epoch
            };
            let bypass = record.rail.validator.is_none()
                || (record.queue.is_empty() && old_rate.is_zero());
            if bypass {
                let plan = self.plan_settlement(&record, payer, change_epoch, false)?;
                settled = plan.totals;
                payer = self.apply_plan(&mut record, plan);
                if record.rail.settled_up_to < change_epoch {
                    return Err(PayrailError::rail_change(
                        rail_id,
                        state,
                        format!(
                            "could not settle to epoch {change_epoch} before the rate change"
                        ),
                    ));
                }
            } else if record.rail.settled_up_to < change_epoch
                && !record.queue.ends_at(change_epoch)
            {
                record.queue.push(old_rate, change_epoch)?;
            }
        }

        // Rate reservation and operator usage.
        let rail = &mut record.rail;
        let lockup_epochs = if rail.is_terminated() {
            rail.remaining_epochs(current_epoch)
        } else {
            rail.lockup_period
        };
        let old_reserve = rate_times(old_rate, lockup_epochs, "rate reservation")?;
        let new_reserve = rate_times(new_rate, lockup_epochs, "rate reservation")?;
        adjust_lockup(&mut payer, old_reserve, new_reserve)?;
        if rail.is_active() {
            payer.lockup_rate =
                add_amount(payer.lockup_rate - old_rate, new_rate, "lockup rate")?;
        }
        update_rate_usage(&key, &mut approval, old_rate, new_rate)?;
        update_lockup_usage(
            &key,
            &mut approval,
            rate_times(old_rate, rail.lockup_period, "operator usage")?,
            rate_times(new_rate, rail.lockup_period, "operator usage")?,
        )?;
        rail.payment_rate = new_rate;

        // One-time payment out of the fixed lockup.
        let one_time = if one_time_payment.is_zero() {
            FeeBreakdown::default()
        } else {
            if payer.lockup_current < one_time_payment || payer.funds < one_time_payment {
                return Err(PayrailError::InvariantViolation {
                    reason: format!(
                        "{rail_id}: payer cannot cover one-time payment {one_time_payment}"
                    ),
                });
            }
            payer.funds -= one_time_payment;
            payer.lockup_current -= one_time_payment;
            rail.lockup_fixed -= one_time_payment;
            consume_one_time_payment(&mut approval, one_time_payment);
            self.splitter.split(one_time_payment, rail.commission_rate_bps)?
        };
        ensure_solvent(&payer, "modify rail payment")?;
        settled.accumulate(&one_time)?;

        tracing::info!(
            rail_id = %rail_id,
            old_rate = %old_rate,
            new_rate = %new_rate,
            one_time_payment = %one_time_payment,
            queued = record.queue.len(),
            "Rail payment modified"
        );
        self.commit_change(record, payer, key, approval, &settled, current_epoch)
    }

    /// Terminate a rail. The operator may always terminate; the payer only
    /// with fully settled lockup.
    ///
    /// Sets `end_epoch = payer.lockup_last_settled_at + lockup_period` and
    /// stops the rail's rate from accruing on the payer.
    pub fn terminate_rail(
        &mut self,
        caller: AccountId,
        rail_id: RailId,
        current_epoch: Epoch,
    ) -> Result<Epoch> {
        let mut record = self.record(rail_id)?.clone();
        let rail = &mut record.rail;
        if !rail.is_active() {
            return Err(PayrailError::rail_change(
                rail_id,
                rail.state,
                "rail is already terminated",
            ));
        }

        let payer_key = AccountKey::new(&rail.asset, rail.payer);
        let mut payer = self.ledger.account_at(&payer_key, current_epoch);
        settle_account_lockup(&mut payer, current_epoch)?;

        // The operator may wind down an underfunded payer; the payer may not
        // walk away from lockup it has not yet covered.
        let is_operator = caller == rail.operator;
        if !is_operator && caller != rail.payer {
            return Err(PayrailError::unauthorized(
                "only the payer or operator can terminate a rail",
            ));
        }
        if !is_operator {
            ensure_settled(&payer, current_epoch)?;
        }

        let end_epoch = add_epochs(
            payer.lockup_last_settled_at,
            rail.lockup_period,
            "end epoch",
        )?;
        if payer.lockup_rate < rail.payment_rate {
            return Err(PayrailError::InvariantViolation {
                reason: format!(
                    "{rail_id}: payer lockup rate {} below rail rate {}",
                    payer.lockup_rate, rail.payment_rate
                ),
            });
        }
        payer.lockup_rate -= rail.payment_rate;
        rail.mark_terminated(end_epoch)?;

        let validator = rail.validator.map(|id| self.validators.get(id)).transpose()?;
        self.ledger.put(payer_key, payer);
        self.rails.insert(rail_id, record);

        tracing::info!(
            rail_id = %rail_id,
            terminator = %caller,
            end_epoch,
            "Rail terminated"
        );
        if let Some(validator) = validator {
            validator.rail_terminated(rail_id, caller, end_epoch);
        }
        Ok(end_epoch)
    }

    /// Copies of everything a rail change touches, after the shared checks.
    fn load_for_change(
        &self,
        caller: AccountId,
        rail_id: RailId,
        current_epoch: Epoch,
    ) -> Result<(RailRecord, Account, ApprovalKey, OperatorApproval)> {
        let record = self.record(rail_id)?.clone();
        let rail = &record.rail;
        if rail.is_finalized() {
            return Err(PayrailError::RailFinalized(rail_id));
        }
        if caller != rail.operator {
            return Err(PayrailError::unauthorized(
                "only the rail operator can modify a rail",
            ));
        }
        let key = ApprovalKey::new(&rail.asset, rail.payer, rail.operator);
        let approval = self.allowances.load(&key)?;

        let mut payer = self
            .ledger
            .account_at(&AccountKey::new(&rail.asset, rail.payer), current_epoch);
        settle_account_lockup(&mut payer, current_epoch)?;
        Ok((record, payer, key, approval))
    }

    fn commit_change(
        &mut self,
        record: RailRecord,
        payer: Account,
        key: ApprovalKey,
        approval: OperatorApproval,
        paid: &FeeBreakdown,
        epoch: Epoch,
    ) -> Result<()> {
        self.commit_rail(record, payer, paid, epoch)?;
        self.allowances.put(key, approval);
        Ok(())
    }
}

fn ensure_settled(payer: &Account, current_epoch: Epoch) -> Result<()> {
    if payer.is_settled_at(current_epoch) {
        Ok(())
    } else {
        Err(PayrailError::LockupNotSettled {
            settled_at: payer.lockup_last_settled_at,
            current: current_epoch,
        })
    }
}

/// Move the payer's lockup from `old` to `new`. Increases must fit in the
/// unlocked funds.
fn adjust_lockup(payer: &mut Account, old: TokenAmount, new: TokenAmount) -> Result<()> {
    if new > old {
        let needed = new - old;
        let available = payer.available();
        if needed > available {
            return Err(PayrailError::InsufficientFunds { needed, available });
        }
        payer.lockup_current =
            add_amount(payer.lockup_current, needed, "payer lockup")?;
    } else {
        let released = old - new;
        payer.lockup_current = (payer.lockup_current - released).max(Decimal::ZERO);
    }
    Ok(())
}
