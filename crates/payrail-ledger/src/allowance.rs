//! Operator allowance tracker: the gate every rail mutation passes through.
//!
//! ## Rules
//!
//! - **Increases** need an approved operator and must fit under the
//!   allowance: `usage + delta <= allowance`
//! - **Decreases** always succeed and floor at zero, even when usage already
//!   sits above a lowered allowance or the approval was revoked
//! - **One-time payments** consume allowance as well as usage: the funds are
//!   spent, so the client's budget shrinks by the same amount
//!
//! Updates are applied to a copy of the approval and committed only when
//! every step of the caller's operation succeeded.

use std::collections::HashMap;

use payrail_types::{
    AllowanceKind, ApprovalKey, Epoch, OperatorApproval, PayrailError, Result, TokenAmount,
    add_amount,
};
use rust_decimal::Decimal;

/// Apply a usage change from `old` to `new` on one resource.
#[allow(clippy::too_many_arguments)]
fn update_usage(
    key: &ApprovalKey,
    is_approved: bool,
    kind: AllowanceKind,
    usage: &mut TokenAmount,
    allowance: TokenAmount,
    old: TokenAmount,
    new: TokenAmount,
) -> Result<()> {
    if new > old {
        let increase = new - old;
        if !is_approved {
            return Err(PayrailError::OperatorNotApproved {
                client: key.client,
                operator: key.operator,
            });
        }
        let Some(raised) = usage.checked_add(increase).filter(|r| *r <= allowance) else {
            tracing::warn!(
                %kind,
                client = %key.client,
                operator = %key.operator,
                usage = %usage,
                increase = %increase,
                allowance = %allowance,
                "Operator allowance increase rejected"
            );
            return Err(PayrailError::AllowanceExceeded {
                kind,
                usage: *usage,
                increase,
                allowance,
            });
        };
        *usage = raised;
    } else {
        *usage = (*usage - (old - new)).max(Decimal::ZERO);
    }
    Ok(())
}

/// Move rate usage from `old` to `new`.
pub fn update_rate_usage(
    key: &ApprovalKey,
    approval: &mut OperatorApproval,
    old: TokenAmount,
    new: TokenAmount,
) -> Result<()> {
    let mut usage = approval.rate_usage;
    update_usage(
        key,
        approval.is_approved,
        AllowanceKind::Rate,
        &mut usage,
        approval.rate_allowance,
        old,
        new,
    )?;
    approval.rate_usage = usage;
    Ok(())
}

/// Move lockup usage from `old` to `new`.
pub fn update_lockup_usage(
    key: &ApprovalKey,
    approval: &mut OperatorApproval,
    old: TokenAmount,
    new: TokenAmount,
) -> Result<()> {
    let mut usage = approval.lockup_usage;
    update_usage(
        key,
        approval.is_approved,
        AllowanceKind::Lockup,
        &mut usage,
        approval.lockup_allowance,
        old,
        new,
    )?;
    approval.lockup_usage = usage;
    Ok(())
}

/// Reject a lockup period above the operator's cap.
pub fn check_lockup_period(approval: &OperatorApproval, period: Epoch) -> Result<()> {
    if period > approval.max_lockup_period {
        return Err(PayrailError::LockupPeriodExceeded {
            requested: period,
            max: approval.max_lockup_period,
        });
    }
    Ok(())
}

/// A one-time payment drawn from fixed lockup: both usage and allowance
/// shrink by the paid amount.
pub fn consume_one_time_payment(approval: &mut OperatorApproval, amount: TokenAmount) {
    approval.lockup_usage = (approval.lockup_usage - amount).max(Decimal::ZERO);
    approval.lockup_allowance = (approval.lockup_allowance - amount).max(Decimal::ZERO);
}

/// Per (asset, client, operator) approvals.
pub struct AllowanceTracker {
    approvals: HashMap<ApprovalKey, OperatorApproval>,
}

impl AllowanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            approvals: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &ApprovalKey) -> Option<&OperatorApproval> {
        self.approvals.get(key)
    }

    /// A copy of the approval, failing if none exists.
    pub fn load(&self, key: &ApprovalKey) -> Result<OperatorApproval> {
        self.approvals
            .get(key)
            .cloned()
            .ok_or(PayrailError::OperatorNotApproved {
                client: key.client,
                operator: key.operator,
            })
    }

    /// Require an existing, approved record.
    pub fn ensure_approved(&self, key: &ApprovalKey) -> Result<()> {
        match self.approvals.get(key) {
            Some(approval) if approval.is_approved => Ok(()),
            _ => Err(PayrailError::OperatorNotApproved {
                client: key.client,
                operator: key.operator,
            }),
        }
    }

    /// Create or replace allowances. Running usage is preserved.
    pub fn set_approval(
        &mut self,
        key: ApprovalKey,
        approved: bool,
        rate_allowance: TokenAmount,
        lockup_allowance: TokenAmount,
        max_lockup_period: Epoch,
    ) -> Result<()> {
        if rate_allowance.is_sign_negative() || lockup_allowance.is_sign_negative() {
            return Err(PayrailError::InvalidAmount {
                reason: "allowances must not be negative".to_string(),
            });
        }
        tracing::info!(
            asset = %key.asset,
            client = %key.client,
            operator = %key.operator,
            approved,
            rate_allowance = %rate_allowance,
            lockup_allowance = %lockup_allowance,
            max_lockup_period,
            "Operator approval set"
        );
        let approval = self.approvals.entry(key).or_default();
        approval.is_approved = approved;
        approval.rate_allowance = rate_allowance;
        approval.lockup_allowance = lockup_allowance;
        approval.max_lockup_period = max_lockup_period;
        Ok(())
    }

    /// Raise both allowances of an approved operator.
    pub fn increase_approval(
        &mut self,
        key: &ApprovalKey,
        rate_delta: TokenAmount,
        lockup_delta: TokenAmount,
    ) -> Result<()> {
        if rate_delta.is_sign_negative() || lockup_delta.is_sign_negative() {
            return Err(PayrailError::InvalidAmount {
                reason: "allowance increases must not be negative".to_string(),
            });
        }
        self.ensure_approved(key)?;
        let mut approval = self.load(key)?;
        approval.rate_allowance =
            add_amount(approval.rate_allowance, rate_delta, "rate allowance")?;
        approval.lockup_allowance =
            add_amount(approval.lockup_allowance, lockup_delta, "lockup allowance")?;
        self.approvals.insert(key.clone(), approval);
        Ok(())
    }

    /// Install an approved record with zero allowances if none exists.
    pub fn auto_approve(&mut self, key: ApprovalKey) {
        self.approvals
            .entry(key)
            .or_insert_with(|| OperatorApproval::approved(Decimal::ZERO, Decimal::ZERO, 0));
    }

    /// Commit an approval that was updated on a copy.
    pub fn put(&mut self, key: ApprovalKey, approval: OperatorApproval) {
        self.approvals.insert(key, approval);
    }

    /// Release a rail's usage on finalization. Always succeeds.
    pub fn release(&mut self, key: &ApprovalKey, rate: TokenAmount, lockup: TokenAmount) {
        if let Some(approval) = self.approvals.get_mut(key) {
            approval.rate_usage = (approval.rate_usage - rate).max(Decimal::ZERO);
            approval.lockup_usage = (approval.lockup_usage - lockup).max(Decimal::ZERO);
        }
    }
}

impl Default for AllowanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payrail_types::AccountId;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn key() -> ApprovalKey {
        ApprovalKey::new("USDFC", AccountId::new(), AccountId::new())
    }

    #[test]
    fn increase_within_allowance() {
        let k = key();
        let mut approval = OperatorApproval::approved(dec(10), dec(100), 30);
        update_rate_usage(&k, &mut approval, dec(0), dec(10)).unwrap();
        assert_eq!(approval.rate_usage, dec(10));
        update_lockup_usage(&k, &mut approval, dec(0), dec(100)).unwrap();
        assert_eq!(approval.lockup_usage, dec(100));
    }

    #[test]
    fn increase_beyond_allowance_rejected() {
        let k = key();
        let mut approval = OperatorApproval::approved(dec(10), dec(100), 30);
        let err = update_rate_usage(&k, &mut approval, dec(0), dec(11)).unwrap_err();
        assert!(matches!(
            err,
            PayrailError::AllowanceExceeded {
                kind: AllowanceKind::Rate,
                ..
            }
        ));
        assert_eq!(approval.rate_usage, Decimal::ZERO);
    }

    #[test]
    fn lowered_allowance_still_permits_wind_down() {
        let k = key();
        let mut approval = OperatorApproval::approved(dec(10), dec(100), 30);
        update_rate_usage(&k, &mut approval, dec(0), dec(10)).unwrap();
        approval.rate_allowance = dec(5);

        // Shrinking from 10 to 7 is fine even though 7 > 5.
        update_rate_usage(&k, &mut approval, dec(10), dec(7)).unwrap();
        assert_eq!(approval.rate_usage, dec(7));

        // Growing again is not, until usage is back under the limit.
        assert!(update_rate_usage(&k, &mut approval, dec(7), dec(8)).is_err());

        update_rate_usage(&k, &mut approval, dec(7), dec(4)).unwrap();
        update_rate_usage(&k, &mut approval, dec(4), dec(5)).unwrap();
        assert_eq!(approval.rate_usage, dec(5));
    }

    #[test]
    fn decrease_floors_at_zero() {
        let k = key();
        let mut approval = OperatorApproval::approved(dec(10), dec(100), 30);
        update_lockup_usage(&k, &mut approval, dec(0), dec(20)).unwrap();
        update_lockup_usage(&k, &mut approval, dec(50), dec(0)).unwrap();
        assert_eq!(approval.lockup_usage, Decimal::ZERO);
    }

    #[test]
    fn revoked_operator_can_only_decrease() {
        let k = key();
        let mut approval = OperatorApproval::approved(dec(10), dec(100), 30);
        update_rate_usage(&k, &mut approval, dec(0), dec(6)).unwrap();
        approval.is_approved = false;
        let err = update_rate_usage(&k, &mut approval, dec(6), dec(7)).unwrap_err();
        assert!(matches!(err, PayrailError::OperatorNotApproved { .. }));
        update_rate_usage(&k, &mut approval, dec(6), dec(1)).unwrap();
        assert_eq!(approval.rate_usage, dec(1));
    }

    #[test]
    fn one_time_payment_consumes_allowance() {
        let k = key();
        let mut approval = OperatorApproval::approved(dec(10), dec(100), 30);
        update_lockup_usage(&k, &mut approval, dec(0), dec(40)).unwrap();
        consume_one_time_payment(&mut approval, dec(15));
        assert_eq!(approval.lockup_usage, dec(25));
        assert_eq!(approval.lockup_allowance, dec(85));
    }

    #[test]
    fn tracker_set_preserves_usage() {
        let mut tracker = AllowanceTracker::new();
        let k = key();
        tracker.set_approval(k.clone(), true, dec(10), dec(100), 20).unwrap();
        let mut approval = tracker.load(&k).unwrap();
        update_rate_usage(&k, &mut approval, dec(0), dec(8)).unwrap();
        tracker.put(k.clone(), approval);

        tracker.set_approval(k.clone(), true, dec(5), dec(50), 10).unwrap();
        let approval = tracker.get(&k).unwrap();
        assert_eq!(approval.rate_usage, dec(8));
        assert_eq!(approval.rate_allowance, dec(5));
        assert_eq!(approval.max_lockup_period, 10);
    }

    #[test]
    fn tracker_missing_approval_errors() {
        let tracker = AllowanceTracker::new();
        let k = key();
        assert!(matches!(
            tracker.load(&k).unwrap_err(),
            PayrailError::OperatorNotApproved { .. }
        ));
        assert!(tracker.ensure_approved(&k).is_err());
    }

    #[test]
    fn increase_approval_requires_approved() {
        let mut tracker = AllowanceTracker::new();
        let k = key();
        tracker.set_approval(k.clone(), false, dec(1), dec(1), 1).unwrap();
        assert!(tracker.increase_approval(&k, dec(1), dec(1)).is_err());

        tracker.set_approval(k.clone(), true, dec(1), dec(1), 1).unwrap();
        tracker.increase_approval(&k, dec(2), dec(3)).unwrap();
        let approval = tracker.get(&k).unwrap();
        assert_eq!(approval.rate_allowance, dec(3));
        assert_eq!(approval.lockup_allowance, dec(4));
    }

    #[test]
    fn increase_approval_overflow_leaves_allowances_unchanged() {
        let mut tracker = AllowanceTracker::new();
        let k = key();
        tracker.set_approval(k.clone(), true, dec(1), Decimal::MAX, 1).unwrap();
        let err = tracker.increase_approval(&k, dec(1), dec(1)).unwrap_err();
        assert!(matches!(err, PayrailError::ArithmeticOverflow { .. }));
        let approval = tracker.get(&k).unwrap();
        assert_eq!(approval.rate_allowance, dec(1));
        assert_eq!(approval.lockup_allowance, Decimal::MAX);
    }

    #[test]
    fn usage_overflow_counts_as_exceeding_allowance() {
        let k = key();
        let mut approval = OperatorApproval::approved(Decimal::MAX, Decimal::MAX, 1);
        approval.rate_usage = Decimal::MAX;
        let err = update_rate_usage(&k, &mut approval, dec(0), dec(1)).unwrap_err();
        assert!(matches!(err, PayrailError::AllowanceExceeded { .. }));
        assert_eq!(approval.rate_usage, Decimal::MAX);
    }

    #[test]
    fn auto_approve_does_not_overwrite() {
        let mut tracker = AllowanceTracker::new();
        let k = key();
        tracker.set_approval(k.clone(), true, dec(7), dec(7), 7).unwrap();
        tracker.auto_approve(k.clone());
        assert_eq!(tracker.get(&k).unwrap().rate_allowance, dec(7));

        let fresh = key();
        tracker.auto_approve(fresh.clone());
        let approval = tracker.get(&fresh).unwrap();
        assert!(approval.is_approved);
        assert_eq!(approval.rate_allowance, Decimal::ZERO);
    }

    #[test]
    fn release_floors_at_zero() {
        let mut tracker = AllowanceTracker::new();
        let k = key();
        tracker.set_approval(k.clone(), true, dec(10), dec(10), 5).unwrap();
        let mut approval = tracker.load(&k).unwrap();
        update_rate_usage(&k, &mut approval, dec(0), dec(3)).unwrap();
        tracker.put(k.clone(), approval);
        tracker.release(&k, dec(5), dec(5));
        let approval = tracker.get(&k).unwrap();
        assert_eq!(approval.rate_usage, Decimal::ZERO);
        assert_eq!(approval.lockup_usage, Decimal::ZERO);
    }
}
