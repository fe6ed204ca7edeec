//! Segment-based rail settlement.
//!
//! ## Algorithm
//!
//! ```text
//! target = min(until, payer.lockup_last_settled_at)   active rail
//!        = min(until, end_epoch)                      terminated rail
//!
//! cursor = settled_up_to
//! while cursor < target:
//!     head of queue?  segment = (cursor, min(target, head.until)] at head.rate
//!     otherwise       segment = (cursor, target] at payment_rate
//!     zero rate       → advance, no transfer, no validator call
//!     validator       → may shrink amount / stop early (bounds-checked)
//!     no progress     → halt
//!     transfer        → payer lockup -= rate * d, payer funds -= amount,
//!                       split amount into fee / commission / net payee
//!     head consumed   → dequeue
//!     stopped early   → halt
//! terminated and settled_up_to >= end_epoch → finalize
//! ```
//!
//! A segment releases the full `rate * d` reservation even when the
//! validator approved less; the difference returns to the payer's free
//! balance. The walk runs on a copy of the payer account and is committed
//! only if it finishes without error.

use payrail_ledger::settle_account_lockup;
use payrail_types::{
    Account, AccountId, AccountKey, ApprovalKey, Epoch, FeeBreakdown, PayrailError, Rail, RailId,
    Result, SegmentSettlement, SettlementOutcome, SettlementProgress, TokenAmount, add_amount,
};

use crate::engine::{PaymentsEngine, RailRecord, ensure_solvent, rate_times};
use crate::fees::FeeSplitter;
use crate::rate_queue::RateChangeQueue;
use crate::validator::{ValidationRequest, Validator, checked_validate};

/// Result of walking a rail forward, not yet committed.
#[derive(Debug, Clone)]
pub(crate) struct SettlementPlan {
    /// Payer account after the walk.
    pub(crate) payer: Account,
    pub(crate) segments: Vec<SegmentSettlement>,
    pub(crate) totals: FeeBreakdown,
    /// Queue entries fully consumed, from the front.
    pub(crate) dequeued: usize,
    pub(crate) settled_up_to: Epoch,
    /// Why the walk stopped short of its target, if it did.
    pub(crate) halted: Option<String>,
}

/// Operator usage a finalized rail gives back.
pub(crate) struct UsageRelease {
    key: ApprovalKey,
    rate: TokenAmount,
    lockup: TokenAmount,
}

enum Step {
    Settled(SegmentSettlement),
    NoProgress(String),
}

/// Walks one rail's segments against a payer account copy.
pub(crate) struct SegmentWalk<'a> {
    pub(crate) rail: &'a Rail,
    pub(crate) queue: &'a RateChangeQueue,
    pub(crate) validator: Option<&'a dyn Validator>,
    pub(crate) splitter: &'a FeeSplitter,
}

impl SegmentWalk<'_> {
    pub(crate) fn plan(&self, mut payer: Account, target: Epoch) -> Result<SettlementPlan> {
        let mut cursor = self.rail.settled_up_to;
        let mut dequeued = 0;
        let mut segments = Vec::new();
        let mut totals = FeeBreakdown::default();
        let mut halted = None;

        while cursor < target {
            while self
                .queue
                .get(dequeued)
                .is_some_and(|head| head.until_epoch <= cursor)
            {
                dequeued += 1;
            }

            let (segment_end, rate, boundary) = match self.queue.get(dequeued) {
                Some(head) => (target.min(head.until_epoch), head.rate, Some(head.until_epoch)),
                None => (target, self.rail.payment_rate, None),
            };

            if rate.is_zero() {
                cursor = segment_end;
            } else {
                match self.settle_segment(&mut payer, cursor, segment_end, rate)? {
                    Step::NoProgress(note) => {
                        halted = Some(note);
                        break;
                    }
                    Step::Settled(segment) => {
                        cursor = segment.to_epoch;
                        totals.accumulate(&segment.fees)?;
                        let note = segment.note.clone();
                        segments.push(segment);
                        if cursor < segment_end {
                            halted = Some(note.unwrap_or_else(|| {
                                format!("validator settled only to epoch {cursor}")
                            }));
                            break;
                        }
                    }
                }
            }

            if boundary == Some(cursor) {
                dequeued += 1;
            }
        }

        Ok(SettlementPlan {
            payer,
            segments,
            totals,
            dequeued,
            settled_up_to: cursor,
            halted,
        })
    }

    fn settle_segment(
        &self,
        payer: &mut Account,
        from: Epoch,
        to: Epoch,
        rate: TokenAmount,
    ) -> Result<Step> {
        let proposed = rate_times(rate, to - from, "segment amount")?;
        let (amount, settled_to, note) = match self.validator {
            None => (proposed, to, None),
            Some(validator) => {
                let request = ValidationRequest {
                    rail_id: self.rail.id,
                    proposed_amount: proposed,
                    from_epoch: from,
                    to_epoch: to,
                    rate,
                };
                let response = checked_validate(validator, &request)?;
                (response.modified_amount, response.settle_up_to, Some(response.note))
            }
        };

        if settled_to == from {
            let note = note
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("validator made no progress past epoch {from}"));
            return Ok(Step::NoProgress(note));
        }

        // The full reservation for the span is released, not the settled
        // amount; whatever the validator withheld returns to free funds.
        let released = rate_times(rate, settled_to - from, "lockup release")?;
        if payer.lockup_current < released {
            return Err(PayrailError::InvariantViolation {
                reason: format!(
                    "{}: payer lockup {} cannot cover segment reservation {released}",
                    self.rail.id, payer.lockup_current
                ),
            });
        }
        payer.lockup_current -= released;
        payer.funds -= amount;
        ensure_solvent(payer, "segment settlement")?;

        let fees = self.splitter.split(amount, self.rail.commission_rate_bps)?;
        tracing::debug!(
            rail_id = %self.rail.id,
            from,
            to = settled_to,
            rate = %rate,
            amount = %amount,
            released = %released,
            "Segment settled"
        );
        Ok(Step::Settled(SegmentSettlement {
            from_epoch: from,
            to_epoch: settled_to,
            rate,
            lockup_released: released,
            fees,
            note,
        }))
    }
}

impl PaymentsEngine {
    /// Settle a rail up to `until_epoch`.
    ///
    /// The caller must be the rail's payer, payee, or operator. Progress
    /// short of the target is reported in the outcome, not as an error.
    ///
    /// # Errors
    /// `InvalidEpoch` if `until_epoch > current_epoch`; `RailNotFound`;
    /// `Unauthorized`; `InvalidValidatorResponse` (nothing is applied).
    pub fn settle_rail(
        &mut self,
        caller: AccountId,
        rail_id: RailId,
        until_epoch: Epoch,
        current_epoch: Epoch,
    ) -> Result<SettlementOutcome> {
        if until_epoch > current_epoch {
            return Err(PayrailError::InvalidEpoch {
                reason: format!(
                    "cannot settle to future epoch {until_epoch} (current {current_epoch})"
                ),
            });
        }
        let rail = &self.record(rail_id)?.rail;
        if !rail.is_participant(caller) {
            return Err(PayrailError::unauthorized(
                "only the payer, payee, or operator can settle a rail",
            ));
        }
        self.settle_internal(rail_id, until_epoch, current_epoch, true)
    }

    /// Escape hatch: the payer settles a terminated rail to its end epoch at
    /// the full rate, skipping the validator. Only after `end_epoch` has
    /// passed.
    pub fn settle_terminated_rail_without_validation(
        &mut self,
        caller: AccountId,
        rail_id: RailId,
        current_epoch: Epoch,
    ) -> Result<SettlementOutcome> {
        let rail = &self.record(rail_id)?.rail;
        if rail.is_finalized() {
            return Ok(SettlementOutcome::empty(
                rail_id,
                rail.settled_up_to,
                SettlementProgress::Finalized,
                "rail already finalized",
            ));
        }
        if caller != rail.payer {
            return Err(PayrailError::unauthorized(
                "only the payer can bypass validation",
            ));
        }
        if !rail.is_terminated() {
            return Err(PayrailError::SettlementRefused {
                reason: format!("{rail_id} is not terminated"),
            });
        }
        if current_epoch <= rail.end_epoch {
            return Err(PayrailError::SettlementRefused {
                reason: format!(
                    "{rail_id} ends at epoch {}; bypass opens after it (current {current_epoch})",
                    rail.end_epoch
                ),
            });
        }
        let end_epoch = rail.end_epoch;
        tracing::warn!(
            rail_id = %rail_id,
            payer = %caller,
            end_epoch,
            "Settling terminated rail without validation"
        );
        self.settle_internal(rail_id, end_epoch, current_epoch, false)
    }

    /// Settle and commit. Shared by both entry points.
    fn settle_internal(
        &mut self,
        rail_id: RailId,
        until_epoch: Epoch,
        current_epoch: Epoch,
        use_validator: bool,
    ) -> Result<SettlementOutcome> {
        let mut record = self.record(rail_id)?.clone();
        if record.rail.is_finalized() {
            return Ok(SettlementOutcome::empty(
                rail_id,
                record.rail.settled_up_to,
                SettlementProgress::Finalized,
                "rail already finalized",
            ));
        }

        let payer_key = AccountKey::new(&record.rail.asset, record.rail.payer);
        let mut payer = self.ledger.account_at(&payer_key, current_epoch);
        settle_account_lockup(&mut payer, current_epoch)?;

        let start = record.rail.settled_up_to;
        let plan = self.plan_settlement(&record, payer, until_epoch, use_validator)?;
        let segments = plan.segments.clone();
        let totals = plan.totals;
        let halted = plan.halted.clone();
        let mut payer = self.apply_plan(&mut record, plan);

        let release = self.finalize_if_done(&mut record, &mut payer)?;
        let finalized = release.is_some();

        let settled_up_to = record.rail.settled_up_to;
        let (progress, note) = if finalized {
            (
                SettlementProgress::Finalized,
                "rail settled to its end epoch and finalized".to_string(),
            )
        } else if settled_up_to >= until_epoch {
            (SettlementProgress::Complete, format!("settled to epoch {settled_up_to}"))
        } else {
            let reason = halted.unwrap_or_else(|| {
                if record.rail.is_active() {
                    format!(
                        "payer lockup only settled to epoch {}",
                        payer.lockup_last_settled_at
                    )
                } else {
                    format!("rail ends at epoch {}", record.rail.end_epoch)
                }
            });
            if settled_up_to > start {
                (SettlementProgress::Partial, reason)
            } else {
                (SettlementProgress::Stalled, reason)
            }
        };

        self.commit_settlement(record, payer, &totals, release, current_epoch)?;

        match progress {
            SettlementProgress::Partial | SettlementProgress::Stalled => tracing::warn!(
                rail_id = %rail_id,
                settled_up_to,
                requested = until_epoch,
                %progress,
                note = %note,
                "Rail settlement stopped short"
            ),
            _ => tracing::info!(
                rail_id = %rail_id,
                settled_up_to,
                total = %totals.total,
                %progress,
                "Rail settled"
            ),
        }

        Ok(SettlementOutcome {
            rail_id,
            totals,
            settled_up_to,
            progress,
            segments,
            note,
        })
    }

    /// Walk a rail toward `until_epoch` on a copy of its payer.
    pub(crate) fn plan_settlement(
        &self,
        record: &RailRecord,
        payer: Account,
        until_epoch: Epoch,
        use_validator: bool,
    ) -> Result<SettlementPlan> {
        let rail = &record.rail;
        let limit = if rail.is_terminated() {
            rail.end_epoch
        } else {
            payer.lockup_last_settled_at
        };
        let target = until_epoch.min(limit).max(rail.settled_up_to);

        let validator = match rail.validator {
            Some(id) if use_validator => Some(self.validators.get(id)?),
            _ => None,
        };
        SegmentWalk {
            rail,
            queue: &record.queue,
            validator: validator.as_deref(),
            splitter: &self.splitter,
        }
        .plan(payer, target)
    }

    /// Fold a plan into a rail record; returns the payer account after it.
    pub(crate) fn apply_plan(&self, record: &mut RailRecord, plan: SettlementPlan) -> Account {
        record.queue.pop_n(plan.dequeued);
        record.rail.settled_up_to = plan.settled_up_to;
        plan.payer
    }

    /// Finalize a terminated rail that has reached its end epoch and refund
    /// its fixed lockup to the payer. Returns the operator usage to release
    /// once the settlement commits.
    pub(crate) fn finalize_if_done(
        &self,
        record: &mut RailRecord,
        payer: &mut Account,
    ) -> Result<Option<UsageRelease>> {
        let rail = &mut record.rail;
        if !rail.is_terminated() || rail.settled_up_to < rail.end_epoch {
            return Ok(None);
        }
        if payer.lockup_current < rail.lockup_fixed {
            return Err(PayrailError::InvariantViolation {
                reason: format!(
                    "{}: payer lockup {} cannot cover fixed lockup {}",
                    rail.id, payer.lockup_current, rail.lockup_fixed
                ),
            });
        }
        let refunded = rail.lockup_fixed;
        let release = UsageRelease {
            key: ApprovalKey::new(&rail.asset, rail.payer, rail.operator),
            rate: rail.payment_rate,
            lockup: add_amount(
                refunded,
                rate_times(rail.payment_rate, rail.lockup_period, "operator usage")?,
                "operator usage",
            )?,
        };
        rail.mark_finalized()?;
        record.queue.clear();
        payer.lockup_current -= refunded;

        tracing::info!(
            rail_id = %rail.id,
            end_epoch = rail.end_epoch,
            refunded = %refunded,
            "Rail finalized"
        );
        Ok(Some(release))
    }

    /// Write back a settled rail and its payer, pay out, then release the
    /// operator usage of a finalized rail.
    pub(crate) fn commit_settlement(
        &mut self,
        record: RailRecord,
        payer: Account,
        totals: &FeeBreakdown,
        release: Option<UsageRelease>,
        epoch: Epoch,
    ) -> Result<()> {
        self.commit_rail(record, payer, totals, epoch)?;
        if let Some(UsageRelease { key, rate, lockup }) = release {
            self.allowances.release(&key, rate, lockup);
        }
        Ok(())
    }
}
