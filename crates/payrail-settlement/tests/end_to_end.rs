//! End-to-end integration tests across the ledger and settlement planes.
//!
//! These tests drive full rail lifecycles through the public engine API:
//! deposit -> approve operator -> create rail -> set lockup and rate ->
//! settle -> terminate -> finalize, with and without validators.

use std::sync::Arc;

use parking_lot::Mutex;
use payrail_settlement::{
    PaymentsEngine, ValidationRequest, ValidationResponse, Validator,
};
use payrail_types::*;
use rust_decimal::Decimal;

const ASSET: &str = "USDFC";

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Helper: an engine with one funded payer and an approved operator.
struct World {
    engine: PaymentsEngine,
    payer: AccountId,
    payee: AccountId,
    operator: AccountId,
}

impl World {
    fn new(config: EngineConfig, funds: i64) -> Self {
        init_tracing();
        let mut engine = PaymentsEngine::new(config).expect("valid config");
        let payer = AccountId::new();
        let payee = AccountId::new();
        let operator = AccountId::new();
        engine
            .deposit(ASSET, payer, dec(funds), 0)
            .expect("deposit should succeed");
        engine
            .set_operator_approval(ASSET, payer, operator, true, dec(1_000), dec(1_000_000), 1_000)
            .expect("approval should succeed");
        Self {
            engine,
            payer,
            payee,
            operator,
        }
    }

    fn fee_free(funds: i64) -> Self {
        Self::new(EngineConfig::fee_free(), funds)
    }

    /// Create a rail at `epoch` with the given rate, period, and fixed lockup.
    fn open_rail(
        &mut self,
        validator: Option<AccountId>,
        rate: i64,
        period: Epoch,
        fixed: i64,
        epoch: Epoch,
    ) -> RailId {
        let id = self
            .engine
            .create_rail(self.operator, ASSET, self.payer, self.payee, validator, 0, epoch)
            .expect("rail creation should succeed");
        self.engine
            .modify_rail_lockup(self.operator, id, period, dec(fixed), epoch)
            .expect("lockup should be set");
        self.engine
            .modify_rail_payment(self.operator, id, dec(rate), Decimal::ZERO, epoch)
            .expect("rate should be set");
        id
    }

    fn payer_account(&self) -> Account {
        self.engine.account(ASSET, self.payer)
    }

    fn payee_funds(&self) -> Decimal {
        self.engine.account(ASSET, self.payee).funds
    }
}

/// Approves every segment as proposed.
struct ApproveAll;

impl Validator for ApproveAll {
    fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        ValidationResponse::approve(request)
    }
}

/// Confirms only the first half of each segment.
struct HalfSpan;

impl Validator for HalfSpan {
    fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        let mid = request.from_epoch + (request.to_epoch - request.from_epoch) / 2;
        ValidationResponse {
            modified_amount: request.rate * Decimal::from(mid - request.from_epoch),
            settle_up_to: mid,
            note: "half span confirmed".into(),
        }
    }
}

/// Never makes progress; remembers terminations.
#[derive(Default)]
struct Stuck {
    terminated: Mutex<Vec<(RailId, AccountId, Epoch)>>,
}

impl Validator for Stuck {
    fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        ValidationResponse {
            modified_amount: Decimal::ZERO,
            settle_up_to: request.from_epoch,
            note: "dispute open".into(),
        }
    }

    fn rail_terminated(&self, rail_id: RailId, terminator: AccountId, end_epoch: Epoch) {
        self.terminated.lock().push((rail_id, terminator, end_epoch));
    }
}

/// Asks for twice the entitled amount.
struct Greedy;

impl Validator for Greedy {
    fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        ValidationResponse {
            modified_amount: request.proposed_amount * dec(2),
            settle_up_to: request.to_epoch,
            note: String::new(),
        }
    }
}

// =============================================================================
// Scenario A: lockup at creation, then a 3-epoch settlement
// =============================================================================
#[test]
fn scenario_a_basic_stream() {
    let mut w = World::fee_free(100);
    let id = w.open_rail(None, 10, 5, 0, 0);
    assert_eq!(w.payer_account().lockup_current, dec(50));

    let out = w.engine.settle_rail(w.payee, id, 3, 3).unwrap();
    assert_eq!(out.progress, SettlementProgress::Complete);
    assert_eq!(out.settled_up_to, 3);
    assert_eq!(out.total_settled(), dec(30));

    let payer = w.payer_account();
    assert_eq!(payer.funds, dec(70));
    assert_eq!(payer.lockup_current, dec(50));
    assert_eq!(w.payee_funds(), dec(30));
    w.engine.verify_supply(ASSET).unwrap();
}

// =============================================================================
// Scenario B: partial account lockup settlement
// =============================================================================
#[test]
fn scenario_b_lockup_accrual_stops_at_affordable_epoch() {
    let mut w = World::fee_free(50);
    w.open_rail(None, 20, 0, 0, 0);

    let s = w.engine.settle_account_lockup(ASSET, w.payer, 10).unwrap();
    assert!(!s.fully_settled);
    assert_eq!(s.settled_at, 2);
    let payer = w.payer_account();
    assert_eq!(payer.lockup_last_settled_at, 2);
    assert_eq!(payer.lockup_current, dec(40));
}

#[test]
fn settlement_clamps_to_payer_lockup() {
    let mut w = World::fee_free(50);
    let id = w.open_rail(None, 20, 0, 0, 0);

    let out = w.engine.settle_rail(w.payee, id, 10, 10).unwrap();
    assert_eq!(out.progress, SettlementProgress::Partial);
    assert_eq!(out.settled_up_to, 2);
    assert_eq!(out.total_settled(), dec(40));
    assert!(out.note.contains("epoch 2"), "note: {}", out.note);

    // A top-up lets settlement continue from where it stopped.
    w.engine.deposit(ASSET, w.payer, dec(200), 10).unwrap();
    let out = w.engine.settle_rail(w.payee, id, 10, 10).unwrap();
    assert_eq!(out.progress, SettlementProgress::Complete);
    assert_eq!(w.payee_funds(), dec(200));
}

// =============================================================================
// Scenario C: termination with lagging payer lockup, then finalization
// =============================================================================
#[test]
fn scenario_c_terminate_and_finalize() {
    // 30 reserved at creation leaves 90 epochs of accrual at rate 1.
    let mut w = World::fee_free(120);
    let id = w.open_rail(None, 1, 20, 10, 0);
    assert_eq!(w.payer_account().lockup_current, dec(30));

    let end = w.engine.terminate_rail(w.operator, id, 100).unwrap();
    assert_eq!(end, 110);
    assert_eq!(w.payer_account().lockup_last_settled_at, 90);
    assert_eq!(w.payer_account().lockup_rate, Decimal::ZERO);

    let out = w.engine.settle_rail(w.payee, id, 100, 100).unwrap();
    assert_eq!(out.progress, SettlementProgress::Complete);
    assert_eq!(out.total_settled(), dec(100));

    let out = w.engine.settle_rail(w.payee, id, 115, 115).unwrap();
    assert_eq!(out.progress, SettlementProgress::Finalized);
    assert_eq!(out.settled_up_to, 110);
    assert_eq!(out.total_settled(), dec(10));

    let rail = w.engine.rail(id).unwrap();
    assert!(rail.is_finalized());
    assert_eq!(rail.payment_rate, Decimal::ZERO);
    assert_eq!(rail.lockup_fixed, Decimal::ZERO);
    assert_eq!(rail.lockup_period, 0);

    let payer = w.payer_account();
    assert_eq!(payer.funds, dec(10));
    assert_eq!(payer.lockup_current, Decimal::ZERO);
    assert_eq!(w.payee_funds(), dec(110));

    let approval = w.engine.operator_approval(ASSET, w.payer, w.operator);
    assert_eq!(approval.rate_usage, Decimal::ZERO);
    assert_eq!(approval.lockup_usage, Decimal::ZERO);

    // Finalized rails answer with a zero outcome.
    let again = w.engine.settle_rail(w.payee, id, 120, 120).unwrap();
    assert_eq!(again.progress, SettlementProgress::Finalized);
    assert!(again.is_zero());
    w.engine.verify_supply(ASSET).unwrap();
}

// =============================================================================
// Scenario D: lowered allowance still permits wind-down
// =============================================================================
#[test]
fn scenario_d_allowance_lowered_below_usage() {
    let mut w = World::fee_free(10_000);
    w.engine
        .set_operator_approval(ASSET, w.payer, w.operator, true, dec(10), dec(1_000), 10)
        .unwrap();
    let id = w.open_rail(None, 10, 0, 0, 0);
    assert_eq!(
        w.engine.operator_approval(ASSET, w.payer, w.operator).rate_usage,
        dec(10)
    );

    w.engine
        .set_operator_approval(ASSET, w.payer, w.operator, true, dec(5), dec(1_000), 10)
        .unwrap();
    let approval = w.engine.operator_approval(ASSET, w.payer, w.operator);
    assert_eq!(approval.rate_usage, dec(10));
    assert_eq!(approval.rate_allowance, dec(5));

    w.engine
        .modify_rail_payment(w.operator, id, dec(7), Decimal::ZERO, 0)
        .unwrap();
    let err = w
        .engine
        .modify_rail_payment(w.operator, id, dec(8), Decimal::ZERO, 0)
        .unwrap_err();
    assert!(matches!(
        err,
        PayrailError::AllowanceExceeded {
            kind: AllowanceKind::Rate,
            ..
        }
    ));
    assert_eq!(w.engine.rail(id).unwrap().payment_rate, dec(7));

    w.engine
        .modify_rail_payment(w.operator, id, dec(5), Decimal::ZERO, 0)
        .unwrap();
    assert!(w
        .engine
        .modify_rail_payment(w.operator, id, dec(6), Decimal::ZERO, 0)
        .is_err());
    w.engine
        .modify_rail_payment(w.operator, id, dec(3), Decimal::ZERO, 0)
        .unwrap();
    assert_eq!(
        w.engine.operator_approval(ASSET, w.payer, w.operator).rate_usage,
        dec(3)
    );
}

#[test]
fn revoked_operator_can_wind_down_but_not_open() {
    let mut w = World::fee_free(1_000);
    let id = w.open_rail(None, 10, 2, 0, 0);
    w.engine
        .set_operator_approval(ASSET, w.payer, w.operator, false, dec(1_000), dec(1_000), 10)
        .unwrap();

    let err = w
        .engine
        .create_rail(w.operator, ASSET, w.payer, w.payee, None, 0, 0)
        .unwrap_err();
    assert!(matches!(err, PayrailError::OperatorNotApproved { .. }));
    assert!(w
        .engine
        .modify_rail_payment(w.operator, id, dec(11), Decimal::ZERO, 0)
        .is_err());
    w.engine
        .modify_rail_payment(w.operator, id, dec(2), Decimal::ZERO, 0)
        .unwrap();
    w.engine.terminate_rail(w.operator, id, 0).unwrap();
}

// =============================================================================
// Boundaries and idempotence
// =============================================================================
#[test]
fn zero_rate_rail_advances_without_transfer() {
    let mut w = World::fee_free(100);
    let id = w.open_rail(None, 0, 0, 0, 0);
    let out = w.engine.settle_rail(w.payer, id, 40, 40).unwrap();
    assert_eq!(out.settled_up_to, 40);
    assert!(out.is_zero());
    assert!(out.segments.is_empty());
    assert_eq!(w.payer_account().funds, dec(100));
}

#[test]
fn settling_twice_transfers_once() {
    let mut w = World::fee_free(1_000);
    let id = w.open_rail(None, 10, 5, 0, 0);
    let first = w.engine.settle_rail(w.payee, id, 6, 6).unwrap();
    assert_eq!(first.total_settled(), dec(60));
    let before = w.payer_account();

    let second = w.engine.settle_rail(w.payee, id, 6, 6).unwrap();
    assert!(second.is_zero());
    assert_eq!(second.progress, SettlementProgress::Complete);
    assert_eq!(w.payer_account(), before);
    assert_eq!(w.payee_funds(), dec(60));
}

#[test]
fn settle_rejects_future_epoch_and_strangers() {
    let mut w = World::fee_free(1_000);
    let id = w.open_rail(None, 1, 1, 0, 0);
    assert!(matches!(
        w.engine.settle_rail(w.payee, id, 6, 5).unwrap_err(),
        PayrailError::InvalidEpoch { .. }
    ));
    assert!(matches!(
        w.engine.settle_rail(AccountId::new(), id, 5, 5).unwrap_err(),
        PayrailError::Unauthorized { .. }
    ));
    assert!(matches!(
        w.engine.settle_rail(w.payee, RailId(99), 5, 5).unwrap_err(),
        PayrailError::RailNotFound(RailId(99))
    ));
}

// =============================================================================
// Validators
// =============================================================================
#[test]
fn validated_rate_change_is_queued_then_settled_at_old_rate() {
    let mut w = World::fee_free(1_000);
    let arbiter = AccountId::new();
    w.engine.register_validator(arbiter, Arc::new(ApproveAll));
    let id = w.open_rail(Some(arbiter), 10, 10, 0, 0);
    assert!(
        w.engine.rate_change_queue(id).unwrap().is_empty(),
        "a zero old rate with an empty queue needs no entry"
    );

    w.engine
        .modify_rail_payment(w.operator, id, dec(4), Decimal::ZERO, 5)
        .unwrap();
    // A second change in the same epoch shares the entry.
    w.engine
        .modify_rail_payment(w.operator, id, dec(6), Decimal::ZERO, 5)
        .unwrap();
    w.engine
        .modify_rail_payment(w.operator, id, dec(4), Decimal::ZERO, 5)
        .unwrap();
    let queue = w.engine.rate_change_queue(id).unwrap();
    assert_eq!(
        queue,
        vec![RateChange {
            rate: dec(10),
            until_epoch: 5
        }]
    );
    assert_eq!(w.engine.rail(id).unwrap().settled_up_to, 0);

    let out = w.engine.settle_rail(w.payee, id, 8, 8).unwrap();
    assert_eq!(out.segments.len(), 2);
    assert_eq!(out.segments[0].rate, dec(10));
    assert_eq!(out.segments[1].rate, dec(4));
    assert_eq!(out.total_settled(), dec(62));
    assert!(w.engine.rate_change_queue(id).unwrap().is_empty());
    assert_eq!(w.payer_account().lockup_current, dec(40));
}

#[test]
fn partial_validator_progress_is_resumable() {
    let mut w = World::fee_free(1_000);
    let arbiter = AccountId::new();
    w.engine.register_validator(arbiter, Arc::new(HalfSpan));
    let id = w.open_rail(Some(arbiter), 10, 10, 0, 0);

    let out = w.engine.settle_rail(w.payee, id, 10, 10).unwrap();
    assert_eq!(out.progress, SettlementProgress::Partial);
    assert_eq!(out.settled_up_to, 5);
    assert_eq!(out.note, "half span confirmed");

    let out = w.engine.settle_rail(w.payee, id, 10, 10).unwrap();
    assert_eq!(out.settled_up_to, 7);
    assert_eq!(w.payee_funds(), dec(70));
    assert!(w.payer_account().is_solvent());
}

#[test]
fn stalled_validator_then_escape_hatch() {
    let mut w = World::fee_free(1_000);
    let arbiter = AccountId::new();
    let stuck = Arc::new(Stuck::default());
    w.engine.register_validator(arbiter, stuck.clone());
    let id = w.open_rail(Some(arbiter), 10, 5, 0, 0);

    let out = w.engine.settle_rail(w.payee, id, 3, 3).unwrap();
    assert_eq!(out.progress, SettlementProgress::Stalled);
    assert!(out.is_zero());
    assert_eq!(out.note, "dispute open");
    assert_eq!(w.engine.rail(id).unwrap().settled_up_to, 0);

    let end = w.engine.terminate_rail(w.operator, id, 3).unwrap();
    assert_eq!(end, 8);
    assert_eq!(stuck.terminated.lock().as_slice(), &[(id, w.operator, 8)]);

    let err = w
        .engine
        .settle_terminated_rail_without_validation(w.payer, id, 8)
        .unwrap_err();
    assert!(matches!(err, PayrailError::SettlementRefused { .. }));
    let err = w
        .engine
        .settle_terminated_rail_without_validation(w.payee, id, 9)
        .unwrap_err();
    assert!(matches!(err, PayrailError::Unauthorized { .. }));

    let out = w
        .engine
        .settle_terminated_rail_without_validation(w.payer, id, 9)
        .unwrap();
    assert_eq!(out.progress, SettlementProgress::Finalized);
    assert_eq!(out.total_settled(), dec(80));
    assert_eq!(w.payee_funds(), dec(80));
    let payer = w.payer_account();
    assert_eq!(payer.funds, dec(920));
    assert_eq!(payer.lockup_current, Decimal::ZERO);
}

#[test]
fn escape_hatch_requires_terminated_rail() {
    let mut w = World::fee_free(1_000);
    let id = w.open_rail(None, 1, 1, 0, 0);
    let err = w
        .engine
        .settle_terminated_rail_without_validation(w.payer, id, 5)
        .unwrap_err();
    assert!(matches!(err, PayrailError::SettlementRefused { .. }));
}

#[test]
fn greedy_validator_aborts_without_side_effects() {
    let mut w = World::fee_free(1_000);
    let arbiter = AccountId::new();
    w.engine.register_validator(arbiter, Arc::new(Greedy));
    let id = w.open_rail(Some(arbiter), 10, 5, 0, 0);
    let payer_before = w.payer_account();
    let rail_before = w.engine.rail(id).unwrap();

    let err = w.engine.settle_rail(w.payee, id, 4, 4).unwrap_err();
    assert!(matches!(err, PayrailError::InvalidValidatorResponse { .. }));
    assert_eq!(w.payer_account(), payer_before);
    assert_eq!(w.engine.rail(id).unwrap(), rail_before);
    assert_eq!(w.payee_funds(), Decimal::ZERO);
}

// =============================================================================
// Fees, commission, supply
// =============================================================================
#[test]
fn fees_and_commission_round_trip() {
    let fee_owner = AccountId::new();
    let mut w = World::new(
        EngineConfig {
            protocol_fee_bps: 10,
            fee_owner: Some(fee_owner),
            ..EngineConfig::default()
        },
        100_000,
    );
    let id = w
        .engine
        .create_rail(w.operator, ASSET, w.payer, w.payee, None, 500, 0)
        .unwrap();
    w.engine
        .modify_rail_lockup(w.operator, id, 2, Decimal::ZERO, 0)
        .unwrap();
    w.engine
        .modify_rail_payment(w.operator, id, dec(1_000), Decimal::ZERO, 0)
        .unwrap();

    let out = w.engine.settle_rail(w.operator, id, 7, 7).unwrap();
    assert_eq!(out.totals.total, dec(7_000));
    assert_eq!(out.totals.protocol_fee, dec(7));
    assert_eq!(out.totals.operator_commission, dec(349));
    assert_eq!(out.totals.net_payee, dec(6_644));
    assert!(out.segments.iter().all(|s| s.fees.is_balanced()));

    assert_eq!(w.payee_funds(), dec(6_644));
    assert_eq!(w.engine.account(ASSET, w.operator).funds, dec(349));
    assert_eq!(w.engine.accrued_fees(ASSET), dec(7));
    w.engine.verify_supply(ASSET).unwrap();

    assert!(w.engine.withdraw_fees(w.payer, ASSET, dec(7)).is_err());
    w.engine.withdraw_fees(fee_owner, ASSET, dec(7)).unwrap();
    assert_eq!(w.engine.accrued_fees(ASSET), Decimal::ZERO);
    w.engine.verify_supply(ASSET).unwrap();
}

#[test]
fn locked_funds_cannot_be_withdrawn() {
    let mut w = World::fee_free(100);
    w.open_rail(None, 10, 5, 0, 0);
    let err = w.engine.withdraw(ASSET, w.payer, dec(51), 0).unwrap_err();
    assert!(matches!(err, PayrailError::InsufficientFunds { .. }));
    w.engine.withdraw(ASSET, w.payer, dec(50), 0).unwrap();
    assert_eq!(w.payer_account().funds, dec(50));
    w.engine.verify_supply(ASSET).unwrap();
}

#[test]
fn projection_reports_funded_horizon() {
    let mut w = World::fee_free(100);
    w.open_rail(None, 10, 5, 0, 0);
    let p = w.engine.account_info_if_settled(ASSET, w.payer, 0).unwrap();
    assert_eq!(p.funded_until_epoch, 5);
    assert_eq!(p.available_funds, dec(50));
    assert_eq!(p.lockup_rate, dec(10));
}
