//! Error types for the Payrail ledger and settlement engine.
//!
//! All errors use the `PR_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Account / funds errors
//! - 2xx: Operator approval errors
//! - 3xx: Rail lifecycle errors
//! - 4xx: Epoch errors
//! - 5xx: Validator errors
//! - 6xx: Settlement errors
//! - 8xx: Security / invariant errors
//! - 9xx: General / internal errors
//!
//! Settlement that stalls (validator refused, payer out of funds) is not an
//! error: it is reported through [`crate::SettlementProgress`].

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountId, Epoch, RailId, RailState};

/// Which operator allowance an update touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceKind {
    Rate,
    Lockup,
}

impl std::fmt::Display for AllowanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rate => write!(f, "rate"),
            Self::Lockup => write!(f, "lockup"),
        }
    }
}

/// Central error enum for all Payrail operations.
#[derive(Debug, Error)]
pub enum PayrailError {
    // =================================================================
    // Account Errors (1xx)
    // =================================================================
    /// Not enough unlocked funds to perform the operation.
    #[error("PR_ERR_100: Insufficient unlocked funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    /// Amounts must be strictly positive.
    #[error("PR_ERR_101: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The payer's lockup has not been settled to the current epoch.
    #[error("PR_ERR_102: Account lockup not fully settled: settled to {settled_at}, current epoch {current}")]
    LockupNotSettled { settled_at: Epoch, current: Epoch },

    // =================================================================
    // Operator Errors (2xx)
    // =================================================================
    /// No approval, or the approval was revoked.
    #[error("PR_ERR_200: Operator {operator} not approved by client {client}")]
    OperatorNotApproved { client: AccountId, operator: AccountId },

    /// An increase would push usage above the allowance.
    #[error("PR_ERR_201: Operator {kind} allowance exceeded: usage {usage} + {increase} > allowance {allowance}")]
    AllowanceExceeded {
        kind: AllowanceKind,
        usage: Decimal,
        increase: Decimal,
        allowance: Decimal,
    },

    /// Requested lockup period exceeds the operator's hard cap.
    #[error("PR_ERR_202: Lockup period {requested} exceeds operator maximum {max}")]
    LockupPeriodExceeded { requested: Epoch, max: Epoch },

    // =================================================================
    // Rail Errors (3xx)
    // =================================================================
    /// No rail with this ID was ever created.
    #[error("PR_ERR_300: Rail not found: {0}")]
    RailNotFound(RailId),

    /// The rail has been finalized and can no longer be modified.
    #[error("PR_ERR_301: Rail already finalized: {0}")]
    RailFinalized(RailId),

    /// The requested change is not allowed in the rail's current state.
    #[error("PR_ERR_302: Invalid change to {rail_id} in state {state}: {reason}")]
    InvalidRailChange {
        rail_id: RailId,
        state: RailState,
        reason: String,
    },

    /// Commission above the configured maximum.
    #[error("PR_ERR_303: Commission {requested_bps} bps exceeds maximum {max_bps} bps")]
    InvalidCommission { requested_bps: u32, max_bps: u32 },

    // =================================================================
    // Epoch Errors (4xx)
    // =================================================================
    /// The supplied epoch is out of range for the operation.
    #[error("PR_ERR_400: Invalid epoch: {reason}")]
    InvalidEpoch { reason: String },

    // =================================================================
    // Validator Errors (5xx)
    // =================================================================
    /// A rail names a validator that is not registered with the engine.
    #[error("PR_ERR_500: Validator not registered: {0}")]
    ValidatorNotRegistered(AccountId),

    /// The validator's response violated its bounds. Aborts the settlement.
    #[error("PR_ERR_501: Invalid validator response for {rail_id}: {reason}")]
    InvalidValidatorResponse { rail_id: RailId, reason: String },

    // =================================================================
    // Settlement Errors (6xx)
    // =================================================================
    /// The escape hatch was used on a rail that does not qualify.
    #[error("PR_ERR_600: Settlement refused: {reason}")]
    SettlementRefused { reason: String },

    // =================================================================
    // Security Errors (8xx)
    // =================================================================
    /// Caller is not allowed to perform this action.
    #[error("PR_ERR_800: Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Locked funds exceed funds at a checkpoint.
    #[error("PR_ERR_801: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Supply conservation broke for an asset: critical safety alert.
    #[error("PR_ERR_802: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("PR_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("PR_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values).
    #[error("PR_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// A checked amount computation overflowed.
    #[error("PR_ERR_903: Arithmetic overflow in {context}")]
    ArithmeticOverflow { context: &'static str },
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PayrailError>;

impl From<serde_json::Error> for PayrailError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl PayrailError {
    /// Shorthand for an `Unauthorized` error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Shorthand for an `InvalidRailChange` error.
    pub fn rail_change(rail_id: RailId, state: RailState, reason: impl Into<String>) -> Self {
        Self::InvalidRailChange {
            rail_id,
            state,
            reason: reason.into(),
        }
    }
}
