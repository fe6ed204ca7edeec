//! # payrail-settlement
//!
//! **Settlement plane**: the rail state machine, segment-based settlement,
//! validator adapter, and fee splitting.
//!
//! ## Architecture
//!
//! A rail mutation or settlement call:
//! 1. Settles the payer's account lockup to the current epoch
//! 2. Checks the operator's allowances (rail mutations)
//! 3. Settles the just-ended rate segment immediately (unvalidated rails) or
//!    queues it in the [`RateChangeQueue`] (validated rails)
//! 4. Walks the queue segment by segment, consulting the [`Validator`] and
//!    splitting each amount with the [`FeeSplitter`]
//! 5. Checks payer solvency, then commits
//!
//! ## Rail lifecycle
//!
//! - **Active**: streaming; lockup accrues on the payer
//! - **Terminated**: `end_epoch` fixed; settlement continues to it
//! - **Finalized**: fixed lockup refunded, record zeroed

pub mod engine;
pub mod fees;
pub mod rails;
pub mod rate_queue;
pub mod settle;
pub mod shared;
pub mod validator;

pub use engine::{PaymentsEngine, RailLockup};
pub use fees::{FeeLedger, FeeSplitter};
pub use rate_queue::RateChangeQueue;
pub use shared::SharedPayments;
pub use validator::{
    ValidationRequest, ValidationResponse, Validator, ValidatorRegistry, checked_validate,
};
