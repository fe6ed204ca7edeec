//! # payrail-types
//!
//! Shared types, errors, and configuration for the **Payrail** payment rails
//! engine.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`RailId`], [`AccountKey`], [`ApprovalKey`], [`Epoch`], [`Asset`]
//! - **Account model**: [`Account`], [`LockupSettlement`], [`AccountProjection`]
//! - **Rail model**: [`Rail`], [`RailState`], [`RateChange`]
//! - **Operator model**: [`OperatorApproval`]
//! - **Settlement results**: [`SettlementOutcome`], [`SegmentSettlement`], [`FeeBreakdown`], [`SettlementProgress`]
//! - **Configuration**: [`EngineConfig`], [`ApprovalPolicy`]
//! - **Errors**: [`PayrailError`] with `PR_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod account;
pub mod approval;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod rail;
pub mod settlement;

// Re-export all primary types at crate root for ergonomic imports:
//   use payrail_types::{Account, Rail, RailId, ...};

pub use account::*;
pub use approval::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use rail::*;
pub use settlement::*;

// Constants are accessed via `payrail_types::constants::FOO`
// (not re-exported to avoid name collisions).
