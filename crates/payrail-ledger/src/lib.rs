//! # payrail-ledger
//!
//! **Ledger plane**: per-(asset, owner) balances with lockup accrual, the
//! operator allowance tracker, and the supply-conservation checker.
//!
//! ## Architecture
//!
//! 1. **AccountLedger**: funds and lockup per (asset, owner); owns the
//!    lockup-accrual primitive [`settle_account_lockup`] that every rail
//!    mutation calls before touching lockup
//! 2. **AllowanceTracker**: per (asset, client, operator) rate and lockup
//!    allowances with running usage
//! 3. **SupplyConservation**: deposits minus account and fee withdrawals
//!    must equal what the ledger and fee ledger hold
//!
//! ```text
//! rail mutation → settle_account_lockup(payer) → AllowanceTracker.update_*()
//!     → lockup change → solvency check (funds >= lockup_current)
//! ```

pub mod account_ledger;
pub mod allowance;
pub mod supply_conservation;

pub use account_ledger::{settle_account_lockup, AccountLedger};
pub use allowance::AllowanceTracker;
pub use supply_conservation::{AssetFlows, SupplyConservation};
