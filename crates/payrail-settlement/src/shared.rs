//! Thread-safe handle over one [`PaymentsEngine`].
//!
//! Every call takes the engine lock for exactly one transaction, so no
//! caller ever observes a half-applied operation. Validators run while the
//! lock is held; one that calls back into the same handle deadlocks rather
//! than re-entering.

use std::sync::Arc;

use parking_lot::Mutex;
use payrail_types::{
    Account, AccountId, EngineConfig, Epoch, LockupSettlement, Rail, RailId, Result,
    SettlementOutcome, TokenAmount,
};

use crate::engine::PaymentsEngine;

/// Cloneable, `Send + Sync` engine handle.
#[derive(Clone)]
pub struct SharedPayments {
    inner: Arc<Mutex<PaymentsEngine>>,
}

impl SharedPayments {
    #[must_use]
    pub fn new(engine: PaymentsEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Build an engine from `config` and wrap it.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(PaymentsEngine::new(config)?))
    }

    /// Run `f` as one transaction.
    pub fn transact<R>(&self, f: impl FnOnce(&mut PaymentsEngine) -> R) -> R {
        let mut engine = self.inner.lock();
        f(&mut engine)
    }

    /// Run a read-only query.
    pub fn query<R>(&self, f: impl FnOnce(&PaymentsEngine) -> R) -> R {
        let engine = self.inner.lock();
        f(&engine)
    }

    pub fn deposit(
        &self,
        asset: &str,
        owner: AccountId,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<LockupSettlement> {
        self.transact(|engine| engine.deposit(asset, owner, amount, epoch))
    }

    pub fn withdraw(
        &self,
        asset: &str,
        owner: AccountId,
        amount: TokenAmount,
        epoch: Epoch,
    ) -> Result<()> {
        self.transact(|engine| engine.withdraw(asset, owner, amount, epoch))
    }

    pub fn settle_rail(
        &self,
        caller: AccountId,
        rail_id: RailId,
        until_epoch: Epoch,
        current_epoch: Epoch,
    ) -> Result<SettlementOutcome> {
        self.transact(|engine| engine.settle_rail(caller, rail_id, until_epoch, current_epoch))
    }

    #[must_use]
    pub fn account(&self, asset: &str, owner: AccountId) -> Account {
        self.query(|engine| engine.account(asset, owner))
    }

    pub fn rail(&self, rail_id: RailId) -> Result<Rail> {
        self.query(|engine| engine.rail(rail_id))
    }
}
