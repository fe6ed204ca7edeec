//! Validation adapter.
//!
//! A rail may name a validator (arbiter) that is consulted once per
//! settlement segment. It may shrink the amount and/or stop the segment
//! early, never the reverse. Responses are bounds-checked by
//! [`checked_validate`]; a violation aborts the whole settlement call.
//!
//! Validators receive a plain request value and no handle to the engine, so
//! they cannot re-enter it while a settlement is in progress.

use std::collections::HashMap;
use std::sync::Arc;

use payrail_types::{AccountId, Epoch, PayrailError, RailId, Result, TokenAmount};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One segment proposed for settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub rail_id: RailId,
    /// `rate * (to_epoch - from_epoch)`.
    pub proposed_amount: TokenAmount,
    pub from_epoch: Epoch,
    pub to_epoch: Epoch,
    pub rate: TokenAmount,
}

/// A validator's verdict on a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Amount to actually transfer.
    pub modified_amount: TokenAmount,
    /// Epoch the segment settles to; `from_epoch` means no progress.
    pub settle_up_to: Epoch,
    pub note: String,
}

impl ValidationResponse {
    /// Approve the segment exactly as proposed.
    #[must_use]
    pub fn approve(request: &ValidationRequest) -> Self {
        Self {
            modified_amount: request.proposed_amount,
            settle_up_to: request.to_epoch,
            note: String::new(),
        }
    }
}

/// External arbiter over settlement segments.
pub trait Validator: Send + Sync {
    /// Judge one segment.
    fn validate(&self, request: &ValidationRequest) -> ValidationResponse;

    /// Called after a rail naming this validator is terminated.
    fn rail_terminated(&self, _rail_id: RailId, _terminator: AccountId, _end_epoch: Epoch) {}
}

/// Call `validator` and enforce
/// `from <= settle_up_to <= to` and
/// `0 <= modified_amount <= rate * (settle_up_to - from)`.
///
/// # Errors
/// `InvalidValidatorResponse` on any bound violation.
pub fn checked_validate(
    validator: &dyn Validator,
    request: &ValidationRequest,
) -> Result<ValidationResponse> {
    let response = validator.validate(request);
    let invalid = |reason: String| PayrailError::InvalidValidatorResponse {
        rail_id: request.rail_id,
        reason,
    };

    if response.settle_up_to < request.from_epoch || response.settle_up_to > request.to_epoch {
        return Err(invalid(format!(
            "settle_up_to {} outside [{}, {}]",
            response.settle_up_to, request.from_epoch, request.to_epoch
        )));
    }
    if response.modified_amount.is_sign_negative() {
        return Err(invalid(format!(
            "negative amount {}",
            response.modified_amount
        )));
    }
    let confirmed = response.settle_up_to - request.from_epoch;
    let max_allowed = request
        .rate
        .checked_mul(Decimal::from(confirmed))
        .ok_or(PayrailError::ArithmeticOverflow {
            context: "validator bound",
        })?;
    if response.modified_amount > max_allowed {
        return Err(invalid(format!(
            "amount {} exceeds rate {} x {confirmed} epochs = {max_allowed}",
            response.modified_amount, request.rate
        )));
    }
    Ok(response)
}

/// Validators known to the engine, by account.
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: HashMap<AccountId, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the validator for `id`.
    pub fn register(&mut self, id: AccountId, validator: Arc<dyn Validator>) {
        tracing::info!(validator = %id, "Validator registered");
        self.validators.insert(id, validator);
    }

    /// Look up a validator.
    ///
    /// # Errors
    /// `ValidatorNotRegistered` if `id` is unknown.
    pub fn get(&self, id: AccountId) -> Result<Arc<dyn Validator>> {
        self.validators
            .get(&id)
            .cloned()
            .ok_or(PayrailError::ValidatorNotRegistered(id))
    }

    #[must_use]
    pub fn contains(&self, id: AccountId) -> bool {
        self.validators.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}
