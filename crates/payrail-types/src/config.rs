//! Configuration for a Payrail engine instance.

use serde::{Deserialize, Serialize};

use crate::{constants, AccountId, PayrailError, Result};

/// How `create_rail` treats an operator the payer never approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// The client must have approved the operator beforehand.
    #[default]
    Explicit,
    /// A missing approval is installed as approved with zero allowances.
    AutoApprove,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Protocol fee on every settled amount, in basis points.
    pub protocol_fee_bps: u32,
    /// Highest commission an operator may set on a rail, in basis points.
    pub max_commission_bps: u32,
    /// Treatment of missing operator approvals on rail creation.
    pub approval_policy: ApprovalPolicy,
    /// Account allowed to withdraw accrued protocol fees.
    pub fee_owner: Option<AccountId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol_fee_bps: constants::DEFAULT_PROTOCOL_FEE_BPS,
            max_commission_bps: constants::DEFAULT_MAX_COMMISSION_BPS,
            approval_policy: ApprovalPolicy::Explicit,
            fee_owner: None,
        }
    }
}

impl EngineConfig {
    /// A config that charges no protocol fee. Handy for arithmetic-exact tests.
    #[must_use]
    pub fn fee_free() -> Self {
        Self {
            protocol_fee_bps: 0,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject out-of-range basis points.
    pub fn validate(&self) -> Result<()> {
        if self.protocol_fee_bps > constants::BPS_DENOMINATOR {
            return Err(PayrailError::Configuration(format!(
                "protocol_fee_bps {} exceeds {}",
                self.protocol_fee_bps,
                constants::BPS_DENOMINATOR
            )));
        }
        if self.max_commission_bps > constants::BPS_DENOMINATOR {
            return Err(PayrailError::Configuration(format!(
                "max_commission_bps {} exceeds {}",
                self.max_commission_bps,
                constants::BPS_DENOMINATOR
            )));
        }
        Ok(())
    }
}
