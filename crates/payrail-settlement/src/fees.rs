//! Fee and commission splitting, and the per-asset protocol fee ledger.
//!
//! ```text
//! protocol_fee = floor(total * protocol_fee_bps / 10_000)
//! commission   = floor((total - protocol_fee) * commission_bps / 10_000)
//! net_payee    = total - protocol_fee - commission
//! ```
//!
//! Both cuts round down, so the payee absorbs sub-unit remainders and the
//! three parts always add back up to `total`.

use std::collections::BTreeMap;

use payrail_types::constants::BPS_DENOMINATOR;
use payrail_types::{Asset, FeeBreakdown, PayrailError, Result, TokenAmount, add_amount};
use rust_decimal::Decimal;

/// Deterministic splitter configured with the protocol fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplitter {
    protocol_fee_bps: u32,
}

impl FeeSplitter {
    #[must_use]
    pub fn new(protocol_fee_bps: u32) -> Self {
        Self { protocol_fee_bps }
    }

    /// Split `total` for a rail with `commission_bps`.
    ///
    /// # Errors
    /// `InvalidAmount` for a negative total, `ArithmeticOverflow` if the
    /// basis-point product does not fit.
    pub fn split(&self, total: TokenAmount, commission_bps: u32) -> Result<FeeBreakdown> {
        if total.is_sign_negative() {
            return Err(PayrailError::InvalidAmount {
                reason: format!("cannot split negative amount {total}"),
            });
        }
        let protocol_fee = bps_of(total, self.protocol_fee_bps)?;
        let operator_commission = bps_of(total - protocol_fee, commission_bps)?;
        Ok(FeeBreakdown {
            total,
            protocol_fee,
            operator_commission,
            net_payee: total - protocol_fee - operator_commission,
        })
    }
}

fn bps_of(amount: TokenAmount, bps: u32) -> Result<TokenAmount> {
    let scaled = amount
        .checked_mul(Decimal::from(bps))
        .ok_or(PayrailError::ArithmeticOverflow {
            context: "fee split",
        })?;
    Ok((scaled / Decimal::from(BPS_DENOMINATOR)).floor())
}

/// Protocol fees accrued per asset, withdrawable by the fee owner.
#[derive(Debug, Clone, Default)]
pub struct FeeLedger {
    accrued: BTreeMap<Asset, TokenAmount>,
}

impl FeeLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the asset's accrued fees. Unchanged on overflow.
    pub fn accrue(&mut self, asset: &str, amount: TokenAmount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let total = add_amount(self.accrued(asset), amount, "protocol fees")?;
        self.accrued.insert(asset.to_string(), total);
        Ok(())
    }

    #[must_use]
    pub fn accrued(&self, asset: &str) -> TokenAmount {
        self.accrued.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Remove `amount` of accrued fees.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive amounts, `InsufficientFunds` when
    /// more is requested than has accrued.
    pub fn withdraw(&mut self, asset: &str, amount: TokenAmount) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(PayrailError::InvalidAmount {
                reason: format!("fee withdrawal must be positive, got {amount}"),
            });
        }
        let available = self.accrued(asset);
        if amount > available {
            return Err(PayrailError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        self.accrued.insert(asset.to_string(), available - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    #[test]
    fn split_rounds_down_and_balances() {
        let splitter = FeeSplitter::new(10);
        let out = splitter.split(dec(1_234), 500).unwrap();
        assert_eq!(out.protocol_fee, dec(1));
        assert_eq!(out.operator_commission, dec(61));
        assert_eq!(out.net_payee, dec(1_172));
        assert!(out.is_balanced());
    }

    #[test]
    fn small_amounts_pay_no_fee() {
        let splitter = FeeSplitter::new(10);
        let out = splitter.split(dec(999), 0).unwrap();
        assert_eq!(out.protocol_fee, Decimal::ZERO);
        assert_eq!(out.net_payee, dec(999));
    }

    #[test]
    fn full_commission_leaves_payee_nothing() {
        let splitter = FeeSplitter::new(0);
        let out = splitter.split(dec(50), 10_000).unwrap();
        assert_eq!(out.operator_commission, dec(50));
        assert_eq!(out.net_payee, Decimal::ZERO);
    }

    #[test]
    fn negative_total_rejected() {
        let splitter = FeeSplitter::new(0);
        assert!(splitter.split(dec(-1), 0).is_err());
    }

    #[test]
    fn fee_ledger_accrue_and_withdraw() {
        let mut fees = FeeLedger::new();
        fees.accrue("USDFC", dec(7)).unwrap();
        fees.accrue("USDFC", dec(3)).unwrap();
        fees.accrue("FIL", Decimal::ZERO).unwrap();
        assert_eq!(fees.accrued("USDFC"), dec(10));
        assert!(!fees.accrued.contains_key("FIL"));

        assert!(matches!(
            fees.withdraw("USDFC", dec(11)).unwrap_err(),
            PayrailError::InsufficientFunds { .. }
        ));
        fees.withdraw("USDFC", dec(4)).unwrap();
        assert_eq!(fees.accrued("USDFC"), dec(6));
    }

    #[test]
    fn fee_ledger_overflow_keeps_balance() {
        let mut fees = FeeLedger::new();
        fees.accrue("USDFC", Decimal::MAX).unwrap();
        let err = fees.accrue("USDFC", dec(1)).unwrap_err();
        assert!(matches!(err, PayrailError::ArithmeticOverflow { .. }));
        assert_eq!(fees.accrued("USDFC"), Decimal::MAX);
    }
}
