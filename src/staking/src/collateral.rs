//! Collateralization evaluation
//!
//! Required collateral is `active_minipools * minipool_launch_amount *
//! min_collateral_ratio / RATIO_SCALE`, computed in integer wei with a
//! single floor at the end. The per-minipool amount is kept as an exact
//! quotient and remainder of `RATIO_SCALE`, and the minipool count is
//! applied last, so only a result that does not fit overflows.

use nodestake_core::Amount;

use crate::error::{Result, StakingError};
use crate::settings::{ProtocolSettings, RATIO_SCALE};

/// Pure collateral math over one settings snapshot
#[derive(Debug, Clone, Copy)]
pub struct CollateralEvaluator {
    minipool_launch_amount: Amount,
    min_collateral_ratio: Amount,
}

impl CollateralEvaluator {
    pub fn new(settings: &ProtocolSettings) -> Self {
        Self {
            minipool_launch_amount: settings.minipool_launch_amount,
            min_collateral_ratio: settings.min_collateral_ratio,
        }
    }

    /// Minimum stake a node with `active_minipools` must keep
    pub fn required_collateral(&self, active_minipools: u64) -> Result<Amount> {
        let (whole, rem) = scaled_product(self.minipool_launch_amount, self.min_collateral_ratio)
            .ok_or_else(|| StakingError::overflow("required_collateral"))?;

        let count = active_minipools as Amount;
        // rem < RATIO_SCALE and count < 2^64, so the product stays below 2^124
        count
            .checked_mul(whole)
            .and_then(|floor| floor.checked_add(count * rem / RATIO_SCALE))
            .ok_or_else(|| StakingError::overflow("required_collateral"))
    }

    /// Whether withdrawing `amount` from `balance` keeps the node collateralized
    pub fn can_withdraw(&self, balance: Amount, amount: Amount, active_minipools: u64) -> Result<bool> {
        let remaining = match balance.checked_sub(amount) {
            Some(remaining) => remaining,
            None => return Ok(false),
        };
        Ok(remaining >= self.required_collateral(active_minipools)?)
    }

    /// Largest amount that can leave `balance` without breaching the floor
    pub fn withdrawable(&self, balance: Amount, active_minipools: u64) -> Result<Amount> {
        Ok(balance.saturating_sub(self.required_collateral(active_minipools)?))
    }

    /// Additional stake needed to support `active_minipools`
    pub fn shortfall(&self, balance: Amount, active_minipools: u64) -> Result<Amount> {
        Ok(self.required_collateral(active_minipools)?.saturating_sub(balance))
    }
}

/// `amount * ratio` as `(whole, rem)` with `amount * ratio == whole * RATIO_SCALE + rem`.
///
/// Splits `amount` into `q * RATIO_SCALE + r`, so no 256-bit intermediate
/// is needed.
fn scaled_product(amount: Amount, ratio: Amount) -> Option<(Amount, Amount)> {
    let q = amount / RATIO_SCALE;
    let r = amount % RATIO_SCALE;
    let low = r.checked_mul(ratio)?;
    let whole = q.checked_mul(ratio)?.checked_add(low / RATIO_SCALE)?;
    Some((whole, low % RATIO_SCALE))
}
