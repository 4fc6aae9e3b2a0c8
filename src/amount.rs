//! Thin helpers around [`bitcoin::Amount`] for the one property the core
//! cares about beyond what the type already gives us: that summing a list of
//! amounts never silently wraps past the chain's maximum supply.

use bitcoin::Amount;

/// 21,000,000 BTC expressed in satoshi, the hard supply cap of the chains
/// this protocol targets.
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("sum of amounts exceeds the chain's maximum supply")]
pub struct AmountOverflow;

/// Sum `amounts`, failing if the running total would exceed [`MAX_MONEY`].
pub fn checked_sum(amounts: impl IntoIterator<Item = Amount>) -> Result<Amount, AmountOverflow> {
    let mut total: u64 = 0;
    for amount in amounts {
        total = total.checked_add(amount.as_sat()).ok_or(AmountOverflow)?;
        if total > MAX_MONEY {
            return Err(AmountOverflow);
        }
    }

    Ok(Amount::from_sat(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_within_supply() {
        let total = checked_sum(vec![Amount::from_sat(1), Amount::from_sat(2)]).unwrap();
        assert_eq!(total, Amount::from_sat(3));
    }

    #[test]
    fn rejects_sum_above_max_money() {
        let result = checked_sum(vec![Amount::from_sat(MAX_MONEY), Amount::from_sat(1)]);
        assert_eq!(result, Err(AmountOverflow));
    }
}
