use rust_decimal::Decimal;

/// Risk fraction per unit of signal strength, capped at 5% of balance.
const MAX_STRENGTH_PCT: u32 = 5;

/// Sizes an order from the available quote balance and the signal strength
/// behind it. Weaker-than-actionable signals are filtered before this point.
///
/// Below the exchange minimum the rule is clamp-or-reject: an account that
/// can cover the minimum takes it (accepting the stronger-than-implied
/// risk), a smaller account stands aside entirely. The output is therefore
/// always zero or at least `min_notional`.
pub fn order_notional(balance: Decimal, strength: u32, min_notional: Decimal) -> Decimal {
    let percent = Decimal::new(i64::from(strength.min(MAX_STRENGTH_PCT)), 2);
    let raw = balance * percent;

    if raw >= min_notional {
        return raw;
    }
    if balance >= min_notional {
        min_notional
    } else {
        Decimal::ZERO
    }
}
