//! Money arithmetic used to decide when a reconciliation line is balanced

use bigdecimal::{BigDecimal, RoundingMode};

use crate::types::{AmountType, ModelLine};

/// Zero, at scale 0
pub fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Signed amount of a debit/credit pair (`debit - credit`)
pub fn signed_amount(debit: &BigDecimal, credit: &BigDecimal) -> BigDecimal {
    debit - credit
}

/// Round half away from zero to `digits` decimal places
pub fn round(value: &BigDecimal, digits: u32) -> BigDecimal {
    value.with_scale_round(i64::from(digits), RoundingMode::HalfUp)
}

/// Split a signed amount into a `(debit, credit)` pair of non-negative amounts
pub fn to_debit_credit(value: &BigDecimal) -> (BigDecimal, BigDecimal) {
    if *value < zero() {
        (zero(), value.abs())
    } else {
        (value.clone(), zero())
    }
}

/// Give `value` the sign of `reference`; a zero reference keeps `value` positive
pub fn with_sign_of(value: &BigDecimal, reference: &BigDecimal) -> BigDecimal {
    let magnitude = value.abs();
    if *reference < zero() {
        zero() - magnitude
    } else {
        magnitude
    }
}

/// Amount a model line contributes against the remaining balance
///
/// Fixed amounts take the sign of the balance; percentages apply to the
/// balance itself, which keeps its sign.
pub fn proportion(remaining_balance: &BigDecimal, line: &ModelLine) -> BigDecimal {
    match line.amount_type {
        AmountType::Fixed => with_sign_of(&line.amount, remaining_balance),
        AmountType::Percentage => (remaining_balance * &line.amount) / BigDecimal::from(100),
    }
}
