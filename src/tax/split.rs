//! Single-level tax computation for created reconciliation lines

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{RecordId, ReconciliationError, ReconciliationResult};
use crate::utils::amount::{self, zero};

/// Tax that can be set on a created line or a reconciliation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tax {
    pub id: RecordId,
    /// Label given to the generated tax line, e.g. "Tax 20.00%"
    pub name: String,
    /// Rate in percent; a missing rate counts as 0
    #[serde(default)]
    pub rate: Option<BigDecimal>,
    /// Whether amounts entered with this tax already include it
    #[serde(default)]
    pub price_include: bool,
    /// Account the tax line is booked on; falls back to the base line's account
    #[serde(default)]
    pub account_id: Option<RecordId>,
}

impl Tax {
    /// Create a tax excluded from the price
    pub fn excluded(
        id: RecordId,
        name: &str,
        rate: BigDecimal,
        account_id: Option<RecordId>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            rate: Some(rate),
            price_include: false,
            account_id,
        }
    }

    /// Create a tax included in the price
    pub fn included(
        id: RecordId,
        name: &str,
        rate: BigDecimal,
        account_id: Option<RecordId>,
    ) -> Self {
        Self {
            price_include: true,
            ..Self::excluded(id, name, rate, account_id)
        }
    }

    /// Effective rate in percent
    pub fn rate(&self) -> BigDecimal {
        self.rate.clone().unwrap_or_else(zero)
    }
}

/// Tax-exclusive base and tax amount of an entered amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxSplit {
    /// Amount before tax
    pub base_excl: BigDecimal,
    /// Tax computed on the base
    pub tax_amount: BigDecimal,
}

impl TaxSplit {
    /// Split when the entered amount is the tax-exclusive base
    pub fn calculate(base_amount: &BigDecimal, rate: &BigDecimal) -> Self {
        let tax_amount = (base_amount * rate) / BigDecimal::from(100);
        Self {
            base_excl: base_amount.clone(),
            tax_amount,
        }
    }

    /// Split when the entered amount already includes the tax
    pub fn reverse_calculate(total_amount: &BigDecimal, rate: &BigDecimal) -> Self {
        let divisor = BigDecimal::from(100) + rate;
        if divisor == zero() {
            return Self::calculate(total_amount, rate);
        }
        let base_amount = (total_amount * &BigDecimal::from(100)) / divisor;
        Self::calculate(&base_amount, rate)
    }

    /// Base plus tax
    pub fn total(&self) -> BigDecimal {
        &self.base_excl + &self.tax_amount
    }
}

/// Decompose `base_amount` according to the tax's price-included flag
pub fn split_tax(base_amount: &BigDecimal, tax: &Tax) -> TaxSplit {
    let rate = tax.rate();
    if tax.price_include {
        TaxSplit::reverse_calculate(base_amount, &rate)
    } else {
        TaxSplit::calculate(base_amount, &rate)
    }
}

/// Split rounded to `digits`
///
/// For taxes included in the price the tax amount absorbs the rounding
/// residue, so base and tax always add back up to the rounded amount.
pub fn split_tax_rounded(base_amount: &BigDecimal, tax: &Tax, digits: u32) -> TaxSplit {
    let split = split_tax(base_amount, tax);
    let base_excl = amount::round(&split.base_excl, digits);
    let tax_amount = if tax.price_include {
        &amount::round(base_amount, digits) - &base_excl
    } else {
        amount::round(&split.tax_amount, digits)
    };
    TaxSplit {
        base_excl,
        tax_amount,
    }
}

/// Taxes known to a reconciliation session, by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxTable {
    taxes: HashMap<RecordId, Tax>,
}

impl TaxTable {
    pub fn new(taxes: Vec<Tax>) -> Self {
        Self {
            taxes: taxes.into_iter().map(|tax| (tax.id, tax)).collect(),
        }
    }

    /// Look up a tax, failing on unknown ids
    pub fn get(&self, tax_id: RecordId) -> ReconciliationResult<&Tax> {
        self.taxes
            .get(&tax_id)
            .ok_or(ReconciliationError::TaxNotFound(tax_id))
    }

    pub fn len(&self) -> usize {
        self.taxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxes.is_empty()
    }
}
