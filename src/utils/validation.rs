//! Validation utilities for created lines

use bigdecimal::BigDecimal;

use crate::reconciliation::ProposedLine;
use crate::traits::*;
use crate::types::*;
use crate::utils::amount::zero;

/// Validate that an entered amount is usable on a created line
pub fn validate_entered_amount(
    proposition: Option<PropositionId>,
    amount: &BigDecimal,
) -> ReconciliationResult<()> {
    if *amount == zero() {
        return Err(ReconciliationError::validation(
            proposition,
            CreateField::Amount,
            "Amount cannot be zero",
        ));
    }
    Ok(())
}

/// Validate a created line's label
pub fn validate_label(proposition: Option<PropositionId>, label: &str) -> ReconciliationResult<()> {
    if label.trim().is_empty() {
        return Err(ReconciliationError::validation(
            proposition,
            CreateField::Label,
            "Label cannot be empty",
        ));
    }

    if label.len() > 256 {
        return Err(ReconciliationError::validation(
            proposition,
            CreateField::Label,
            "Label cannot exceed 256 characters",
        ));
    }

    Ok(())
}

/// Validate that an amount carries no more digits than the currency allows
pub fn validate_precision(
    proposition: Option<PropositionId>,
    amount: &BigDecimal,
    currency: &Currency,
) -> ReconciliationResult<()> {
    if currency.round(amount) != *amount {
        return Err(ReconciliationError::validation(
            proposition,
            CreateField::Amount,
            format!(
                "Amount {} has more than {} decimal digits",
                amount, currency.digits
            ),
        ));
    }
    Ok(())
}

/// Stricter validator that also bounds labels and rejects analytic accounts
/// on tax lines
pub struct StrictCreateLineValidator;

impl CreateLineValidator for StrictCreateLineValidator {
    fn validate_created(&self, proposition: &ProposedLine) -> ReconciliationResult<()> {
        DefaultCreateLineValidator.validate_created(proposition)?;
        validate_label(Some(proposition.id), &proposition.label)?;
        validate_entered_amount(Some(proposition.id), &proposition.signed_amount())?;

        if proposition.is_tax_line() && proposition.analytic_account_id.is_some() {
            return Err(ReconciliationError::validation(
                Some(proposition.id),
                CreateField::Account,
                "Tax lines cannot carry an analytic account",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_validate_label() {
        assert!(validate_label(None, "Bank fees").is_ok());
        assert!(matches!(
            validate_label(None, "   "),
            Err(ReconciliationError::Validation {
                field: CreateField::Label,
                ..
            })
        ));
        assert!(validate_label(None, &"x".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_precision() {
        let euro = Currency::default();
        let ok = BigDecimal::from_str("12.34").unwrap();
        let too_precise = BigDecimal::from_str("12.345").unwrap();

        assert!(validate_precision(None, &ok, &euro).is_ok());
        assert!(validate_precision(None, &too_precise, &euro).is_err());
    }

    #[test]
    fn test_validate_entered_amount() {
        assert!(validate_entered_amount(None, &BigDecimal::from(5)).is_ok());
        assert!(validate_entered_amount(None, &zero()).is_err());
    }
}
