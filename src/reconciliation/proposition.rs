//! Proposed lines: existing counterparts or new entries contributing to a reconciliation

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::tax::Tax;
use crate::types::*;
use crate::utils::amount::{self, zero};

/// Where a proposed line comes from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Existing ledger entry picked from the match candidates
    Counterpart(MatchCandidate),
    /// Entered in the create panel
    Manual,
    /// Expanded from the reconciliation model with this id
    Model(RecordId),
    /// Tax computed on another proposed line
    Tax { base: PropositionId },
}

/// One line contributing to the balance of a reconciliation line
///
/// `debit` and `credit` are expressed on the statement side: a proposition
/// with a debit offsets a positive statement amount. Exactly one of them is
/// non-zero, except for placeholders where both are zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedLine {
    pub id: PropositionId,
    /// Referenced ledger entry; `None` for a new entry
    pub ref_id: Option<RecordId>,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub account_id: Option<RecordId>,
    /// Tax applied on a base line, or the tax a tax line was computed from
    pub tax_id: Option<RecordId>,
    pub analytic_account_id: Option<RecordId>,
    pub label: String,
    /// The referenced entry stays partially open after reconciliation
    pub is_partial: bool,
    pub origin: Origin,
    /// Signed amount as entered, before any tax split (new entries only)
    pub entered_amount: BigDecimal,
}

impl ProposedLine {
    /// Build a proposition from a match candidate against the current balance
    ///
    /// When the candidate's outstanding amount goes the same way as the
    /// balance and exceeds it, only the balance is taken and the candidate is
    /// flagged partial; the rest stays open on the original entry.
    pub fn from_candidate(
        id: PropositionId,
        candidate: &MatchCandidate,
        balance: &BigDecimal,
    ) -> Self {
        let outstanding = candidate.amount();
        let same_direction = (outstanding > zero()) == (*balance > zero());
        let is_partial =
            *balance != zero() && same_direction && outstanding.abs() > balance.abs();
        let contributed = if is_partial {
            balance.clone()
        } else {
            outstanding
        };
        let (debit, credit) = amount::to_debit_credit(&contributed);

        Self {
            id,
            ref_id: Some(candidate.id),
            debit,
            credit,
            account_id: Some(candidate.account_id),
            tax_id: None,
            analytic_account_id: None,
            label: candidate.name.clone(),
            is_partial,
            origin: Origin::Counterpart(candidate.clone()),
            entered_amount: zero(),
        }
    }

    /// Build a new entry from a signed amount
    pub fn created(
        id: PropositionId,
        account_id: Option<RecordId>,
        label: String,
        signed: BigDecimal,
        origin: Origin,
    ) -> Self {
        let (debit, credit) = amount::to_debit_credit(&signed);
        Self {
            id,
            ref_id: None,
            debit,
            credit,
            account_id,
            tax_id: None,
            analytic_account_id: None,
            label,
            is_partial: false,
            origin,
            entered_amount: signed,
        }
    }

    /// Build the tax line computed on `base`
    pub fn tax_line(id: PropositionId, base: &ProposedLine, tax: &Tax, signed: BigDecimal) -> Self {
        let mut line = Self::created(
            id,
            tax.account_id.or(base.account_id),
            tax.name.clone(),
            signed,
            Origin::Tax { base: base.id },
        );
        line.tax_id = Some(tax.id);
        line
    }

    /// `debit - credit`
    pub fn signed_amount(&self) -> BigDecimal {
        amount::signed_amount(&self.debit, &self.credit)
    }

    /// Replace the contributed amount, keeping the entered amount untouched
    pub fn set_signed_amount(&mut self, signed: &BigDecimal) {
        let (debit, credit) = amount::to_debit_credit(signed);
        self.debit = debit;
        self.credit = credit;
    }

    /// References an existing ledger entry
    pub fn is_counterpart(&self) -> bool {
        self.ref_id.is_some()
    }

    /// New entry (manual, model or tax line)
    pub fn is_new_entry(&self) -> bool {
        self.ref_id.is_none()
    }

    pub fn is_tax_line(&self) -> bool {
        matches!(self.origin, Origin::Tax { .. })
    }

    /// Base line a tax line was computed on
    pub fn tax_base(&self) -> Option<PropositionId> {
        match self.origin {
            Origin::Tax { base } => Some(base),
            _ => None,
        }
    }

    /// Model this line was expanded from
    pub fn model_id(&self) -> Option<RecordId> {
        match self.origin {
            Origin::Model(model_id) => Some(model_id),
            _ => None,
        }
    }

    /// Both debit and credit are zero
    pub fn is_placeholder(&self) -> bool {
        self.debit == zero() && self.credit == zero()
    }

    /// Counterpart that can be persisted as a bare payment id
    pub fn is_full_payment(&self) -> bool {
        match &self.origin {
            Origin::Counterpart(candidate) => candidate.already_paid && !self.is_partial,
            _ => false,
        }
    }

    /// Match candidate this proposition was built from
    pub fn candidate(&self) -> Option<&MatchCandidate> {
        match &self.origin {
            Origin::Counterpart(candidate) => Some(candidate),
            _ => None,
        }
    }
}
