//! Persistence payloads built from a reconciliation line
//!
//! Propositions are kept on the statement side; the persisted entries are
//! their mirror, so a proposition debit becomes a credit on the wire.

use serde::Serialize;

use crate::reconciliation::line::{ReconciliationLine, SubmissionKind};
use crate::reconciliation::proposition::ProposedLine;
use crate::traits::CreateLineValidator;
use crate::types::*;
use crate::utils::amount::{self, zero};

/// Payload of one line, routed to the matching service call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LinePayload {
    /// Sent through `process_reconciliations`
    Statement {
        line_id: RecordId,
        payload: ReconciliationPayload,
    },
    /// Sent through `process_move_lines`
    Manual(ManualReconciliationPayload),
}

/// Build the payload for `line`
pub fn build(
    line: &ReconciliationLine,
    kind: SubmissionKind,
    validator: &dyn CreateLineValidator,
) -> ReconciliationResult<LinePayload> {
    match line.key() {
        LineKey::Statement(line_id) => Ok(LinePayload::Statement {
            line_id,
            payload: statement_payload(line, kind, validator)?,
        }),
        LineKey::Bucket {
            account_id,
            partner_id,
        } => Ok(LinePayload::Manual(manual_payload(
            line, account_id, partner_id, validator,
        )?)),
    }
}

/// Payload of a statement line
///
/// Counterparts of fully matched payments go to `payment_aml_ids`, other
/// counterparts to `counterpart_aml_dicts` and new entries to
/// `new_aml_dicts`. Validating an unbalanced line closes it with an
/// open-balance entry.
pub fn statement_payload(
    line: &ReconciliationLine,
    kind: SubmissionKind,
    validator: &dyn CreateLineValidator,
) -> ReconciliationResult<ReconciliationPayload> {
    let mut payload = ReconciliationPayload {
        partner_id: line.partner_id(),
        ..Default::default()
    };

    for proposition in line.propositions() {
        match proposition.ref_id {
            Some(ref_id) if proposition.is_full_payment() => payload.payment_aml_ids.push(ref_id),
            Some(ref_id) => payload.counterpart_aml_dicts.push(CounterpartDict {
                counterpart_aml_id: ref_id,
                debit: proposition.credit.clone(),
                credit: proposition.debit.clone(),
                name: proposition.label.clone(),
            }),
            None => {
                validator.validate_created(proposition)?;
                payload.new_aml_dicts.push(new_line_dict(proposition)?);
            }
        }
    }

    let balance = line.balance();
    if kind == SubmissionKind::Validate && *balance != zero() {
        payload.new_aml_dicts.push(open_balance_dict(line)?);
    }

    Ok(payload)
}

/// Entry closing the remaining balance of a validated line
fn open_balance_dict(line: &ReconciliationLine) -> ReconciliationResult<NewLineDict> {
    let account_id = line.data().open_balance_account_id.ok_or_else(|| {
        ReconciliationError::validation(
            None,
            CreateField::Account,
            "No open balance account for this line; set a partner first",
        )
    })?;
    let name = if line.propositions().is_empty() {
        line.name().to_string()
    } else {
        format!("{} : {}", line.name(), line.labels().open_balance)
    };
    let (debit, credit) = amount::to_debit_credit(line.balance());

    Ok(NewLineDict {
        account_id,
        debit: credit,
        credit: debit,
        name,
        analytic_account_id: None,
        tax_ids: None,
        tax_line_id: None,
    })
}

/// Payload of a manual reconciliation bucket
///
/// An unbalanced bucket is reconciled partially: the residual stays open
/// on the selected entries.
pub fn manual_payload(
    line: &ReconciliationLine,
    account_id: RecordId,
    partner_id: Option<RecordId>,
    validator: &dyn CreateLineValidator,
) -> ReconciliationResult<ManualReconciliationPayload> {
    if line.propositions().is_empty() {
        return Err(ReconciliationError::InvalidOperation(format!(
            "nothing selected to reconcile on {}",
            line.key()
        )));
    }

    let (kind, id) = match partner_id {
        Some(partner_id) => (BucketKind::Partner, partner_id),
        None => (BucketKind::Account, account_id),
    };
    let mut payload = ManualReconciliationPayload {
        kind,
        id,
        mv_line_ids: Vec::new(),
        new_mv_line_dicts: Vec::new(),
    };

    for proposition in line.propositions() {
        match proposition.ref_id {
            Some(ref_id) => payload.mv_line_ids.push(ref_id),
            None => {
                validator.validate_created(proposition)?;
                payload.new_mv_line_dicts.push(new_line_dict(proposition)?);
            }
        }
    }

    Ok(payload)
}

fn new_line_dict(proposition: &ProposedLine) -> ReconciliationResult<NewLineDict> {
    let account_id = proposition.account_id.ok_or_else(|| {
        ReconciliationError::validation(
            Some(proposition.id),
            CreateField::Account,
            "Account is required",
        )
    })?;
    let (tax_ids, tax_line_id) = if proposition.is_tax_line() {
        (None, proposition.tax_id)
    } else {
        (proposition.tax_id.map(|tax_id| vec![tax_id]), None)
    };

    Ok(NewLineDict {
        account_id,
        debit: proposition.credit.clone(),
        credit: proposition.debit.clone(),
        name: proposition.label.clone(),
        analytic_account_id: proposition.analytic_account_id,
        tax_ids,
        tax_line_id,
    })
}
