//! Expansion of reconciliation models ("quick add" templates) into proposed lines

use bigdecimal::BigDecimal;

use crate::reconciliation::line::ReconciliationLine;
use crate::reconciliation::proposition::{Origin, ProposedLine};
use crate::tax::{split_tax_rounded, TaxTable};
use crate::types::*;
use crate::utils::amount::{self, zero};

/// Turns a reconciliation model into proposed lines for a given line
pub struct ReconciliationModelExpander;

impl ReconciliationModelExpander {
    /// Expand `model` against the current balance of `line`
    ///
    /// Percentages apply to the balance at expansion time. The second line
    /// is clamped to what the first line left of that balance, so the
    /// pre-tax amounts of both lines never exceed it. Each line with a tax
    /// is followed by its tax line. Ids start at `line.next_proposition_id()`.
    pub fn expand(
        model: &ReconciliationModel,
        line: &ReconciliationLine,
        taxes: &TaxTable,
    ) -> ReconciliationResult<Vec<ProposedLine>> {
        let digits = line.currency().digits;
        let balance = line.balance().clone();
        let mut next_id = line.next_proposition_id().0;
        let mut expanded = Vec::new();

        let first = amount::round(&amount::proportion(&balance, &model.primary), digits);
        push_model_line(
            &mut expanded,
            &mut next_id,
            model,
            &model.primary,
            first.clone(),
            line,
            taxes,
        )?;

        if let Some(second_line) = &model.second_line {
            let remaining = &balance - &first;
            let mut second = amount::round(&amount::proportion(&balance, second_line), digits);
            let same_direction = (remaining > zero()) == (second > zero());
            if remaining != zero() && same_direction && second.abs() > remaining.abs() {
                second = remaining;
            }
            push_model_line(
                &mut expanded,
                &mut next_id,
                model,
                second_line,
                second,
                line,
                taxes,
            )?;
        }

        Ok(expanded)
    }
}

fn push_model_line(
    expanded: &mut Vec<ProposedLine>,
    next_id: &mut u64,
    model: &ReconciliationModel,
    model_line: &ModelLine,
    signed: BigDecimal,
    line: &ReconciliationLine,
    taxes: &TaxTable,
) -> ReconciliationResult<()> {
    let label = if model_line.label.trim().is_empty() {
        line.name().to_string()
    } else {
        model_line.label.clone()
    };
    let mut base = ProposedLine::created(
        PropositionId(*next_id),
        Some(model_line.account_id),
        label,
        signed.clone(),
        Origin::Model(model.id),
    );
    *next_id += 1;
    base.analytic_account_id = model_line.analytic_account_id;

    let tax = match model_line.tax_id {
        Some(tax_id) => taxes.get(tax_id)?,
        None => {
            expanded.push(base);
            return Ok(());
        }
    };

    base.tax_id = Some(tax.id);
    let split = split_tax_rounded(&signed, tax, line.currency().digits);
    base.set_signed_amount(&split.base_excl);
    let tax_line = if split.tax_amount != zero() {
        let tax_line =
            ProposedLine::tax_line(PropositionId(*next_id), &base, tax, split.tax_amount);
        *next_id += 1;
        Some(tax_line)
    } else {
        None
    };

    expanded.push(base);
    expanded.extend(tax_line);
    Ok(())
}
