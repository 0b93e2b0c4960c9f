//! Traits for the ledger service boundary and create-panel validation

use async_trait::async_trait;

use crate::reconciliation::ProposedLine;
use crate::tax::Tax;
use crate::types::*;

/// Remote ledger service the engine reads from and persists to
///
/// The engine owns no ledger data: entries, partners, accounts, taxes and
/// journals all live behind this trait, so any transport (RPC, HTTP,
/// in-process) can back a session.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Reconciliation models offered as "quick add" templates
    async fn reconciliation_models(&self) -> ReconciliationResult<Vec<ReconciliationModel>>;

    /// Taxes that may be set on created lines
    async fn taxes(&self) -> ReconciliationResult<Vec<Tax>>;

    /// Keys of everything still to reconcile in the scope, in display order
    async fn unreconciled_lines(&self, scope: &SessionScope) -> ReconciliationResult<Vec<LineKey>>;

    /// Preview data for a set of lines, in the order of `keys`
    async fn preview_lines(&self, keys: &[LineKey]) -> ReconciliationResult<Vec<LineData>>;

    /// Candidate counterparts for a line
    async fn match_candidates(
        &self,
        query: &CandidateQuery,
    ) -> ReconciliationResult<Vec<MatchCandidate>>;

    /// Persist statement line reconciliations; `payloads[i]` belongs to `line_ids[i]`
    async fn process_reconciliations(
        &self,
        line_ids: &[RecordId],
        payloads: &[ReconciliationPayload],
    ) -> ReconciliationResult<()>;

    /// Persist manual reconciliations of (account, partner) buckets
    async fn process_move_lines(
        &self,
        payloads: &[ManualReconciliationPayload],
    ) -> ReconciliationResult<()>;

    /// Let the server reconcile whatever it can match on its own
    async fn auto_reconcile(
        &self,
        statement_ids: &[RecordId],
        line_ids: &[RecordId],
    ) -> ReconciliationResult<AutoReconcileOutcome>;
}

/// Trait for implementing custom rules on lines created by hand or from a model
pub trait CreateLineValidator: Send + Sync {
    /// Validate a created line before it is sent for persistence
    fn validate_created(&self, proposition: &ProposedLine) -> ReconciliationResult<()>;
}

/// Default validator: account, label and amount are required
pub struct DefaultCreateLineValidator;

impl CreateLineValidator for DefaultCreateLineValidator {
    fn validate_created(&self, proposition: &ProposedLine) -> ReconciliationResult<()> {
        if proposition.account_id.is_none() {
            return Err(ReconciliationError::validation(
                Some(proposition.id),
                CreateField::Account,
                "Account is required",
            ));
        }

        if proposition.label.trim().is_empty() {
            return Err(ReconciliationError::validation(
                Some(proposition.id),
                CreateField::Label,
                "Label is required",
            ));
        }

        if proposition.is_placeholder() {
            return Err(ReconciliationError::validation(
                Some(proposition.id),
                CreateField::Amount,
                "Amount is required",
            ));
        }

        Ok(())
    }
}
