//! Candidate counterpart loading against the ledger service

use crate::reconciliation::line::{CandidateRequest, ReconciliationLine};
use crate::traits::LedgerService;
use crate::types::*;

/// Runs candidate requests issued by lines against a ledger service
pub struct MatchLoader<'a, S: LedgerService + ?Sized> {
    service: &'a S,
}

impl<'a, S: LedgerService + ?Sized> MatchLoader<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }

    /// Fetch the candidates of `request` and hand them to `line`
    ///
    /// Returns whether the response was applied; a response the line has
    /// moved past is dropped. A failed fetch is recorded on the line before
    /// the error is returned.
    pub async fn load(
        &self,
        line: &mut ReconciliationLine,
        request: CandidateRequest,
    ) -> ReconciliationResult<bool> {
        match self.service.match_candidates(&request.query).await {
            Ok(page) => {
                let fetched = page.len();
                let applied = line.apply_candidates(&request, page);
                tracing::debug!(
                    line = %request.query.line,
                    count = fetched,
                    applied,
                    mode = %line.mode(),
                    "match candidates loaded"
                );
                Ok(applied)
            }
            Err(error) => {
                tracing::warn!(line = %request.query.line, %error, "match candidates failed");
                line.fail_candidates(&request, &error);
                Err(error)
            }
        }
    }
}
