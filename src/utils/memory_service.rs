//! In-memory ledger service implementation for testing

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tax::Tax;
use crate::traits::*;
use crate::types::*;
use crate::utils::amount::{self, zero};

/// Service call a failure can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCall {
    MatchCandidates,
    ProcessReconciliations,
    ProcessMoveLines,
    AutoReconcile,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Statement rows with the statement they belong to, in display order
    statement_lines: Vec<(RecordId, LineData)>,
    buckets: Vec<LineData>,
    candidates: Vec<MatchCandidate>,
    models: Vec<ReconciliationModel>,
    taxes: Vec<Tax>,
    reconciled_lines: HashSet<RecordId>,
    reconciled_entries: HashSet<RecordId>,
    reconciled_buckets: HashSet<LineKey>,
    failures: HashMap<ServiceCall, ReconciliationError>,
    auto_outcome: Option<AutoReconcileOutcome>,
    candidate_queries: Vec<CandidateQuery>,
    reconciliation_calls: Vec<(Vec<RecordId>, Vec<ReconciliationPayload>)>,
    move_line_calls: Vec<Vec<ManualReconciliationPayload>>,
    auto_reconcile_calls: usize,
}

impl MemoryState {
    fn take_failure(&mut self, call: ServiceCall) -> ReconciliationResult<()> {
        match self.failures.remove(&call) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn stale_entries(&self, ids: &[RecordId]) -> ReconciliationResult<()> {
        let stale: Vec<RecordId> = ids
            .iter()
            .copied()
            .filter(|id| self.reconciled_entries.contains(id))
            .collect();
        if stale.is_empty() {
            Ok(())
        } else {
            Err(ReconciliationError::ConcurrentReconciliation { ids: stale })
        }
    }

    fn statement_line(&self, line_id: RecordId) -> Option<&LineData> {
        self.statement_lines
            .iter()
            .map(|(_, data)| data)
            .find(|data| data.key == LineKey::Statement(line_id))
    }

    /// Consume `signed` (statement side) from an open entry
    fn consume(&mut self, entry_id: RecordId, signed: &BigDecimal) {
        let Some(index) = self.candidates.iter().position(|c| c.id == entry_id) else {
            self.reconciled_entries.insert(entry_id);
            return;
        };
        let outstanding = self.candidates[index].amount();
        let left = &outstanding - signed;
        if left == zero() || (left > zero()) != (outstanding > zero()) {
            self.reconciled_entries.insert(entry_id);
        } else {
            let (debit, credit) = amount::to_debit_credit(&left);
            self.candidates[index].debit = debit;
            self.candidates[index].credit = credit;
        }
    }
}

/// In-memory ledger service for tests and demos
///
/// Counterparts referenced by a persisted payload are consumed; referencing
/// one again fails with a concurrent-reconciliation error, like a ledger
/// shared with another user would.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerService {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryLedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a statement line belonging to `statement_id`
    pub fn add_statement_line(&self, statement_id: RecordId, line: LineData) {
        self.write().statement_lines.push((statement_id, line));
    }

    /// Add an (account, partner) bucket for manual reconciliation
    pub fn add_bucket(&self, bucket: LineData) {
        self.write().buckets.push(bucket);
    }

    pub fn add_candidate(&self, candidate: MatchCandidate) {
        self.write().candidates.push(candidate);
    }

    pub fn add_model(&self, model: ReconciliationModel) {
        self.write().models.push(model);
    }

    pub fn add_tax(&self, tax: Tax) {
        self.write().taxes.push(tax);
    }

    /// Mark an entry as reconciled behind the session's back
    pub fn reconcile_elsewhere(&self, entry_id: RecordId) {
        self.write().reconciled_entries.insert(entry_id);
    }

    /// Make the next call of `call` fail with `error`
    pub fn fail_next(&self, call: ServiceCall, error: ReconciliationError) {
        self.write().failures.insert(call, error);
    }

    /// Answer the next auto-reconciliation with `outcome` instead of matching
    pub fn script_auto_reconcile(&self, outcome: AutoReconcileOutcome) {
        self.write().auto_outcome = Some(outcome);
    }

    pub fn is_line_reconciled(&self, line_id: RecordId) -> bool {
        self.read().reconciled_lines.contains(&line_id)
    }

    pub fn is_entry_reconciled(&self, entry_id: RecordId) -> bool {
        self.read().reconciled_entries.contains(&entry_id)
    }

    /// Arguments of every `process_reconciliations` call, in order
    pub fn reconciliation_calls(&self) -> Vec<(Vec<RecordId>, Vec<ReconciliationPayload>)> {
        self.read().reconciliation_calls.clone()
    }

    pub fn move_line_calls(&self) -> Vec<Vec<ManualReconciliationPayload>> {
        self.read().move_line_calls.clone()
    }

    pub fn candidate_queries(&self) -> Vec<CandidateQuery> {
        self.read().candidate_queries.clone()
    }

    pub fn auto_reconcile_calls(&self) -> usize {
        self.read().auto_reconcile_calls
    }
}

#[async_trait]
impl LedgerService for MemoryLedgerService {
    async fn reconciliation_models(&self) -> ReconciliationResult<Vec<ReconciliationModel>> {
        Ok(self.read().models.clone())
    }

    async fn taxes(&self) -> ReconciliationResult<Vec<Tax>> {
        Ok(self.read().taxes.clone())
    }

    async fn unreconciled_lines(&self, scope: &SessionScope) -> ReconciliationResult<Vec<LineKey>> {
        let state = self.read();
        let keys = match scope {
            SessionScope::Statements(statement_ids) => state
                .statement_lines
                .iter()
                .filter(|(statement_id, _)| statement_ids.contains(statement_id))
                .map(|(_, data)| data.key)
                .filter(|key| {
                    key.statement_line_id()
                        .is_some_and(|id| !state.reconciled_lines.contains(&id))
                })
                .collect(),
            SessionScope::Manual { account_ids } => state
                .buckets
                .iter()
                .map(|bucket| bucket.key)
                .filter(|key| match key {
                    LineKey::Bucket { account_id, .. } => {
                        account_ids.is_empty() || account_ids.contains(account_id)
                    }
                    LineKey::Statement(_) => false,
                })
                .filter(|key| !state.reconciled_buckets.contains(key))
                .collect(),
        };
        Ok(keys)
    }

    async fn preview_lines(&self, keys: &[LineKey]) -> ReconciliationResult<Vec<LineData>> {
        let state = self.read();
        keys.iter()
            .map(|key| {
                let found = match key {
                    LineKey::Statement(line_id) => state.statement_line(*line_id),
                    LineKey::Bucket { .. } => state.buckets.iter().find(|b| b.key == *key),
                };
                found.cloned().ok_or(ReconciliationError::LineNotFound(*key))
            })
            .collect()
    }

    async fn match_candidates(
        &self,
        query: &CandidateQuery,
    ) -> ReconciliationResult<Vec<MatchCandidate>> {
        let mut state = self.write();
        state.candidate_queries.push(query.clone());
        state.take_failure(ServiceCall::MatchCandidates)?;

        let search = query.search.as_ref().map(|s| s.to_lowercase());
        let page = state
            .candidates
            .iter()
            .filter(|c| !state.reconciled_entries.contains(&c.id))
            .filter(|c| !query.excluded_ids.contains(&c.id))
            .filter(|c| query.account_id.is_none_or(|account_id| c.account_id == account_id))
            .filter(|c| query.partner_id.is_none() || c.partner_id == query.partner_id)
            .filter(|c| {
                search.as_ref().is_none_or(|search| {
                    c.name.to_lowercase().contains(search)
                        || c.reference
                            .as_ref()
                            .is_some_and(|r| r.to_lowercase().contains(search))
                })
            })
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn process_reconciliations(
        &self,
        line_ids: &[RecordId],
        payloads: &[ReconciliationPayload],
    ) -> ReconciliationResult<()> {
        let mut state = self.write();
        state.take_failure(ServiceCall::ProcessReconciliations)?;
        if line_ids.len() != payloads.len() {
            return Err(ReconciliationError::Service(format!(
                "{} statement lines for {} payloads",
                line_ids.len(),
                payloads.len()
            )));
        }

        let referenced: Vec<RecordId> = payloads
            .iter()
            .flat_map(|payload| {
                payload
                    .counterpart_aml_dicts
                    .iter()
                    .map(|c| c.counterpart_aml_id)
                    .chain(payload.payment_aml_ids.iter().copied())
            })
            .collect();
        state.stale_entries(&referenced)?;
        if let Some(line_id) = line_ids.iter().find(|id| state.reconciled_lines.contains(*id)) {
            return Err(ReconciliationError::Service(format!(
                "statement line {line_id} is already reconciled"
            )));
        }

        for payload in payloads {
            for counterpart in &payload.counterpart_aml_dicts {
                // mirror of the proposition, back to the statement side
                let signed = &counterpart.credit - &counterpart.debit;
                state.consume(counterpart.counterpart_aml_id, &signed);
            }
            for payment_id in &payload.payment_aml_ids {
                state.reconciled_entries.insert(*payment_id);
            }
        }
        state.reconciled_lines.extend(line_ids.iter().copied());
        state
            .reconciliation_calls
            .push((line_ids.to_vec(), payloads.to_vec()));
        Ok(())
    }

    async fn process_move_lines(
        &self,
        payloads: &[ManualReconciliationPayload],
    ) -> ReconciliationResult<()> {
        let mut state = self.write();
        state.take_failure(ServiceCall::ProcessMoveLines)?;

        let referenced: Vec<RecordId> = payloads
            .iter()
            .flat_map(|payload| payload.mv_line_ids.iter().copied())
            .collect();
        state.stale_entries(&referenced)?;

        for payload in payloads {
            state
                .reconciled_entries
                .extend(payload.mv_line_ids.iter().copied());
            let bucket = state
                .buckets
                .iter()
                .map(|bucket| bucket.key)
                .find(|key| match (payload.kind, key) {
                    (BucketKind::Partner, LineKey::Bucket { partner_id, .. }) => {
                        *partner_id == Some(payload.id)
                    }
                    (
                        BucketKind::Account,
                        LineKey::Bucket {
                            account_id,
                            partner_id: None,
                        },
                    ) => *account_id == payload.id,
                    _ => false,
                });
            if let Some(bucket) = bucket {
                state.reconciled_buckets.insert(bucket);
            }
        }
        state.move_line_calls.push(payloads.to_vec());
        Ok(())
    }

    async fn auto_reconcile(
        &self,
        statement_ids: &[RecordId],
        line_ids: &[RecordId],
    ) -> ReconciliationResult<AutoReconcileOutcome> {
        let mut state = self.write();
        state.auto_reconcile_calls += 1;
        state.take_failure(ServiceCall::AutoReconcile)?;

        if let Some(outcome) = state.auto_outcome.take() {
            let reconciled: Vec<RecordId> = line_ids
                .iter()
                .copied()
                .filter(|id| !outcome.remaining_ids.contains(id))
                .collect();
            state.reconciled_lines.extend(reconciled);
            return Ok(outcome);
        }

        // exact amount and partner match against a single open entry
        let mut reconciled = Vec::new();
        let mut remaining = Vec::new();
        for line_id in line_ids {
            let Some(line) = state.statement_line(*line_id).cloned() else {
                continue;
            };
            let matched = state
                .candidates
                .iter()
                .find(|c| {
                    !state.reconciled_entries.contains(&c.id)
                        && line.partner_id.is_some()
                        && c.partner_id == line.partner_id
                        && c.amount() == line.amount
                })
                .map(|c| c.id);
            match matched {
                Some(entry_id) => {
                    state.reconciled_entries.insert(entry_id);
                    state.reconciled_lines.insert(*line_id);
                    reconciled.push(*line_id);
                }
                None => remaining.push(*line_id),
            }
        }

        let statement_name = state
            .statement_lines
            .iter()
            .find(|(statement_id, _)| statement_ids.contains(statement_id))
            .map(|(statement_id, _)| format!("Statement {statement_id}"));
        let notifications = if reconciled.is_empty() {
            Vec::new()
        } else {
            vec![ServerNotification {
                severity: Severity::Info,
                message: format!(
                    "{} transactions were automatically reconciled.",
                    reconciled.len()
                ),
                details: Some(RecordLink {
                    model: "account.bank.statement.line".to_string(),
                    ids: reconciled.clone(),
                    name: "Automatically reconciled items".to_string(),
                }),
            }]
        };

        Ok(AutoReconcileOutcome {
            reconciled_count: reconciled.len(),
            remaining_ids: remaining,
            notifications,
            statement_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn candidate(
        id: RecordId,
        partner_id: Option<RecordId>,
        name: &str,
        debit: &str,
    ) -> MatchCandidate {
        MatchCandidate {
            id,
            name: name.to_string(),
            reference: None,
            date: None,
            account_id: 287,
            partner_id,
            debit: dec(debit),
            credit: zero(),
            already_paid: false,
        }
    }

    fn query(partner_id: Option<RecordId>) -> CandidateQuery {
        CandidateQuery {
            line: LineKey::Statement(5),
            account_id: None,
            partner_id,
            excluded_ids: vec![],
            search: None,
            offset: 0,
            limit: 15,
        }
    }

    #[tokio::test]
    async fn test_candidate_filters() {
        let service = MemoryLedgerService::new();
        service.add_candidate(candidate(109, Some(8), "INV/2017/0002", "650"));
        service.add_candidate(candidate(112, Some(8), "INV/2017/0003", "525"));
        service.add_candidate(candidate(113, Some(9), "INV/2017/0004", "100"));

        let found = service.match_candidates(&query(Some(8))).await.unwrap();
        assert_eq!(found.len(), 2);

        let mut excluded = query(Some(8));
        excluded.excluded_ids = vec![109];
        let found = service.match_candidates(&excluded).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![112]);

        let mut searched = query(None);
        searched.search = Some("0004".to_string());
        let found = service.match_candidates(&searched).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![113]);

        let mut paged = query(None);
        paged.offset = 1;
        paged.limit = 1;
        let found = service.match_candidates(&paged).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![112]);
        assert_eq!(service.candidate_queries().len(), 4);
    }

    #[tokio::test]
    async fn test_partial_counterpart_stays_open() {
        let service = MemoryLedgerService::new();
        service.add_candidate(candidate(110, Some(8), "INV/2017/0001", "4610"));

        let payload = ReconciliationPayload {
            partner_id: Some(8),
            counterpart_aml_dicts: vec![CounterpartDict {
                counterpart_aml_id: 110,
                debit: zero(),
                credit: dec("525"),
                name: "INV/2017/0001".to_string(),
            }],
            ..Default::default()
        };
        service
            .process_reconciliations(&[5], &[payload.clone()])
            .await
            .unwrap();

        assert!(service.is_line_reconciled(5));
        assert!(!service.is_entry_reconciled(110));
        let left = service.match_candidates(&query(Some(8))).await.unwrap();
        assert_eq!(left[0].amount(), dec("4085"));
    }

    #[tokio::test]
    async fn test_consumed_entry_is_a_concurrent_error() {
        let service = MemoryLedgerService::new();
        service.reconcile_elsewhere(109);

        let payload = ReconciliationPayload {
            payment_aml_ids: vec![109],
            ..Default::default()
        };
        assert_eq!(
            service.process_reconciliations(&[5], &[payload]).await,
            Err(ReconciliationError::ConcurrentReconciliation { ids: vec![109] })
        );
        assert!(service.reconciliation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let service = MemoryLedgerService::new();
        service.fail_next(
            ServiceCall::MatchCandidates,
            ReconciliationError::Service("timeout".to_string()),
        );

        assert!(service.match_candidates(&query(None)).await.is_err());
        assert!(service.match_candidates(&query(None)).await.is_ok());
    }
}
