//! Reconciliation line: one statement line (or bucket) and the propositions balancing it

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::config::ReconciliationConfig;
use crate::reconciliation::model::ReconciliationModelExpander;
use crate::reconciliation::payload::{self, LinePayload};
use crate::reconciliation::proposition::{Origin, ProposedLine};
use crate::tax::{split_tax_rounded, TaxTable};
use crate::traits::CreateLineValidator;
use crate::types::*;
use crate::utils::amount::{self, zero};
use crate::utils::validation::validate_precision;

/// Labels used for the footer and the synthesized open-balance line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FooterLabels {
    pub open_balance: String,
    pub write_off: String,
}

impl Default for FooterLabels {
    fn default() -> Self {
        Self::from(&ReconciliationConfig::default())
    }
}

impl From<&ReconciliationConfig> for FooterLabels {
    fn from(config: &ReconciliationConfig) -> Self {
        Self {
            open_balance: config.open_balance_label.clone(),
            write_off: config.write_off_label.clone(),
        }
    }
}

/// Which footer an unbalanced line shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FooterKind {
    /// Propositions fall short of the statement amount
    OpenBalance,
    /// Propositions overshoot the statement amount
    WriteOff,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Footer {
    pub kind: FooterKind,
    pub label: String,
    /// Signed open amount (`-balance`)
    pub amount: BigDecimal,
    /// Amount formatted in the line currency
    pub display: String,
}

/// Values derived from a line's source amount and propositions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSummary {
    /// `sourceAmount - Σ signedAmount(propositions)`, rounded to the currency
    pub balance: BigDecimal,
    /// `Σ signedAmount(propositions)`, rounded to the currency
    pub total: BigDecimal,
    /// `-balance`, hidden when the line is balanced
    pub open_balance: Option<BigDecimal>,
    pub footer: Option<Footer>,
    pub reconcilable: bool,
}

impl LineSummary {
    pub fn compute(
        source_amount: &BigDecimal,
        propositions: &[ProposedLine],
        currency: &Currency,
        labels: &FooterLabels,
    ) -> Self {
        let raw_total: BigDecimal = propositions.iter().map(|p| p.signed_amount()).sum();
        let source = currency.round(source_amount);
        let total = currency.round(&raw_total);
        let balance = currency.round(&(source_amount - &raw_total));

        if balance == zero() {
            return Self {
                balance,
                total,
                open_balance: None,
                footer: None,
                reconcilable: true,
            };
        }

        let open_balance = zero() - balance.clone();
        let kind = if total.abs() > source.abs() {
            FooterKind::WriteOff
        } else {
            FooterKind::OpenBalance
        };
        let label = match kind {
            FooterKind::OpenBalance => labels.open_balance.clone(),
            FooterKind::WriteOff => labels.write_off.clone(),
        };
        let footer = Footer {
            kind,
            label,
            display: currency.format(&open_balance),
            amount: open_balance.clone(),
        };

        Self {
            balance,
            total,
            open_balance: Some(open_balance),
            footer: Some(footer),
            reconcilable: false,
        }
    }
}

/// Error kept on a line until dismissed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineError {
    pub message: String,
    pub proposition: Option<PropositionId>,
    pub field: Option<CreateField>,
}

impl From<&ReconciliationError> for LineError {
    fn from(error: &ReconciliationError) -> Self {
        match error {
            ReconciliationError::Validation {
                proposition,
                field,
                message,
            } => Self {
                message: message.clone(),
                proposition: *proposition,
                field: Some(*field),
            },
            other => Self {
                message: other.to_string(),
                proposition: None,
                field: None,
            },
        }
    }
}

/// Why candidates are being fetched; decides what happens to the mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPurpose {
    /// Opening the line; `force_match` skips the empty-candidates fallback
    Activate { force_match: bool },
    /// Partner changed; mode is derived again
    PartnerChange,
    /// Reset after a concurrent reconciliation; mode goes back to match
    Refresh,
    /// Next page of candidates; mode is untouched
    More,
}

/// Candidate fetch issued by a line; its token identifies the response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRequest {
    pub token: u64,
    pub purpose: FetchPurpose,
    pub query: CandidateQuery,
}

/// What the user asked for when submitting a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    /// Only allowed on balanced lines
    Reconcile,
    /// Allowed at any balance; closes the remainder with an open-balance line
    Validate,
}

/// Payload handed to the ledger service for one line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub key: LineKey,
    pub kind: SubmissionKind,
    pub payload: LinePayload,
}

/// Create-panel input for a new line; missing values take the line defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateInput {
    pub account_id: Option<RecordId>,
    /// Defaults to the statement line name
    pub label: Option<String>,
    /// Unsigned amount, defaults to the unsigned balance; a negative value
    /// books the line on the other side
    pub amount: Option<BigDecimal>,
    pub tax_id: Option<RecordId>,
    pub analytic_account_id: Option<RecordId>,
}

/// Edit of one field of a created line
#[derive(Debug, Clone, PartialEq)]
pub enum CreateEdit {
    Account(Option<RecordId>),
    Label(String),
    /// Unsigned amount; a negative value flips the side
    Amount(BigDecimal),
    Tax(Option<RecordId>),
    AnalyticAccount(Option<RecordId>),
}

impl CreateEdit {
    fn field(&self) -> Option<CreateField> {
        match self {
            CreateEdit::Account(_) => Some(CreateField::Account),
            CreateEdit::Label(_) => Some(CreateField::Label),
            CreateEdit::Amount(_) => Some(CreateField::Amount),
            CreateEdit::Tax(_) | CreateEdit::AnalyticAccount(_) => None,
        }
    }
}

/// One line being reconciled, with its propositions and mode
#[derive(Debug, Clone)]
pub struct ReconciliationLine {
    data: LineData,
    mode: LineMode,
    propositions: Vec<ProposedLine>,
    candidates: Vec<MatchCandidate>,
    candidates_exhausted: bool,
    search: Option<String>,
    fetch_token: u64,
    pending_fetch: Option<u64>,
    pending_submission: Option<SubmissionKind>,
    next_id: u64,
    labels: FooterLabels,
    summary: LineSummary,
    last_error: Option<LineError>,
    applied_model: Option<RecordId>,
}

impl ReconciliationLine {
    /// Create an inactive line from a fetched row
    pub fn new(data: LineData, labels: FooterLabels) -> Self {
        let summary = LineSummary::compute(&data.amount, &[], &data.currency, &labels);
        Self {
            data,
            mode: LineMode::Inactive,
            propositions: Vec::new(),
            candidates: Vec::new(),
            candidates_exhausted: false,
            search: None,
            fetch_token: 0,
            pending_fetch: None,
            pending_submission: None,
            next_id: 1,
            labels,
            summary,
            last_error: None,
            applied_model: None,
        }
    }

    pub fn key(&self) -> LineKey {
        self.data.key
    }

    pub fn data(&self) -> &LineData {
        &self.data
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn mode(&self) -> LineMode {
        self.mode
    }

    pub fn source_amount(&self) -> &BigDecimal {
        &self.data.amount
    }

    pub fn partner_id(&self) -> Option<RecordId> {
        self.data.partner_id
    }

    pub fn currency(&self) -> &Currency {
        &self.data.currency
    }

    pub fn labels(&self) -> &FooterLabels {
        &self.labels
    }

    pub fn propositions(&self) -> &[ProposedLine] {
        &self.propositions
    }

    pub fn proposition(&self, id: PropositionId) -> Option<&ProposedLine> {
        self.propositions.iter().find(|p| p.id == id)
    }

    /// Fetched candidates that are not selected, in fetch order
    pub fn match_candidates(&self) -> Vec<&MatchCandidate> {
        self.candidates
            .iter()
            .filter(|c| !self.is_selected(c.id))
            .collect()
    }

    /// More candidates may be available server-side
    pub fn has_more_candidates(&self) -> bool {
        !self.candidates_exhausted
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn summary(&self) -> &LineSummary {
        &self.summary
    }

    pub fn balance(&self) -> &BigDecimal {
        &self.summary.balance
    }

    pub fn is_reconcilable(&self) -> bool {
        self.summary.reconcilable
    }

    pub fn last_error(&self) -> Option<&LineError> {
        self.last_error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    pub fn is_fetching(&self) -> bool {
        self.pending_fetch.is_some()
    }

    pub fn is_submitting(&self) -> bool {
        self.pending_submission.is_some()
    }

    pub fn applied_model(&self) -> Option<RecordId> {
        self.applied_model
    }

    /// Ledger entries referenced by this line's propositions
    pub fn selected_ref_ids(&self) -> Vec<RecordId> {
        self.propositions.iter().filter_map(|p| p.ref_id).collect()
    }

    /// Id the next proposition will receive
    pub fn next_proposition_id(&self) -> PropositionId {
        PropositionId(self.next_id)
    }

    fn is_selected(&self, candidate_id: RecordId) -> bool {
        self.propositions
            .iter()
            .any(|p| p.ref_id == Some(candidate_id))
    }

    fn allocate_id(&mut self) -> PropositionId {
        let id = PropositionId(self.next_id);
        self.next_id += 1;
        id
    }

    fn recompute(&mut self) {
        self.summary = LineSummary::compute(
            &self.data.amount,
            &self.propositions,
            &self.data.currency,
            &self.labels,
        );
    }

    fn set_mode(&mut self, mode: LineMode) {
        if self.mode != mode {
            tracing::debug!(line = %self.data.key, from = %self.mode, to = %mode, "mode changed");
            self.mode = mode;
        }
    }

    fn record_error(&mut self, error: &ReconciliationError) {
        self.last_error = Some(LineError::from(error));
    }

    /// Mutations are refused once reconciled or while a submission is in flight
    fn ensure_editable(&self) -> ReconciliationResult<()> {
        if self.mode == LineMode::Reconciled {
            return Err(ReconciliationError::InvalidTransition {
                from: LineMode::Reconciled,
                to: LineMode::Reconciled,
            });
        }
        if self.pending_submission.is_some() {
            return Err(ReconciliationError::SubmissionPending(self.data.key));
        }
        Ok(())
    }

    /// Side new entries are booked on: the balance, or the source amount when balanced
    fn direction(&self) -> BigDecimal {
        if self.summary.balance != zero() {
            self.summary.balance.clone()
        } else {
            self.data.amount.clone()
        }
    }

    /// Map an unsigned user amount to a signed one following `reference`
    fn orient(value: &BigDecimal, reference: &BigDecimal) -> BigDecimal {
        let oriented = amount::with_sign_of(value, reference);
        if *value < zero() {
            zero() - oriented
        } else {
            oriented
        }
    }

    // Candidate fetching

    fn begin_fetch(
        &mut self,
        purpose: FetchPurpose,
        excluded_ids: Vec<RecordId>,
        page_size: usize,
    ) -> CandidateRequest {
        self.fetch_token += 1;
        self.pending_fetch = Some(self.fetch_token);

        let offset = match purpose {
            FetchPurpose::More => self.candidates.len(),
            _ => 0,
        };
        let account_id = match self.data.key {
            LineKey::Bucket { account_id, .. } => Some(account_id),
            LineKey::Statement(_) => self.data.account_id,
        };
        let excluded_ids = excluded_ids
            .into_iter()
            .filter(|id| !self.is_selected(*id))
            .collect();

        CandidateRequest {
            token: self.fetch_token,
            purpose,
            query: CandidateQuery {
                line: self.data.key,
                account_id,
                partner_id: self.data.partner_id,
                excluded_ids,
                search: self.search.clone(),
                offset,
                limit: page_size,
            },
        }
    }

    /// Open the line; candidates decide between match and create mode
    pub fn begin_activation(
        &mut self,
        force_match: bool,
        excluded_ids: Vec<RecordId>,
        page_size: usize,
    ) -> ReconciliationResult<CandidateRequest> {
        self.ensure_editable()?;
        Ok(self.begin_fetch(
            FetchPurpose::Activate { force_match },
            excluded_ids,
            page_size,
        ))
    }

    /// Refetch candidates from the first page, e.g. after a search change
    pub fn begin_refresh(
        &mut self,
        excluded_ids: Vec<RecordId>,
        page_size: usize,
    ) -> ReconciliationResult<CandidateRequest> {
        if self.mode == LineMode::Reconciled {
            return Err(ReconciliationError::InvalidTransition {
                from: LineMode::Reconciled,
                to: LineMode::Match,
            });
        }
        Ok(self.begin_fetch(FetchPurpose::Refresh, excluded_ids, page_size))
    }

    /// Fetch the next page of candidates
    pub fn begin_more_candidates(
        &mut self,
        excluded_ids: Vec<RecordId>,
        page_size: usize,
    ) -> ReconciliationResult<CandidateRequest> {
        self.ensure_editable()?;
        Ok(self.begin_fetch(FetchPurpose::More, excluded_ids, page_size))
    }

    /// Set the candidate search filter and refetch from the first page
    pub fn begin_search(
        &mut self,
        search: Option<String>,
        excluded_ids: Vec<RecordId>,
        page_size: usize,
    ) -> ReconciliationResult<CandidateRequest> {
        self.ensure_editable()?;
        self.search = search.filter(|s| !s.trim().is_empty());
        Ok(self.begin_fetch(FetchPurpose::Refresh, excluded_ids, page_size))
    }

    /// Apply a candidate page; returns false when the response is stale
    pub fn apply_candidates(
        &mut self,
        request: &CandidateRequest,
        page: Vec<MatchCandidate>,
    ) -> bool {
        if self.pending_fetch != Some(request.token) || self.mode == LineMode::Reconciled {
            tracing::debug!(
                line = %self.data.key,
                token = request.token,
                current = self.fetch_token,
                "discarding stale candidates"
            );
            return false;
        }
        self.pending_fetch = None;
        self.candidates_exhausted = page.len() < request.query.limit;

        match request.purpose {
            FetchPurpose::More => {
                for candidate in page {
                    if !self.candidates.iter().any(|c| c.id == candidate.id) {
                        self.candidates.push(candidate);
                    }
                }
            }
            _ => self.candidates = page,
        }

        match request.purpose {
            FetchPurpose::Activate { force_match } => {
                if self.mode == LineMode::Inactive || force_match {
                    self.derive_mode(force_match);
                }
            }
            FetchPurpose::PartnerChange => self.derive_mode(false),
            FetchPurpose::Refresh => {
                if self.mode == LineMode::Inactive {
                    self.derive_mode(false);
                }
            }
            FetchPurpose::More => {}
        }
        true
    }

    /// Record a failed fetch; stale failures are ignored
    pub fn fail_candidates(&mut self, request: &CandidateRequest, error: &ReconciliationError) {
        if self.pending_fetch == Some(request.token) {
            self.pending_fetch = None;
            self.record_error(error);
        }
    }

    /// Empty candidate list means there is nothing to match: go to create mode
    fn derive_mode(&mut self, force_match: bool) {
        let mode = if force_match || !self.match_candidates().is_empty() {
            LineMode::Match
        } else {
            LineMode::Create
        };
        self.set_mode(mode);
    }

    /// Switch between the match and create panels
    ///
    /// Propositions are shared by both panels and survive the switch; a
    /// candidate fetch still in flight is discarded.
    pub fn switch_mode(&mut self, target: LineMode) -> ReconciliationResult<()> {
        self.ensure_editable()?;
        match target {
            LineMode::Match | LineMode::Create => {}
            LineMode::Inactive | LineMode::Reconciled => {
                return Err(ReconciliationError::InvalidTransition {
                    from: self.mode,
                    to: target,
                })
            }
        }
        if self.mode != target {
            if self.pending_fetch.take().is_some() {
                self.fetch_token += 1;
            }
            self.set_mode(target);
        }
        Ok(())
    }

    /// Change the partner: counterparts are dropped and candidates refetched
    pub fn change_partner(
        &mut self,
        partner: Option<&Partner>,
        excluded_ids: Vec<RecordId>,
        page_size: usize,
    ) -> ReconciliationResult<CandidateRequest> {
        self.ensure_editable()?;
        if let LineKey::Bucket { .. } = self.data.key {
            return Err(ReconciliationError::InvalidOperation(
                "the partner of a manual reconciliation bucket cannot change".to_string(),
            ));
        }

        self.data.partner_id = partner.map(|p| p.id);
        self.data.partner_name = partner.map(|p| p.name.clone());
        if let Some(partner) = partner {
            let account = if self.data.amount > zero() {
                partner.receivable_account_id
            } else {
                partner.payable_account_id
            };
            if account.is_some() {
                self.data.open_balance_account_id = account;
            }
        }

        let before = self.propositions.len();
        self.propositions.retain(|p| !p.is_counterpart());
        self.candidates.clear();
        self.candidates_exhausted = false;
        self.recompute();
        tracing::debug!(
            line = %self.data.key,
            partner = ?self.data.partner_id,
            dropped = before - self.propositions.len(),
            "partner changed"
        );

        Ok(self.begin_fetch(FetchPurpose::PartnerChange, excluded_ids, page_size))
    }

    // Propositions

    /// Select or deselect a match candidate; returns whether it is now selected
    pub fn toggle_candidate(&mut self, candidate_id: RecordId) -> ReconciliationResult<bool> {
        self.ensure_editable()?;

        if let Some(position) = self
            .propositions
            .iter()
            .position(|p| p.ref_id == Some(candidate_id))
        {
            let removed = self.propositions.remove(position);
            if let Origin::Counterpart(candidate) = removed.origin {
                if !self.candidates.iter().any(|c| c.id == candidate.id) {
                    self.candidates.push(candidate);
                }
            }
            self.recompute();
            return Ok(false);
        }

        let candidate = self
            .candidates
            .iter()
            .find(|c| c.id == candidate_id)
            .cloned()
            .ok_or(ReconciliationError::CandidateNotFound(candidate_id))?;
        let id = self.allocate_id();
        let proposition = ProposedLine::from_candidate(id, &candidate, &self.summary.balance);
        if proposition.is_partial {
            tracing::debug!(line = %self.data.key, candidate = candidate_id, "partial match");
        }
        self.propositions.push(proposition);
        if self.mode == LineMode::Inactive {
            self.set_mode(LineMode::Match);
        }
        self.recompute();
        Ok(true)
    }

    /// Add a line from the create panel
    pub fn add_created_line(
        &mut self,
        input: CreateInput,
        taxes: &TaxTable,
    ) -> ReconciliationResult<PropositionId> {
        self.ensure_editable()?;
        if let Some(tax_id) = input.tax_id {
            taxes.get(tax_id)?;
        }

        let signed = match &input.amount {
            Some(value) => {
                validate_precision(None, value, &self.data.currency)?;
                Self::orient(value, &self.direction())
            }
            None => self.summary.balance.clone(),
        };
        let label = input.label.unwrap_or_else(|| self.data.name.clone());
        let id = self.allocate_id();
        let mut line = ProposedLine::created(id, input.account_id, label, signed, Origin::Manual);
        line.tax_id = input.tax_id;
        line.analytic_account_id = input.analytic_account_id;
        self.propositions.push(line);

        self.apply_tax(id, taxes)?;
        self.set_mode(LineMode::Create);
        self.recompute();
        Ok(id)
    }

    /// Edit a field of a created line; taxes are recomputed from the entered amount
    pub fn edit_created_line(
        &mut self,
        id: PropositionId,
        edit: CreateEdit,
        taxes: &TaxTable,
    ) -> ReconciliationResult<()> {
        self.ensure_editable()?;
        let field = edit.field();
        let direction = self.direction();
        let currency = self.data.currency.clone();

        let line = self
            .propositions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(ReconciliationError::PropositionNotFound(id))?;
        if line.is_counterpart() || line.is_tax_line() {
            return Err(ReconciliationError::InvalidOperation(format!(
                "proposition {id} is not an editable created line"
            )));
        }

        match edit {
            CreateEdit::Account(account_id) => line.account_id = account_id,
            CreateEdit::Label(label) => line.label = label,
            CreateEdit::Amount(value) => {
                validate_precision(Some(id), &value, &currency)?;
                let reference = if line.entered_amount != zero() {
                    line.entered_amount.clone()
                } else {
                    direction
                };
                line.entered_amount = Self::orient(&value, &reference);
            }
            CreateEdit::Tax(tax_id) => {
                if let Some(tax_id) = tax_id {
                    taxes.get(tax_id)?;
                }
                line.tax_id = tax_id;
            }
            CreateEdit::AnalyticAccount(analytic_account_id) => {
                line.analytic_account_id = analytic_account_id
            }
        }

        self.apply_tax(id, taxes)?;
        if let (Some(field), Some(error)) = (field, &self.last_error) {
            if error.proposition == Some(id) && error.field == Some(field) {
                self.last_error = None;
            }
        }
        self.recompute();
        Ok(())
    }

    /// Recompute the base amount and tax line of a created line
    fn apply_tax(&mut self, base_id: PropositionId, taxes: &TaxTable) -> ReconciliationResult<()> {
        let digits = self.data.currency.digits;
        self.propositions.retain(|p| p.tax_base() != Some(base_id));

        let position = self
            .propositions
            .iter()
            .position(|p| p.id == base_id)
            .ok_or(ReconciliationError::PropositionNotFound(base_id))?;
        let entered = self.propositions[position].entered_amount.clone();

        let tax = match self.propositions[position].tax_id {
            Some(tax_id) => taxes.get(tax_id)?.clone(),
            None => {
                self.propositions[position].set_signed_amount(&entered);
                return Ok(());
            }
        };

        let split = split_tax_rounded(&entered, &tax, digits);
        self.propositions[position].set_signed_amount(&split.base_excl);
        if split.tax_amount != zero() {
            let tax_id = self.allocate_id();
            let base = &self.propositions[position];
            let tax_line = ProposedLine::tax_line(tax_id, base, &tax, split.tax_amount);
            self.propositions.insert(position + 1, tax_line);
        }
        Ok(())
    }

    /// Remove a proposition; counterparts go back to the candidates and
    /// removing a tax line removes the tax from its base line
    pub fn remove_proposition(
        &mut self,
        id: PropositionId,
        taxes: &TaxTable,
    ) -> ReconciliationResult<()> {
        self.ensure_editable()?;
        let line = self
            .proposition(id)
            .cloned()
            .ok_or(ReconciliationError::PropositionNotFound(id))?;

        if let Some(ref_id) = line.ref_id {
            self.toggle_candidate(ref_id)?;
            return Ok(());
        }

        if let Some(base_id) = line.tax_base() {
            if let Some(base) = self.propositions.iter_mut().find(|p| p.id == base_id) {
                base.tax_id = None;
            }
            self.apply_tax(base_id, taxes)?;
        } else {
            self.propositions
                .retain(|p| p.id != id && p.tax_base() != Some(id));
        }
        self.recompute();
        Ok(())
    }

    /// Expand a reconciliation model, replacing lines from any earlier model
    ///
    /// The line is left as it was when the expansion fails.
    pub fn apply_model(
        &mut self,
        model: &ReconciliationModel,
        taxes: &TaxTable,
    ) -> ReconciliationResult<Vec<PropositionId>> {
        self.ensure_editable()?;
        let kept = self.propositions.clone();
        let kept_model = self.applied_model;
        self.clear_model_lines();

        let expanded = match ReconciliationModelExpander::expand(model, self, taxes) {
            Ok(expanded) => expanded,
            Err(error) => {
                self.propositions = kept;
                self.applied_model = kept_model;
                self.recompute();
                return Err(error);
            }
        };
        let mut created = Vec::new();
        for line in expanded {
            self.next_id = self.next_id.max(line.id.0 + 1);
            if !line.is_tax_line() {
                created.push(line.id);
            }
            self.propositions.push(line);
        }

        self.applied_model = Some(model.id);
        self.set_mode(LineMode::Create);
        self.recompute();
        tracing::debug!(
            line = %self.data.key,
            model = model.id,
            balance = %self.summary.balance,
            "reconciliation model applied"
        );
        Ok(created)
    }

    /// Drop every line expanded from a model, with their tax lines
    pub fn clear_model_lines(&mut self) {
        let model_ids: Vec<PropositionId> = self
            .propositions
            .iter()
            .filter(|p| p.model_id().is_some())
            .map(|p| p.id)
            .collect();
        self.propositions.retain(|p| {
            p.model_id().is_none() && !p.tax_base().is_some_and(|base| model_ids.contains(&base))
        });
        self.applied_model = None;
        self.recompute();
    }

    // Submission

    /// Build the payload and mark the line as submitting
    ///
    /// A second submission is refused until the first one is finished.
    pub fn begin_submission(
        &mut self,
        kind: SubmissionKind,
        validator: &dyn CreateLineValidator,
    ) -> ReconciliationResult<Submission> {
        if self.pending_submission.is_some() {
            return Err(ReconciliationError::SubmissionPending(self.data.key));
        }
        if self.mode == LineMode::Reconciled {
            return Err(ReconciliationError::InvalidTransition {
                from: LineMode::Reconciled,
                to: LineMode::Reconciled,
            });
        }
        if kind == SubmissionKind::Reconcile && !self.summary.reconcilable {
            let error = ReconciliationError::NotReconcilable {
                balance: self.summary.balance.clone(),
            };
            self.record_error(&error);
            return Err(error);
        }

        let payload = match payload::build(self, kind, validator) {
            Ok(payload) => payload,
            Err(error) => {
                self.record_error(&error);
                return Err(error);
            }
        };

        self.pending_submission = Some(kind);
        self.last_error = None;
        Ok(Submission {
            key: self.data.key,
            kind,
            payload,
        })
    }

    /// Apply the service's answer to a submission
    pub fn finish_submission(
        &mut self,
        outcome: ReconciliationResult<()>,
    ) -> ReconciliationResult<()> {
        if self.pending_submission.take().is_none() {
            return Err(ReconciliationError::InvalidOperation(format!(
                "no submission pending for {}",
                self.data.key
            )));
        }

        match outcome {
            Ok(()) => {
                self.last_error = None;
                self.set_mode(LineMode::Reconciled);
                Ok(())
            }
            Err(ReconciliationError::ConcurrentReconciliation { ids }) => {
                self.propositions
                    .retain(|p| !p.ref_id.is_some_and(|ref_id| ids.contains(&ref_id)));
                self.candidates.retain(|c| !ids.contains(&c.id));
                self.set_mode(LineMode::Match);
                self.recompute();
                let error = ReconciliationError::ConcurrentReconciliation { ids };
                self.record_error(&error);
                Err(error)
            }
            Err(error) => {
                self.record_error(&error);
                Err(error)
            }
        }
    }
}
