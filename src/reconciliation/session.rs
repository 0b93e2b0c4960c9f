//! Reconciliation session: the ordered lines of a statement or manual batch

use serde::Serialize;
use uuid::Uuid;

use crate::config::ReconciliationConfig;
use crate::reconciliation::line::{
    CreateEdit, CreateInput, FooterLabels, ReconciliationLine, Submission, SubmissionKind,
};
use crate::reconciliation::matcher::MatchLoader;
use crate::reconciliation::payload::LinePayload;
use crate::tax::TaxTable;
use crate::traits::*;
use crate::types::*;

/// Dismissible message surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub severity: Severity,
    pub message: String,
    /// "Open record" link, if any
    pub link: Option<RecordLink>,
}

impl Notification {
    pub fn new(severity: Severity, message: impl Into<String>, link: Option<RecordLink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            message: message.into(),
            link,
        }
    }
}

impl From<ServerNotification> for Notification {
    fn from(notification: ServerNotification) -> Self {
        Self::new(
            notification.severity,
            notification.message,
            notification.details,
        )
    }
}

/// Session over the unreconciled lines of a scope
///
/// Lines are displayed in the order the service first listed them. The
/// displayed lines are always the window `keys[window_start..window_end]`
/// of the keys still to reconcile.
pub struct ReconciliationSession<S: LedgerService> {
    service: S,
    config: ReconciliationConfig,
    labels: FooterLabels,
    scope: SessionScope,
    validator: Box<dyn CreateLineValidator>,
    keys: Vec<LineKey>,
    window_start: usize,
    window_end: usize,
    lines: Vec<ReconciliationLine>,
    models: Vec<ReconciliationModel>,
    taxes: TaxTable,
    notifications: Vec<Notification>,
    reconciled_count: usize,
    statement_name: Option<String>,
}

impl<S: LedgerService> ReconciliationSession<S> {
    /// Create a session with the default create-line validator
    pub fn new(
        service: S,
        scope: SessionScope,
        config: ReconciliationConfig,
    ) -> ReconciliationResult<Self> {
        Self::with_validator(service, scope, config, Box::new(DefaultCreateLineValidator))
    }

    /// Create a session with a custom create-line validator
    pub fn with_validator(
        service: S,
        scope: SessionScope,
        config: ReconciliationConfig,
        validator: Box<dyn CreateLineValidator>,
    ) -> ReconciliationResult<Self> {
        config.validate()?;
        Ok(Self {
            service,
            labels: FooterLabels::from(&config),
            config,
            scope,
            validator,
            keys: Vec::new(),
            window_start: 0,
            window_end: 0,
            lines: Vec::new(),
            models: Vec::new(),
            taxes: TaxTable::default(),
            notifications: Vec::new(),
            reconciled_count: 0,
            statement_name: None,
        })
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn models(&self) -> &[ReconciliationModel] {
        &self.models
    }

    pub fn taxes(&self) -> &TaxTable {
        &self.taxes
    }

    /// Displayed lines, in display order
    pub fn lines(&self) -> &[ReconciliationLine] {
        &self.lines
    }

    pub fn line(&self, key: LineKey) -> Option<&ReconciliationLine> {
        self.lines.iter().find(|line| line.key() == key)
    }

    /// Lines still to reconcile, displayed or not
    pub fn remaining_count(&self) -> usize {
        self.keys.len()
    }

    /// Lines reconciled during this session, by hand or automatically
    pub fn reconciled_count(&self) -> usize {
        self.reconciled_count
    }

    pub fn statement_name(&self) -> Option<&str> {
        self.statement_name.as_deref()
    }

    /// More lines are waiting past the displayed ones
    pub fn can_load_more(&self) -> bool {
        self.window_end < self.keys.len()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Dismiss one notification; returns whether it existed
    pub fn dismiss_notification(&mut self, id: Uuid) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.id != id);
        self.notifications.len() != before
    }

    pub fn dismiss_line_error(&mut self, key: LineKey) -> ReconciliationResult<()> {
        let index = self.position(key)?;
        self.lines[index].dismiss_error();
        Ok(())
    }

    fn position(&self, key: LineKey) -> ReconciliationResult<usize> {
        self.lines
            .iter()
            .position(|line| line.key() == key)
            .ok_or(ReconciliationError::LineNotFound(key))
    }

    /// Entries proposed on every other line, kept out of candidate queries
    fn excluded_ids(&self, key: LineKey) -> Vec<RecordId> {
        self.lines
            .iter()
            .filter(|line| line.key() != key)
            .flat_map(|line| line.selected_ref_ids())
            .collect()
    }

    fn notify(&mut self, notification: Notification) {
        tracing::debug!(
            severity = ?notification.severity,
            message = %notification.message,
            "notification"
        );
        self.notifications.push(notification);
    }

    // Loading

    /// Load models, taxes and the keys to reconcile, then the first page
    #[tracing::instrument(name = "reconciliation.session.start", skip(self))]
    pub async fn start(&mut self) -> ReconciliationResult<usize> {
        self.models = self.service.reconciliation_models().await?;
        self.taxes = TaxTable::new(self.service.taxes().await?);
        self.keys = self.service.unreconciled_lines(&self.scope).await?;
        self.lines.clear();
        self.window_start = 0;
        self.window_end = 0;
        tracing::info!(
            count = self.keys.len(),
            models = self.models.len(),
            taxes = self.taxes.len(),
            "reconciliation session started"
        );
        self.load_page(0, self.config.page_size).await
    }

    /// Display the lines `offset..offset + limit`, replacing the current page
    ///
    /// Lines that stay displayed keep their state. The first line of the page
    /// is opened when `activate_first_line` is set.
    #[tracing::instrument(name = "reconciliation.session.load_page", skip(self))]
    pub async fn load_page(&mut self, offset: usize, limit: usize) -> ReconciliationResult<usize> {
        let start = offset.min(self.keys.len());
        let end = offset.saturating_add(limit).min(self.keys.len());
        let page_keys = self.keys[start..end].to_vec();

        let missing: Vec<LineKey> = page_keys
            .iter()
            .copied()
            .filter(|key| self.line(*key).is_none())
            .collect();
        let mut fetched = self.fetch_lines(&missing).await?;

        let mut previous = std::mem::take(&mut self.lines);
        for key in &page_keys {
            if let Some(index) = previous.iter().position(|line| line.key() == *key) {
                self.lines.push(previous.swap_remove(index));
            } else if let Some(index) = fetched.iter().position(|line| line.key() == *key) {
                self.lines.push(fetched.swap_remove(index));
            }
        }
        self.window_start = start;
        self.window_end = end;
        tracing::debug!(offset = start, count = self.lines.len(), "page loaded");

        if self.config.activate_first_line {
            if let Some(first) = self.lines.first().map(|line| line.key()) {
                if self.lines[0].mode() == LineMode::Inactive {
                    // a failed fetch stays on the line as its error
                    if let Err(error) = self.activate_line(first, false).await {
                        tracing::warn!(line = %first, %error, "first line activation failed");
                    }
                }
            }
        }
        Ok(self.lines.len())
    }

    /// Append the next page of lines below the displayed ones
    #[tracing::instrument(name = "reconciliation.session.load_more", skip(self))]
    pub async fn load_more(&mut self) -> ReconciliationResult<usize> {
        if !self.can_load_more() {
            return Ok(0);
        }
        self.append_lines(self.config.page_size).await
    }

    async fn append_lines(&mut self, count: usize) -> ReconciliationResult<usize> {
        let end = self.window_end.saturating_add(count).min(self.keys.len());
        let keys = self.keys[self.window_end..end].to_vec();
        let fetched = self.fetch_lines(&keys).await?;
        let appended = fetched.len();
        self.lines.extend(fetched);
        self.window_end = end;
        Ok(appended)
    }

    async fn fetch_lines(&self, keys: &[LineKey]) -> ReconciliationResult<Vec<ReconciliationLine>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows = self.service.preview_lines(keys).await?;
        let mut lines = Vec::with_capacity(keys.len());
        for key in keys {
            match rows.iter().position(|row| row.key == *key) {
                Some(index) => {
                    let row = rows.swap_remove(index);
                    lines.push(ReconciliationLine::new(row, self.labels.clone()));
                }
                None => tracing::warn!(line = %key, "line missing from preview"),
            }
        }
        Ok(lines)
    }

    /// Forget a reconciled key and its line
    fn drop_key(&mut self, key: LineKey) {
        if let Some(position) = self.keys.iter().position(|k| *k == key) {
            self.keys.remove(position);
            if position < self.window_start {
                self.window_start -= 1;
            }
            if position < self.window_end {
                self.window_end -= 1;
            }
        }
        self.lines.retain(|line| line.key() != key);
    }

    // Candidates

    /// Open a line; its candidates decide between match and create mode
    #[tracing::instrument(name = "reconciliation.session.activate_line", skip(self))]
    pub async fn activate_line(
        &mut self,
        key: LineKey,
        force_match: bool,
    ) -> ReconciliationResult<()> {
        let excluded = self.excluded_ids(key);
        let index = self.position(key)?;
        let page_size = self.config.candidate_page_size;
        let request = self.lines[index].begin_activation(force_match, excluded, page_size)?;
        MatchLoader::new(&self.service)
            .load(&mut self.lines[index], request)
            .await?;
        Ok(())
    }

    /// Refetch a line's candidates from the first page
    #[tracing::instrument(name = "reconciliation.session.refresh_candidates", skip(self))]
    pub async fn refresh_candidates(&mut self, key: LineKey) -> ReconciliationResult<()> {
        let excluded = self.excluded_ids(key);
        let index = self.position(key)?;
        let request = self.lines[index].begin_refresh(excluded, self.config.candidate_page_size)?;
        MatchLoader::new(&self.service)
            .load(&mut self.lines[index], request)
            .await?;
        Ok(())
    }

    /// Append the next page of a line's candidates
    #[tracing::instrument(name = "reconciliation.session.load_more_candidates", skip(self))]
    pub async fn load_more_candidates(&mut self, key: LineKey) -> ReconciliationResult<()> {
        let excluded = self.excluded_ids(key);
        let index = self.position(key)?;
        let request =
            self.lines[index].begin_more_candidates(excluded, self.config.candidate_page_size)?;
        MatchLoader::new(&self.service)
            .load(&mut self.lines[index], request)
            .await?;
        Ok(())
    }

    /// Filter a line's candidates; an empty search clears the filter
    #[tracing::instrument(name = "reconciliation.session.search_candidates", skip(self))]
    pub async fn search_candidates(
        &mut self,
        key: LineKey,
        search: Option<String>,
    ) -> ReconciliationResult<()> {
        let excluded = self.excluded_ids(key);
        let index = self.position(key)?;
        let request =
            self.lines[index].begin_search(search, excluded, self.config.candidate_page_size)?;
        MatchLoader::new(&self.service)
            .load(&mut self.lines[index], request)
            .await?;
        Ok(())
    }

    /// Change the partner of a statement line and refetch its candidates
    #[tracing::instrument(name = "reconciliation.session.change_partner", skip(self, partner))]
    pub async fn change_partner(
        &mut self,
        key: LineKey,
        partner: Option<Partner>,
    ) -> ReconciliationResult<()> {
        let excluded = self.excluded_ids(key);
        let index = self.position(key)?;
        let request = self.lines[index].change_partner(
            partner.as_ref(),
            excluded,
            self.config.candidate_page_size,
        )?;
        MatchLoader::new(&self.service)
            .load(&mut self.lines[index], request)
            .await?;
        Ok(())
    }

    // Line edits

    pub fn switch_mode(&mut self, key: LineKey, mode: LineMode) -> ReconciliationResult<()> {
        let index = self.position(key)?;
        self.lines[index].switch_mode(mode)
    }

    pub fn toggle_candidate(
        &mut self,
        key: LineKey,
        candidate_id: RecordId,
    ) -> ReconciliationResult<bool> {
        let index = self.position(key)?;
        self.lines[index].toggle_candidate(candidate_id)
    }

    pub fn add_created_line(
        &mut self,
        key: LineKey,
        input: CreateInput,
    ) -> ReconciliationResult<PropositionId> {
        let index = self.position(key)?;
        self.lines[index].add_created_line(input, &self.taxes)
    }

    pub fn edit_created_line(
        &mut self,
        key: LineKey,
        id: PropositionId,
        edit: CreateEdit,
    ) -> ReconciliationResult<()> {
        let index = self.position(key)?;
        self.lines[index].edit_created_line(id, edit, &self.taxes)
    }

    pub fn remove_proposition(
        &mut self,
        key: LineKey,
        id: PropositionId,
    ) -> ReconciliationResult<()> {
        let index = self.position(key)?;
        self.lines[index].remove_proposition(id, &self.taxes)
    }

    /// Expand a reconciliation model on a line
    pub fn apply_model(
        &mut self,
        key: LineKey,
        model_id: RecordId,
    ) -> ReconciliationResult<Vec<PropositionId>> {
        let index = self.position(key)?;
        let model = self
            .models
            .iter()
            .find(|model| model.id == model_id)
            .ok_or(ReconciliationError::ModelNotFound(model_id))?;
        self.lines[index].apply_model(model, &self.taxes)
    }

    /// Discard a line's propositions by reloading it from the service
    #[tracing::instrument(name = "reconciliation.session.discard_line", skip(self))]
    pub async fn discard_line(&mut self, key: LineKey) -> ReconciliationResult<()> {
        let index = self.position(key)?;
        if self.lines[index].is_submitting() {
            return Err(ReconciliationError::SubmissionPending(key));
        }
        let mut fetched = self.fetch_lines(&[key]).await?;
        let line = fetched.pop().ok_or(ReconciliationError::LineNotFound(key))?;
        self.lines[index] = line;
        Ok(())
    }

    // Submission

    /// Build a line's payload and mark it as submitting
    pub fn prepare_submission(
        &mut self,
        key: LineKey,
        kind: SubmissionKind,
    ) -> ReconciliationResult<Submission> {
        let index = self.position(key)?;
        self.lines[index].begin_submission(kind, self.validator.as_ref())
    }

    /// Send a prepared submission to the ledger service
    pub async fn send(&self, submission: &Submission) -> ReconciliationResult<()> {
        match &submission.payload {
            LinePayload::Statement { line_id, payload } => {
                self.service
                    .process_reconciliations(&[*line_id], std::slice::from_ref(payload))
                    .await
            }
            LinePayload::Manual(payload) => {
                self.service
                    .process_move_lines(std::slice::from_ref(payload))
                    .await
            }
        }
    }

    /// Apply the service's answer to a prepared submission
    ///
    /// A reconciled line leaves the session and, with `keep_page_full`, one
    /// waiting line takes its place. A concurrent reconciliation sends the
    /// line back to match mode with fresh candidates.
    #[tracing::instrument(
        name = "reconciliation.session.complete_submission",
        skip(self, submission),
        fields(line = %submission.key)
    )]
    pub async fn complete_submission(
        &mut self,
        submission: Submission,
        outcome: ReconciliationResult<()>,
    ) -> ReconciliationResult<()> {
        let key = submission.key;
        let index = self.position(key)?;
        match self.lines[index].finish_submission(outcome) {
            Ok(()) => {
                self.drop_key(key);
                self.reconciled_count += 1;
                tracing::info!(
                    kind = ?submission.kind,
                    remaining = self.keys.len(),
                    "line reconciled"
                );
                if self.config.keep_page_full && self.can_load_more() {
                    self.append_lines(1).await?;
                }
                Ok(())
            }
            Err(error @ ReconciliationError::ConcurrentReconciliation { .. }) => {
                tracing::warn!(%error, "counterparts reconciled elsewhere");
                if let Err(refresh_error) = self.refresh_candidates(key).await {
                    tracing::warn!(error = %refresh_error, "candidate refresh failed");
                }
                Err(error)
            }
            Err(error) => {
                tracing::warn!(%error, "submission failed");
                Err(error)
            }
        }
    }

    async fn submit(&mut self, key: LineKey, kind: SubmissionKind) -> ReconciliationResult<()> {
        let submission = self.prepare_submission(key, kind)?;
        let outcome = self.send(&submission).await;
        self.complete_submission(submission, outcome).await
    }

    /// Persist a balanced line
    #[tracing::instrument(name = "reconciliation.session.reconcile_line", skip(self))]
    pub async fn reconcile_line(&mut self, key: LineKey) -> ReconciliationResult<()> {
        self.submit(key, SubmissionKind::Reconcile).await
    }

    /// Persist a line at any balance, closing the remainder
    #[tracing::instrument(name = "reconciliation.session.validate_line", skip(self))]
    pub async fn validate_line(&mut self, key: LineKey) -> ReconciliationResult<()> {
        self.submit(key, SubmissionKind::Validate).await
    }

    /// Apply a reconciliation model and validate the line in one step
    #[tracing::instrument(name = "reconciliation.session.quick_reconcile", skip(self))]
    pub async fn quick_reconcile(
        &mut self,
        key: LineKey,
        model_id: RecordId,
    ) -> ReconciliationResult<()> {
        self.apply_model(key, model_id)?;
        self.validate_line(key).await
    }

    /// Persist every balanced statement line in a single call
    ///
    /// Lines whose payload cannot be built keep their error and are left
    /// out. Returns how many lines were reconciled.
    #[tracing::instrument(name = "reconciliation.session.reconcile_balanced_lines", skip(self))]
    pub async fn reconcile_balanced_lines(&mut self) -> ReconciliationResult<usize> {
        let mut submissions = Vec::new();
        for line in self.lines.iter_mut() {
            if line.key().statement_line_id().is_none()
                || line.is_submitting()
                || line.propositions().is_empty()
                || !line.is_reconcilable()
            {
                continue;
            }
            match line.begin_submission(SubmissionKind::Reconcile, self.validator.as_ref()) {
                Ok(submission) => submissions.push(submission),
                Err(error) => tracing::debug!(line = %line.key(), %error, "line left out"),
            }
        }
        if submissions.is_empty() {
            return Ok(0);
        }

        let mut line_ids = Vec::new();
        let mut payloads = Vec::new();
        for submission in &submissions {
            if let LinePayload::Statement { line_id, payload } = &submission.payload {
                line_ids.push(*line_id);
                payloads.push(payload.clone());
            }
        }
        let outcome = self
            .service
            .process_reconciliations(&line_ids, &payloads)
            .await;
        tracing::info!(count = line_ids.len(), ok = outcome.is_ok(), "balanced lines sent");

        let count = submissions.len();
        let mut first_error = None;
        for submission in submissions {
            if let Err(error) = self.complete_submission(submission, outcome.clone()).await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }

    /// Let the service reconcile what it can on its own
    ///
    /// Lines the service reports as reconciled leave the session; the others
    /// are left untouched. A failure changes nothing and raises a single
    /// notification.
    #[tracing::instrument(name = "reconciliation.session.auto_reconcile", skip(self))]
    pub async fn auto_reconcile(&mut self) -> ReconciliationResult<usize> {
        let statement_ids = match &self.scope {
            SessionScope::Statements(ids) => ids.clone(),
            SessionScope::Manual { .. } => {
                return Err(ReconciliationError::InvalidOperation(
                    "automatic reconciliation needs bank statements".to_string(),
                ))
            }
        };
        let line_ids: Vec<RecordId> = self
            .keys
            .iter()
            .filter_map(|key| key.statement_line_id())
            .collect();

        let outcome = match self.service.auto_reconcile(&statement_ids, &line_ids).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(%error, "automatic reconciliation failed");
                self.notify(Notification::new(
                    Severity::Danger,
                    format!("Automatic reconciliation failed: {error}"),
                    None,
                ));
                return Err(error);
            }
        };

        let reconciled: Vec<LineKey> = self
            .keys
            .iter()
            .copied()
            .filter(|key| {
                key.statement_line_id()
                    .is_some_and(|id| !outcome.remaining_ids.contains(&id))
            })
            .collect();
        for key in &reconciled {
            self.drop_key(*key);
        }
        self.reconciled_count += outcome.reconciled_count;
        if outcome.statement_name.is_some() {
            self.statement_name = outcome.statement_name.clone();
        }
        for notification in outcome.notifications {
            self.notify(notification.into());
        }
        tracing::info!(
            count = outcome.reconciled_count,
            removed = reconciled.len(),
            remaining = self.keys.len(),
            "automatic reconciliation done"
        );
        Ok(reconciled.len())
    }
}
