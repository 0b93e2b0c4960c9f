//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::utils::amount;

/// Identifier of a record owned by the ledger service (move line, account, partner, tax...)
pub type RecordId = i64;

/// What a reconciliation line is reconciling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKey {
    /// A single bank statement line
    Statement(RecordId),
    /// An (account, partner) bucket of open items in a manual reconciliation batch
    Bucket {
        account_id: RecordId,
        partner_id: Option<RecordId>,
    },
}

impl LineKey {
    /// Statement line id, if this key designates a statement line
    pub fn statement_line_id(&self) -> Option<RecordId> {
        match self {
            LineKey::Statement(id) => Some(*id),
            LineKey::Bucket { .. } => None,
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKey::Statement(id) => write!(f, "statement line {id}"),
            LineKey::Bucket {
                account_id,
                partner_id: Some(partner_id),
            } => write!(f, "account {account_id} / partner {partner_id}"),
            LineKey::Bucket {
                account_id,
                partner_id: None,
            } => write!(f, "account {account_id}"),
        }
    }
}

/// What a session reconciles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// Unreconciled lines of one or more bank statements
    Statements(Vec<RecordId>),
    /// Manual reconciliation of open items, bucketed by account and partner;
    /// an empty list means every reconcilable account
    Manual { account_ids: Vec<RecordId> },
}

/// Mode of a reconciliation line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineMode {
    /// Loaded but not opened yet
    Inactive,
    /// Matching against existing counterpart entries
    Match,
    /// Creating new journal items by hand or from a model
    Create,
    /// Persisted; the line leaves the session
    Reconciled,
}

impl fmt::Display for LineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineMode::Inactive => "inactive",
            LineMode::Match => "match",
            LineMode::Create => "create",
            LineMode::Reconciled => "reconciled",
        };
        f.write_str(name)
    }
}

/// Where the currency symbol is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolPosition {
    Before,
    After,
}

/// Display currency of a reconciliation line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    /// ISO code or short name
    pub name: String,
    /// Symbol printed next to amounts
    pub symbol: String,
    /// Number of decimal digits amounts are rounded to
    pub digits: u32,
    /// Symbol placement
    pub position: SymbolPosition,
}

impl Currency {
    /// Create a currency printed with its symbol after the amount
    pub fn new(name: &str, symbol: &str, digits: u32) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            digits,
            position: SymbolPosition::After,
        }
    }

    /// Change where the symbol is printed
    pub fn with_position(mut self, position: SymbolPosition) -> Self {
        self.position = position;
        self
    }

    /// Round an amount to this currency's precision
    pub fn round(&self, value: &BigDecimal) -> BigDecimal {
        amount::round(value, self.digits)
    }

    /// Whether an amount is zero once rounded to this currency's precision
    pub fn is_zero(&self, value: &BigDecimal) -> bool {
        self.round(value) == amount::zero()
    }

    /// Render an amount for display, e.g. `1175.00 €` or `$ 1175.00`
    pub fn format(&self, value: &BigDecimal) -> String {
        let rounded = self.round(value);
        match self.position {
            SymbolPosition::Before => format!("{} {}", self.symbol, rounded),
            SymbolPosition::After => format!("{} {}", rounded, self.symbol),
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("EUR", "€", 2)
    }
}

/// Partner selected on a reconciliation line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub id: RecordId,
    pub name: String,
    /// Account used for open balances on incoming amounts
    pub receivable_account_id: Option<RecordId>,
    /// Account used for open balances on outgoing amounts
    pub payable_account_id: Option<RecordId>,
}

/// Raw row fetched from the ledger service: a statement line or a bucket of open items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineData {
    pub key: LineKey,
    /// Statement line label, or bucket display name
    pub name: String,
    pub date: Option<NaiveDate>,
    pub reference: Option<String>,
    /// Signed amount to reconcile; zero for buckets
    pub amount: BigDecimal,
    pub partner_id: Option<RecordId>,
    pub partner_name: Option<String>,
    /// Account candidates are restricted to (bucket account), if any
    pub account_id: Option<RecordId>,
    /// Account receiving the synthesized open-balance line on validation
    pub open_balance_account_id: Option<RecordId>,
    pub currency: Currency,
}

/// Existing ledger entry that may be matched against a line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: RecordId,
    pub name: String,
    pub reference: Option<String>,
    pub date: Option<NaiveDate>,
    pub account_id: RecordId,
    pub partner_id: Option<RecordId>,
    /// Outstanding debit, expressed on the statement side
    pub debit: BigDecimal,
    /// Outstanding credit, expressed on the statement side
    pub credit: BigDecimal,
    /// Liquidity or payment line that needs no split when fully matched
    #[serde(default)]
    pub already_paid: bool,
}

impl MatchCandidate {
    /// Signed outstanding amount (`debit - credit`)
    pub fn amount(&self) -> BigDecimal {
        &self.debit - &self.credit
    }
}

/// Filter sent to the ledger service when looking for counterparts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub line: LineKey,
    pub account_id: Option<RecordId>,
    pub partner_id: Option<RecordId>,
    /// Entries already proposed somewhere in the session
    pub excluded_ids: Vec<RecordId>,
    pub search: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

/// How a reconciliation model computes its amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountType {
    Fixed,
    Percentage,
}

/// One line of a reconciliation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLine {
    pub account_id: RecordId,
    pub label: String,
    pub amount_type: AmountType,
    pub amount: BigDecimal,
    pub tax_id: Option<RecordId>,
    pub analytic_account_id: Option<RecordId>,
}

/// Named "quick add" template expanding into one or two proposed lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationModel {
    pub id: RecordId,
    pub name: String,
    #[serde(flatten)]
    pub primary: ModelLine,
    pub second_line: Option<ModelLine>,
}

/// Counterpart that is split (or matched) against the statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartDict {
    pub counterpart_aml_id: RecordId,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub name: String,
}

/// New journal item created by the reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineDict {
    pub account_id: RecordId,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytic_account_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_ids: Option<Vec<RecordId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_line_id: Option<RecordId>,
}

/// Payload persisted for one statement line by `process_reconciliations`
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReconciliationPayload {
    #[serde(serialize_with = "id_or_false")]
    pub partner_id: Option<RecordId>,
    pub counterpart_aml_dicts: Vec<CounterpartDict>,
    pub payment_aml_ids: Vec<RecordId>,
    pub new_aml_dicts: Vec<NewLineDict>,
}

/// Kind of bucket in a manual reconciliation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketKind {
    Partner,
    Account,
}

/// Payload persisted for one bucket by `process_move_lines`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualReconciliationPayload {
    #[serde(rename = "type")]
    pub kind: BucketKind,
    /// Partner id for partner buckets, account id otherwise
    pub id: RecordId,
    pub mv_line_ids: Vec<RecordId>,
    pub new_mv_line_dicts: Vec<NewLineDict>,
}

/// Severity of a notification shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

/// "Open record" link attached to a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLink {
    pub model: String,
    pub ids: Vec<RecordId>,
    pub name: String,
}

/// Notification returned by the ledger service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNotification {
    #[serde(rename = "type")]
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub details: Option<RecordLink>,
}

/// Response of the automatic reconciliation of a statement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutoReconcileOutcome {
    #[serde(rename = "num_already_reconciled_lines")]
    pub reconciled_count: usize,
    /// Statement lines still left to reconcile
    #[serde(rename = "st_lines_ids")]
    pub remaining_ids: Vec<RecordId>,
    #[serde(default)]
    pub notifications: Vec<ServerNotification>,
    #[serde(default)]
    pub statement_name: Option<String>,
}

/// Local handle of a proposed line within its reconciliation line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropositionId(pub u64);

impl fmt::Display for PropositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Create-panel field a validation error is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateField {
    Account,
    Label,
    Amount,
}

impl fmt::Display for CreateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CreateField::Account => "account",
            CreateField::Label => "label",
            CreateField::Amount => "amount",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while reconciling
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("Validation error on {field} of line {proposition:?}: {message}")]
    Validation {
        proposition: Option<PropositionId>,
        field: CreateField,
        message: String,
    },
    #[error("Counterparts already reconciled elsewhere: {ids:?}")]
    ConcurrentReconciliation { ids: Vec<RecordId> },
    #[error("Service error: {0}")]
    Service(String),
    #[error("Line not found: {0}")]
    LineNotFound(LineKey),
    #[error("Reconciliation model not found: {0}")]
    ModelNotFound(RecordId),
    #[error("Tax not found: {0}")]
    TaxNotFound(RecordId),
    #[error("Proposition not found: {0}")]
    PropositionNotFound(PropositionId),
    #[error("Match candidate not found: {0}")]
    CandidateNotFound(RecordId),
    #[error("Line is not balanced: remaining {balance}")]
    NotReconcilable { balance: BigDecimal },
    #[error("A submission is already pending for {0}")]
    SubmissionPending(LineKey),
    #[error("Invalid mode transition from {from} to {to}")]
    InvalidTransition { from: LineMode, to: LineMode },
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReconciliationError {
    /// Validation error attached to a create-panel field
    pub fn validation(
        proposition: Option<PropositionId>,
        field: CreateField,
        message: impl Into<String>,
    ) -> Self {
        ReconciliationError::Validation {
            proposition,
            field,
            message: message.into(),
        }
    }
}

/// Result type for reconciliation operations
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

fn id_or_false<S: Serializer>(id: &Option<RecordId>, serializer: S) -> Result<S::Ok, S::Error> {
    match id {
        Some(id) => serializer.serialize_i64(*id),
        None => serializer.serialize_bool(false),
    }
}
