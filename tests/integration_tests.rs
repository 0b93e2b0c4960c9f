//! Integration tests for reconciliation-core

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reconciliation_core::{
    utils::{MemoryLedgerService, ServiceCall, StrictCreateLineValidator},
    AmountType, AutoReconcileOutcome, CreateInput, Currency, FooterKind, LineData, LineKey,
    LineMode, MatchCandidate, ModelLine, Partner, ReconciliationConfig, ReconciliationError,
    ReconciliationModel, ReconciliationSession, RecordId, SessionScope, Severity, SubmissionKind,
    Tax,
};
use serde_json::json;
use std::str::FromStr;

const LINE_NAME: &str = "SAJ/2014/002 and SAJ/2014/003";

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

fn statement_line(
    id: RecordId,
    name: &str,
    amount: &str,
    partner_id: Option<RecordId>,
) -> LineData {
    LineData {
        key: LineKey::Statement(id),
        name: name.to_string(),
        date: NaiveDate::from_ymd_opt(2017, 1, 15),
        reference: None,
        amount: dec(amount),
        partner_id,
        partner_name: partner_id.map(|_| "Agrolait".to_string()),
        account_id: None,
        open_balance_account_id: Some(287),
        currency: Currency::default(),
    }
}

fn candidate(
    id: RecordId,
    name: &str,
    partner_id: RecordId,
    debit: &str,
    credit: &str,
) -> MatchCandidate {
    MatchCandidate {
        id,
        name: name.to_string(),
        reference: None,
        date: NaiveDate::from_ymd_opt(2017, 1, 1),
        account_id: 287,
        partner_id: Some(partner_id),
        debit: dec(debit),
        credit: dec(credit),
        already_paid: false,
    }
}

fn model_line(account_id: RecordId, label: &str, amount: &str, tax_id: RecordId) -> ModelLine {
    ModelLine {
        account_id,
        label: label.to_string(),
        amount_type: AmountType::Percentage,
        amount: dec(amount),
        tax_id: Some(tax_id),
        analytic_account_id: None,
    }
}

/// Statement 1 with lines 5 to 8, two open invoices of partner 8 and the ATOS model
fn demo_service() -> MemoryLedgerService {
    let service = MemoryLedgerService::new();
    service.add_statement_line(1, statement_line(5, LINE_NAME, "1175", Some(8)));
    service.add_statement_line(
        1,
        statement_line(6, "First 2000 € of SAJ/2014/001", "2000", None),
    );
    service.add_statement_line(1, statement_line(7, "SAJ/2014/004", "-100", Some(9)));
    service.add_statement_line(1, statement_line(8, "Bank fees", "-32.58", None));
    service.add_candidate(candidate(109, "INV/2017/0002", 8, "650", "0"));
    service.add_candidate(candidate(112, "INV/2017/0003", 8, "525", "0"));
    service.add_tax(Tax::excluded(6, "Tax 20.00%", dec("20"), Some(451)));
    service.add_tax(Tax::included(7, "Tax 10.00% include", dec("10"), Some(451)));
    service.add_model(ReconciliationModel {
        id: 4,
        name: "ATOS".to_string(),
        primary: model_line(285, "ATOS Banque", "97.5", 6),
        second_line: Some(model_line(286, "ATOS Frais", "2.5", 7)),
    });
    service
}

async fn demo_session(service: &MemoryLedgerService) -> ReconciliationSession<MemoryLedgerService> {
    let mut session = ReconciliationSession::new(
        service.clone(),
        SessionScope::Statements(vec![1]),
        ReconciliationConfig::default(),
    )
    .unwrap();
    session.start().await.unwrap();
    session
}

#[tokio::test]
async fn test_matching_two_invoices_reconciles_the_line() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    assert_eq!(session.line(key).unwrap().mode(), LineMode::Match);
    session.toggle_candidate(key, 109).unwrap();
    session.toggle_candidate(key, 112).unwrap();
    assert!(session.line(key).unwrap().is_reconcilable());
    session.reconcile_line(key).await.unwrap();

    let calls = service.reconciliation_calls();
    assert_eq!(calls.len(), 1);
    let (line_ids, payloads) = &calls[0];
    assert_eq!(line_ids, &vec![5]);
    let payload = &payloads[0];
    assert_eq!(payload.partner_id, Some(8));
    assert!(payload.payment_aml_ids.is_empty());
    assert!(payload.new_aml_dicts.is_empty());

    let counterparts: Vec<(RecordId, BigDecimal, BigDecimal, String)> = payload
        .counterpart_aml_dicts
        .iter()
        .map(|c| (c.counterpart_aml_id, c.debit.clone(), c.credit.clone(), c.name.clone()))
        .collect();
    assert_eq!(
        counterparts,
        vec![
            (109, dec("0"), dec("650"), "INV/2017/0002".to_string()),
            (112, dec("0"), dec("525"), "INV/2017/0003".to_string()),
        ]
    );

    let wire = serde_json::to_value(payload).unwrap();
    assert_eq!(wire["partner_id"], json!(8));
    assert_eq!(wire["counterpart_aml_dicts"][1]["counterpart_aml_id"], json!(112));
    assert_eq!(wire["payment_aml_ids"], json!([]));

    assert!(session.line(key).is_none());
    assert_eq!(session.reconciled_count(), 1);
    assert_eq!(session.remaining_count(), 3);
}

#[tokio::test]
async fn test_validate_without_propositions_books_the_whole_amount() {
    let service = demo_service();
    let mut session = demo_session(&service).await;

    session.validate_line(LineKey::Statement(5)).await.unwrap();

    let (_, payloads) = service.reconciliation_calls().pop().unwrap();
    let payload = &payloads[0];
    assert!(payload.counterpart_aml_dicts.is_empty());
    assert_eq!(payload.new_aml_dicts.len(), 1);
    let open_balance = &payload.new_aml_dicts[0];
    assert_eq!(open_balance.account_id, 287);
    assert_eq!(open_balance.debit, dec("0"));
    assert_eq!(open_balance.credit, dec("1175"));
    assert_eq!(open_balance.name, LINE_NAME);
}

#[tokio::test]
async fn test_validate_with_one_invoice_books_the_open_balance() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    session.toggle_candidate(key, 109).unwrap();
    let footer = session.line(key).unwrap().summary().footer.clone().unwrap();
    assert_eq!(footer.kind, FooterKind::OpenBalance);
    assert_eq!(footer.display, "-525.00 €");

    session.validate_line(key).await.unwrap();

    let (_, payloads) = service.reconciliation_calls().pop().unwrap();
    let payload = &payloads[0];
    assert_eq!(payload.counterpart_aml_dicts.len(), 1);
    let open_balance = &payload.new_aml_dicts[0];
    assert_eq!(open_balance.credit, dec("525"));
    assert_eq!(open_balance.name, format!("{LINE_NAME} : Open balance"));
    assert!(service.is_entry_reconciled(109));
    assert!(!service.is_entry_reconciled(112));
}

#[tokio::test]
async fn test_atos_model_produces_a_write_off() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    let created = session.apply_model(key, 4).unwrap();
    assert_eq!(created.len(), 2);

    let line = session.line(key).unwrap();
    assert_eq!(line.mode(), LineMode::Create);
    let amounts: Vec<BigDecimal> = line.propositions().iter().map(|p| p.signed_amount()).collect();
    assert_eq!(
        amounts,
        vec![dec("1145.63"), dec("229.13"), dec("26.70"), dec("2.67")]
    );
    let pre_tax: BigDecimal = line
        .propositions()
        .iter()
        .filter(|p| !p.is_tax_line())
        .map(|p| p.entered_amount.clone())
        .sum();
    assert_eq!(pre_tax, dec("1175"));

    assert_eq!(*line.balance(), dec("-229.13"));
    let footer = line.summary().footer.clone().unwrap();
    assert_eq!(footer.kind, FooterKind::WriteOff);
    assert_eq!(footer.label, "Create Write-off");
    assert_eq!(footer.display, "229.13 €");
    assert!(!line.is_reconcilable());

    assert!(matches!(
        session.reconcile_line(key).await,
        Err(ReconciliationError::NotReconcilable { .. })
    ));
    assert!(service.reconciliation_calls().is_empty());
}

#[tokio::test]
async fn test_auto_reconcile_removes_only_reconciled_lines() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    session.toggle_candidate(LineKey::Statement(5), 109).unwrap();

    let outcome: AutoReconcileOutcome = serde_json::from_value(json!({
        "num_already_reconciled_lines": 1,
        "st_lines_ids": [5, 6, 8],
        "notifications": [
            {"type": "info", "message": "1 transaction was automatically reconciled."},
            {
                "type": "warning",
                "message": "Some lines have no partner.",
                "details": {
                    "model": "account.bank.statement.line",
                    "ids": [6, 8],
                    "name": "Lines without partner"
                }
            }
        ],
        "statement_name": "BNK/2017/0001"
    }))
    .unwrap();
    service.script_auto_reconcile(outcome);

    assert_eq!(session.auto_reconcile().await.unwrap(), 1);

    let keys: Vec<LineKey> = session.lines().iter().map(|line| line.key()).collect();
    assert_eq!(
        keys,
        vec![LineKey::Statement(5), LineKey::Statement(6), LineKey::Statement(8)]
    );
    assert_eq!(session.line(LineKey::Statement(5)).unwrap().propositions().len(), 1);
    assert_eq!(session.remaining_count(), 3);
    assert_eq!(session.reconciled_count(), 1);
    assert_eq!(session.statement_name(), Some("BNK/2017/0001"));
    assert!(service.is_line_reconciled(7));

    let notifications = session.notifications().to_vec();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[1].severity, Severity::Warning);
    assert_eq!(notifications[1].link.as_ref().unwrap().ids, vec![6, 8]);

    assert!(session.dismiss_notification(notifications[0].id));
    assert!(!session.dismiss_notification(notifications[0].id));
    assert_eq!(session.notifications().len(), 1);
    assert_eq!(session.notifications()[0].id, notifications[1].id);
}

#[tokio::test]
async fn test_auto_reconcile_matches_exact_amounts() {
    let service = demo_service();
    service.add_candidate(candidate(120, "BILL/2017/0001", 9, "0", "100"));
    let mut session = demo_session(&service).await;

    assert_eq!(session.auto_reconcile().await.unwrap(), 1);
    assert!(session.line(LineKey::Statement(7)).is_none());
    assert_eq!(session.notifications()[0].severity, Severity::Info);
    assert!(service.is_entry_reconciled(120));
}

#[tokio::test]
async fn test_partner_change_clears_counterparts() {
    let service = demo_service();
    service.add_candidate(candidate(113, "INV/2017/0004", 9, "1175", "0"));
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    session.toggle_candidate(key, 109).unwrap();
    session.toggle_candidate(key, 112).unwrap();
    let manual = session
        .add_created_line(
            key,
            CreateInput {
                account_id: Some(290),
                amount: Some(dec("10")),
                ..Default::default()
            },
        )
        .unwrap();

    let camptocamp = Partner {
        id: 9,
        name: "Camptocamp".to_string(),
        receivable_account_id: Some(400),
        payable_account_id: Some(401),
    };
    session.change_partner(key, Some(camptocamp)).await.unwrap();

    let line = session.line(key).unwrap();
    assert_eq!(line.partner_id(), Some(9));
    assert_eq!(line.data().open_balance_account_id, Some(400));
    assert_eq!(line.propositions().len(), 1);
    assert_eq!(line.propositions()[0].id, manual);
    let candidates: Vec<RecordId> = line.match_candidates().iter().map(|c| c.id).collect();
    assert_eq!(candidates, vec![113]);
    assert_eq!(line.mode(), LineMode::Match);
    assert_eq!(service.candidate_queries().last().unwrap().partner_id, Some(9));
}

#[tokio::test]
async fn test_partner_without_candidates_falls_back_to_create() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    let unknown = Partner {
        id: 42,
        name: "Nobody".to_string(),
        receivable_account_id: None,
        payable_account_id: None,
    };
    session.change_partner(key, Some(unknown)).await.unwrap();

    let line = session.line(key).unwrap();
    assert_eq!(line.mode(), LineMode::Create);
    assert!(line.match_candidates().is_empty());
    assert_eq!(line.data().open_balance_account_id, Some(287));
}

#[tokio::test]
async fn test_concurrent_reconciliation_refreshes_candidates() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    session.toggle_candidate(key, 109).unwrap();
    session.toggle_candidate(key, 112).unwrap();
    session.switch_mode(key, LineMode::Create).unwrap();
    service.reconcile_elsewhere(112);

    assert_eq!(
        session.reconcile_line(key).await,
        Err(ReconciliationError::ConcurrentReconciliation { ids: vec![112] })
    );

    let line = session.line(key).unwrap();
    assert_eq!(line.mode(), LineMode::Match);
    assert_eq!(line.selected_ref_ids(), vec![109]);
    assert!(line.match_candidates().is_empty());
    assert!(!line.is_fetching());
    assert!(line.last_error().is_some());
    assert_eq!(*line.balance(), dec("525"));
    assert!(service.reconciliation_calls().is_empty());
}

#[tokio::test]
async fn test_double_submission_sends_one_request() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    let submission = session.prepare_submission(key, SubmissionKind::Validate).unwrap();
    assert_eq!(
        session.quick_reconcile(key, 4).await,
        Err(ReconciliationError::SubmissionPending(key))
    );
    assert_eq!(
        session.validate_line(key).await,
        Err(ReconciliationError::SubmissionPending(key))
    );
    assert!(service.reconciliation_calls().is_empty());

    let outcome = session.send(&submission).await;
    session.complete_submission(submission, outcome).await.unwrap();
    assert_eq!(service.reconciliation_calls().len(), 1);
}

#[tokio::test]
async fn test_missing_account_blocks_the_request() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(5);

    let created = session
        .add_created_line(key, CreateInput::default())
        .unwrap();
    assert!(matches!(
        session.reconcile_line(key).await,
        Err(ReconciliationError::Validation { .. })
    ));
    let error = session.line(key).unwrap().last_error().cloned().unwrap();
    assert_eq!(error.proposition, Some(created));
    assert!(service.reconciliation_calls().is_empty());

    session
        .edit_created_line(key, created, reconciliation_core::CreateEdit::Account(Some(285)))
        .unwrap();
    assert!(session.line(key).unwrap().last_error().is_none());
    session.reconcile_line(key).await.unwrap();
    assert_eq!(service.reconciliation_calls().len(), 1);
}

#[tokio::test]
async fn test_taxed_line_is_sent_with_its_tax_line() {
    let service = demo_service();
    let mut session = ReconciliationSession::with_validator(
        service.clone(),
        SessionScope::Statements(vec![1]),
        ReconciliationConfig::default(),
        Box::new(StrictCreateLineValidator),
    )
    .unwrap();
    session.start().await.unwrap();
    let key = LineKey::Statement(6);
    session.activate_line(key, false).await.unwrap();

    let base = session
        .add_created_line(
            key,
            CreateInput {
                account_id: Some(285),
                tax_id: Some(6),
                ..Default::default()
            },
        )
        .unwrap();
    let line = session.line(key).unwrap();
    assert_eq!(line.propositions().len(), 2);
    assert_eq!(line.proposition(base).unwrap().signed_amount(), dec("2000"));
    assert_eq!(*line.balance(), dec("-400"));
    session.validate_line(key).await.unwrap();

    let (_, payloads) = service.reconciliation_calls().pop().unwrap();
    let new_lines = &payloads[0].new_aml_dicts;
    assert_eq!(new_lines[0].tax_ids, Some(vec![6]));
    assert_eq!(new_lines[1].tax_line_id, Some(6));
    assert_eq!(new_lines[1].account_id, 451);
    assert!(session.line(key).is_none());
}

#[tokio::test]
async fn test_reconcile_balanced_lines_in_one_call() {
    let service = demo_service();
    service.add_candidate(candidate(130, "BILL/2017/0010", 9, "0", "100"));
    let mut session = demo_session(&service).await;

    session.toggle_candidate(LineKey::Statement(5), 109).unwrap();
    session.toggle_candidate(LineKey::Statement(5), 112).unwrap();
    session.activate_line(LineKey::Statement(7), false).await.unwrap();
    session.toggle_candidate(LineKey::Statement(7), 130).unwrap();
    session.activate_line(LineKey::Statement(8), false).await.unwrap();

    assert_eq!(session.reconcile_balanced_lines().await.unwrap(), 2);

    let calls = service.reconciliation_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, vec![5, 7]);
    let keys: Vec<LineKey> = session.lines().iter().map(|line| line.key()).collect();
    assert_eq!(keys, vec![LineKey::Statement(6), LineKey::Statement(8)]);
    assert_eq!(session.reconciled_count(), 2);
}

#[tokio::test]
async fn test_paging_and_replacement_keep_display_order() {
    let service = MemoryLedgerService::new();
    for id in 1..=5 {
        service.add_statement_line(3, statement_line(id, &format!("Line {id}"), "10", None));
    }
    let config = ReconciliationConfig::from_toml_str("page_size = 2\n").unwrap();
    let mut session =
        ReconciliationSession::new(service.clone(), SessionScope::Statements(vec![3]), config)
            .unwrap();
    session.start().await.unwrap();

    assert_eq!(session.lines().len(), 2);
    assert_eq!(session.load_more().await.unwrap(), 2);
    session.validate_line(LineKey::Statement(2)).await.unwrap();

    let keys: Vec<LineKey> = session.lines().iter().map(|line| line.key()).collect();
    assert_eq!(
        keys,
        vec![
            LineKey::Statement(1),
            LineKey::Statement(3),
            LineKey::Statement(4),
            LineKey::Statement(5)
        ]
    );
    assert!(!session.can_load_more());
    assert_eq!(session.remaining_count(), 4);
}

#[tokio::test]
async fn test_candidate_pages_and_search() {
    let service = demo_service();
    service.add_candidate(candidate(114, "INV/2017/0005", 8, "300", "0"));
    let config = ReconciliationConfig {
        candidate_page_size: 2,
        ..Default::default()
    };
    let mut session =
        ReconciliationSession::new(service.clone(), SessionScope::Statements(vec![1]), config)
            .unwrap();
    session.start().await.unwrap();
    let key = LineKey::Statement(5);

    assert_eq!(session.line(key).unwrap().match_candidates().len(), 2);
    assert!(session.line(key).unwrap().has_more_candidates());
    session.load_more_candidates(key).await.unwrap();
    assert_eq!(session.line(key).unwrap().match_candidates().len(), 3);
    assert!(!session.line(key).unwrap().has_more_candidates());

    session
        .search_candidates(key, Some("0005".to_string()))
        .await
        .unwrap();
    let line = session.line(key).unwrap();
    let found: Vec<RecordId> = line.match_candidates().iter().map(|c| c.id).collect();
    assert_eq!(found, vec![114]);
    assert_eq!(line.search(), Some("0005"));
    assert_eq!(line.mode(), LineMode::Match);
}

#[tokio::test]
async fn test_failed_candidate_fetch_is_kept_on_the_line() {
    let service = demo_service();
    let mut session = demo_session(&service).await;
    let key = LineKey::Statement(6);
    service.fail_next(
        ServiceCall::MatchCandidates,
        ReconciliationError::Service("timeout".to_string()),
    );

    assert!(session.activate_line(key, false).await.is_err());
    let line = session.line(key).unwrap();
    assert_eq!(line.mode(), LineMode::Inactive);
    assert!(!line.is_fetching());
    assert!(line.last_error().unwrap().message.contains("timeout"));
}

#[tokio::test]
async fn test_manual_bucket_reconciliation() {
    let service = MemoryLedgerService::new();
    service.add_bucket(LineData {
        key: LineKey::Bucket {
            account_id: 287,
            partner_id: Some(8),
        },
        name: "Agrolait".to_string(),
        date: None,
        reference: None,
        amount: dec("0"),
        partner_id: Some(8),
        partner_name: Some("Agrolait".to_string()),
        account_id: Some(287),
        open_balance_account_id: None,
        currency: Currency::default(),
    });
    service.add_candidate(candidate(200, "INV/2017/0020", 8, "100", "0"));
    service.add_candidate(candidate(201, "CUST.IN/2017/0003", 8, "0", "60"));

    let mut session = ReconciliationSession::new(
        service.clone(),
        SessionScope::Manual {
            account_ids: vec![287],
        },
        ReconciliationConfig::default(),
    )
    .unwrap();
    session.start().await.unwrap();
    let key = LineKey::Bucket {
        account_id: 287,
        partner_id: Some(8),
    };

    assert_eq!(session.line(key).unwrap().mode(), LineMode::Match);
    assert!(matches!(
        session.change_partner(key, None).await,
        Err(ReconciliationError::InvalidOperation(_))
    ));
    session.toggle_candidate(key, 200).unwrap();
    session.toggle_candidate(key, 201).unwrap();
    assert_eq!(*session.line(key).unwrap().balance(), dec("-40"));

    session.validate_line(key).await.unwrap();

    let calls = service.move_line_calls();
    assert_eq!(calls.len(), 1);
    let wire = serde_json::to_value(&calls[0]).unwrap();
    assert_eq!(wire[0]["type"], json!("partner"));
    assert_eq!(wire[0]["id"], json!(8));
    assert_eq!(wire[0]["mv_line_ids"], json!([200, 201]));
    assert_eq!(wire[0]["new_mv_line_dicts"], json!([]));
    assert_eq!(session.remaining_count(), 0);
}
