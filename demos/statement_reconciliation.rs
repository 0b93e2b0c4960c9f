//! Bank statement reconciliation example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use reconciliation_core::utils::MemoryLedgerService;
use reconciliation_core::{
    AmountType, Currency, LineData, LineKey, MatchCandidate, ModelLine, ReconciliationConfig,
    ReconciliationModel, ReconciliationSession, SessionScope, SymbolPosition, Tax,
};
use std::str::FromStr;

fn seed(service: &MemoryLedgerService) -> Result<(), Box<dyn std::error::Error>> {
    let usd = Currency::new("USD", "$", 2).with_position(SymbolPosition::Before);
    let lines = [
        (5, "SAJ/2014/002 and SAJ/2014/003", "1175", Some(8)),
        (6, "ATOS card payment", "1175", None),
        (7, "Bank fees", "-32.58", None),
    ];
    for (id, name, amount, partner_id) in lines {
        service.add_statement_line(
            1,
            LineData {
                key: LineKey::Statement(id),
                name: name.to_string(),
                date: NaiveDate::from_ymd_opt(2017, 1, 15),
                reference: None,
                amount: BigDecimal::from_str(amount)?,
                partner_id,
                partner_name: partner_id.map(|_| "Agrolait".to_string()),
                account_id: None,
                open_balance_account_id: Some(287),
                currency: usd.clone(),
            },
        );
    }

    for (id, name, debit) in [(109, "INV/2017/0002", "650"), (112, "INV/2017/0003", "525")] {
        service.add_candidate(MatchCandidate {
            id,
            name: name.to_string(),
            reference: None,
            date: NaiveDate::from_ymd_opt(2017, 1, 1),
            account_id: 287,
            partner_id: Some(8),
            debit: BigDecimal::from_str(debit)?,
            credit: BigDecimal::from(0),
            already_paid: false,
        });
    }

    service.add_tax(Tax::excluded(6, "Tax 20.00%", BigDecimal::from(20), Some(451)));
    service.add_tax(Tax::included(7, "Tax 10.00% include", BigDecimal::from(10), Some(451)));
    service.add_model(ReconciliationModel {
        id: 4,
        name: "ATOS".to_string(),
        primary: ModelLine {
            account_id: 285,
            label: "ATOS Banque".to_string(),
            amount_type: AmountType::Percentage,
            amount: BigDecimal::from_str("97.5")?,
            tax_id: Some(6),
            analytic_account_id: None,
        },
        second_line: Some(ModelLine {
            account_id: 286,
            label: "ATOS Frais".to_string(),
            amount_type: AmountType::Percentage,
            amount: BigDecimal::from_str("2.5")?,
            tax_id: Some(7),
            analytic_account_id: None,
        }),
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reconciliation_core=debug".into()),
        )
        .init();

    println!("🏦 Reconciliation Core - Statement Reconciliation Example\n");

    let service = MemoryLedgerService::new();
    seed(&service)?;

    let config = ReconciliationConfig::from_toml_str("page_size = 2\n")?;
    let mut session =
        ReconciliationSession::new(service.clone(), SessionScope::Statements(vec![1]), config)?;
    session.start().await?;
    println!(
        "📄 {} lines to reconcile, {} displayed",
        session.remaining_count(),
        session.lines().len()
    );

    // 1. Match two invoices against the first line
    let first = LineKey::Statement(5);
    for candidate in [109, 112] {
        session.toggle_candidate(first, candidate)?;
    }
    if let Some(line) = session.line(first) {
        let balance = line.currency().format(line.balance());
        println!("\n🔗 {} matched, balance {}", line.name(), balance);
    }
    session.reconcile_line(first).await?;
    println!("  ✓ reconciled, replacement loaded: {}", session.lines().len());

    // 2. Expand the ATOS model on the card payment
    let atos = LineKey::Statement(6);
    session.activate_line(atos, false).await?;
    session.apply_model(atos, 4)?;
    if let Some(line) = session.line(atos) {
        println!("\n🧾 ATOS model on {}:", line.name());
        for proposition in line.propositions() {
            println!(
                "  {:<20} {:>10}",
                proposition.label,
                line.currency().format(&proposition.signed_amount())
            );
        }
        if let Some(footer) = &line.summary().footer {
            println!("  {}: {}", footer.label, footer.display);
        }
    }
    session.validate_line(atos).await?;
    println!("  ✓ validated with a write-off");

    // 3. Let the service handle the rest
    let removed = session.auto_reconcile().await?;
    println!("\n🤖 Automatic reconciliation removed {removed} lines");
    for notification in session.notifications() {
        println!("  [{:?}] {}", notification.severity, notification.message);
    }

    println!(
        "\n📊 {} reconciled, {} remaining",
        session.reconciled_count(),
        session.remaining_count()
    );
    for (line_ids, payloads) in service.reconciliation_calls() {
        println!("  {:?} -> {}", line_ids, serde_json::to_string(&payloads)?);
    }

    Ok(())
}
