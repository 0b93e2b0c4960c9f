//! # Reconciliation Core
//!
//! Matching and balancing engine for bank statement reconciliation and
//! manual reconciliation of open ledger items.
//!
//! ## Features
//!
//! - **Match and create modes**: pick existing counterparts or create new journal items
//! - **Partial reconciliation**: oversized counterparts are capped at the remaining balance
//! - **Taxes**: price-included and price-excluded taxes split into base and tax lines
//! - **Reconciliation models**: one- or two-line "quick add" templates
//! - **Sessions**: paging, automatic reconciliation and notifications
//! - **Service abstraction**: the ledger lives behind the async `LedgerService` trait
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::utils::MemoryLedgerService;
//! use reconciliation_core::{ReconciliationConfig, ReconciliationSession, SessionScope};
//!
//! # async fn run() -> reconciliation_core::ReconciliationResult<()> {
//! let service = MemoryLedgerService::new();
//! let mut session = ReconciliationSession::new(
//!     service,
//!     SessionScope::Statements(vec![1]),
//!     ReconciliationConfig::default(),
//! )?;
//! session.start().await?;
//! assert_eq!(session.remaining_count(), 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod reconciliation;
pub mod tax;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::ReconciliationConfig;
pub use reconciliation::*;
pub use tax::*;
pub use traits::*;
pub use types::*;
