//! Reconciliation engine: lines, propositions, models and sessions

pub mod line;
pub mod matcher;
pub mod model;
pub mod payload;
pub mod proposition;
pub mod session;

pub use line::*;
pub use matcher::MatchLoader;
pub use model::ReconciliationModelExpander;
pub use payload::LinePayload;
pub use proposition::*;
pub use session::*;
