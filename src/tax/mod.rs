//! Tax definitions and tax-inclusive/exclusive amount splitting

pub mod split;

pub use split::*;
