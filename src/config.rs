//! Session configuration

use serde::{Deserialize, Serialize};

use crate::types::{ReconciliationError, ReconciliationResult};

/// Tunables of a reconciliation session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Lines displayed per page
    pub page_size: usize,
    /// Match candidates fetched per request
    pub candidate_page_size: usize,
    /// Label of the open balance footer and suffix of the synthesized line
    pub open_balance_label: String,
    /// Label of the footer when created lines overshoot the statement amount
    pub write_off_label: String,
    /// Load one replacement line each time a line is reconciled
    pub keep_page_full: bool,
    /// Open the first line of a freshly loaded page
    pub activate_first_line: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            candidate_page_size: 15,
            open_balance_label: "Open balance".to_string(),
            write_off_label: "Create Write-off".to_string(),
            keep_page_full: true,
            activate_first_line: true,
        }
    }
}

impl ReconciliationConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> ReconciliationResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ReconciliationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReconciliationResult<()> {
        if self.page_size == 0 {
            return Err(ReconciliationError::Config(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.candidate_page_size == 0 {
            return Err(ReconciliationError::Config(
                "candidate_page_size must be at least 1".to_string(),
            ));
        }
        if self.open_balance_label.trim().is_empty() || self.write_off_label.trim().is_empty() {
            return Err(ReconciliationError::Config(
                "footer labels cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ReconciliationConfig::from_toml_str("page_size = 3\nkeep_page_full = false\n")
            .unwrap();

        assert_eq!(config.page_size, 3);
        assert!(!config.keep_page_full);
        assert_eq!(config.candidate_page_size, 15);
        assert_eq!(config.open_balance_label, "Open balance");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            ReconciliationConfig::from_toml_str("page_size = 0"),
            Err(ReconciliationError::Config(_))
        ));
        assert!(matches!(
            ReconciliationConfig::from_toml_str("page_size = \"ten\""),
            Err(ReconciliationError::Config(_))
        ));
    }
}
