// ⚙️ Configuration - matching policy, auto-approve policy, retry policy
//
// Every section is #[serde(default)], so an empty TOML file is a valid config.

use crate::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub database: DatabaseConfig,
    pub matching: MatchPolicy,
    pub auto_approve: AutoApprovePolicy,
    pub retry: RetryPolicy,
}

impl ReconConfig {
    /// Parse TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ReconConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        self.retry.validate()
    }
}

// ============================================================================
// DATABASE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: "dealer_recon.db".to_string(),
        }
    }
}

// ============================================================================
// MATCH POLICY
// ============================================================================

/// Thresholds for the Dice match pass and the Jaro-Winkler preflight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    /// Minimum best score for high-confidence (default: 0.75)
    pub high_threshold: f64,

    /// Minimum best score for needs-review (default: 0.60)
    pub low_threshold: f64,

    /// Score that auto-accepts even when first tokens differ (default: 0.85)
    pub strict_ceiling: f64,

    /// Preflight rows below this Jaro-Winkler score are flagged (default: 0.85)
    pub preflight_threshold: f64,

    /// Require matching first tokens below the strict ceiling (default: true)
    pub require_first_token: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy {
            high_threshold: 0.75,
            low_threshold: 0.60,
            strict_ceiling: 0.85,
            preflight_threshold: 0.85,
            require_first_token: true,
        }
    }
}

impl MatchPolicy {
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.low_threshold
            && self.low_threshold <= self.high_threshold
            && self.high_threshold <= self.strict_ceiling
            && self.strict_ceiling <= 1.0;
        if !ordered {
            return Err(ReconError::Config(format!(
                "thresholds must satisfy 0 <= low ({}) <= high ({}) <= strict ({}) <= 1",
                self.low_threshold, self.high_threshold, self.strict_ceiling
            )));
        }
        if !(0.0..=1.0).contains(&self.preflight_threshold) {
            return Err(ReconError::Config(format!(
                "preflight_threshold must be within [0, 1], got {}",
                self.preflight_threshold
            )));
        }
        Ok(())
    }
}

// ============================================================================
// AUTO-APPROVE POLICY
// ============================================================================

/// Explicit replacement for programmatic confirmation of merges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApprovePolicy {
    /// Merge high-confidence matches without review (default: true)
    pub merge_high_confidence: bool,

    /// Adopt every suggested decision as the explicit decision (default: false)
    pub accept_suggestions: bool,

    /// Commit a discrepancy-free session directly (default: true)
    pub auto_commit_clean: bool,

    /// Pause before auto-committing a clean session (default: 1500ms)
    pub proceed_delay_ms: u64,
}

impl Default for AutoApprovePolicy {
    fn default() -> Self {
        AutoApprovePolicy {
            merge_high_confidence: true,
            accept_suggestions: false,
            auto_commit_clean: true,
            proceed_delay_ms: 1500,
        }
    }
}

impl AutoApprovePolicy {
    pub fn proceed_delay(&self) -> Duration {
        Duration::from_millis(self.proceed_delay_ms)
    }
}

// ============================================================================
// RETRY POLICY
// ============================================================================

/// Bounded exponential backoff for the commit step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based): initial * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ReconError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = ReconConfig::from_toml_str("").unwrap();
        assert_eq!(config, ReconConfig::default());
        assert_eq!(config.matching.high_threshold, 0.75);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ReconConfig::from_toml_str(
            "[matching]\nhigh_threshold = 0.80\n\n[auto_approve]\naccept_suggestions = true\n",
        )
        .unwrap();

        assert_eq!(config.matching.high_threshold, 0.80);
        assert_eq!(config.matching.low_threshold, 0.60);
        assert!(config.auto_approve.accept_suggestions);
        assert!(config.auto_approve.merge_high_confidence);
    }

    #[test]
    fn test_threshold_order_is_validated() {
        let result = ReconConfig::from_toml_str("[matching]\nlow_threshold = 0.9\n");
        assert!(matches!(result, Err(ReconError::Config(_))));

        let result = ReconConfig::from_toml_str("[matching]\nstrict_ceiling = 1.2\n");
        assert!(matches!(result, Err(ReconError::Config(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = ReconConfig::from_toml_str("[retry]\nmax_attempts = 0\n");
        assert!(matches!(result, Err(ReconError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        let result = ReconConfig::from_toml_str("[matching\n");
        assert!(matches!(result, Err(ReconError::Toml(_))));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(400));
        assert_eq!(retry.backoff(3), Duration::from_millis(800));
        assert_eq!(retry.backoff(10), Duration::from_millis(2000));
        assert_eq!(RetryPolicy::immediate(3).backoff(2), Duration::ZERO);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recon.toml");
        std::fs::write(&path, "[database]\npath = \"/tmp/x.db\"\n").unwrap();

        let config = ReconConfig::load(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/x.db");
    }
}
