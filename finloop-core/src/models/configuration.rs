//! Configuration data structures

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Logging level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "info")]
    #[default]
    Info,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "trace")]
    Trace,
}

/// Operation type used when a workflow dispatches to an unlisted operation
pub const DEFAULT_OPERATION: &str = "general_operation";

/// Value category used when an operation has no explicit mapping
pub const DEFAULT_VALUE_CATEGORY: &str = "transaction";

/// Per-operation thresholds consulted by the confidence gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateThresholds {
    /// Minimum confidence per operation type, in [0, 1]
    pub confidence: BTreeMap<String, f64>,
    /// Monetary limit per value category
    pub value: BTreeMap<String, f64>,
    /// Operation type to value category
    pub value_category: BTreeMap<String, String>,
    /// Operations that always require a human regardless of confidence
    pub regulatory: BTreeSet<String>,
}

impl Default for GateThresholds {
    fn default() -> Self {
        let confidence = [
            ("high_value_transaction", 0.95),
            ("account_closure", 0.90),
            ("large_withdrawal", 0.85),
            ("trading_execution", 0.80),
            ("loan_approval", 0.75),
            ("kyc_verification", 0.70),
            ("customer_intent", 0.70),
            (DEFAULT_OPERATION, 0.65),
        ];
        let value = [
            ("transaction", 10_000.0),
            ("withdrawal", 5_000.0),
            ("trading", 25_000.0),
            ("loan", 50_000.0),
        ];
        let value_category = [
            ("high_value_transaction", "transaction"),
            ("large_withdrawal", "withdrawal"),
            ("trading_execution", "trading"),
            ("loan_approval", "loan"),
        ];
        let regulatory = [
            "account_closure",
            "suspicious_activity",
            "regulatory_reporting",
            "large_cash_transaction",
        ];

        Self {
            confidence: confidence
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            value: value.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            value_category: value_category
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            regulatory: regulatory.into_iter().map(str::to_string).collect(),
        }
    }
}

impl GateThresholds {
    /// Whether the operation has its own confidence entry
    pub fn has_confidence_threshold(&self, operation_type: &str) -> bool {
        self.confidence.contains_key(operation_type)
    }

    pub fn is_regulatory(&self, operation_type: &str) -> bool {
        self.regulatory.contains(operation_type)
    }

    /// Whether the operation is known to the table at all
    pub fn recognizes(&self, operation_type: &str) -> bool {
        self.has_confidence_threshold(operation_type) || self.is_regulatory(operation_type)
    }

    fn validate_into(&self, errors: &mut Vec<String>) {
        if !self.confidence.contains_key(DEFAULT_OPERATION) {
            errors.push(format!(
                "thresholds.confidence must define the fallback '{}'",
                DEFAULT_OPERATION
            ));
        }
        if !self.value.contains_key(DEFAULT_VALUE_CATEGORY) {
            errors.push(format!(
                "thresholds.value must define the fallback category '{}'",
                DEFAULT_VALUE_CATEGORY
            ));
        }

        for (operation, threshold) in &self.confidence {
            if !(0.0..=1.0).contains(threshold) {
                errors.push(format!(
                    "thresholds.confidence.{} must be within 0.0..=1.0 (got {})",
                    operation, threshold
                ));
            }
        }

        for (category, limit) in &self.value {
            if !limit.is_finite() || *limit <= 0.0 {
                errors.push(format!(
                    "thresholds.value.{} must be a positive amount (got {})",
                    category, limit
                ));
            }
        }

        for (operation, category) in &self.value_category {
            if !self.value.contains_key(category) {
                errors.push(format!(
                    "thresholds.value_category.{} maps to unknown category '{}'",
                    operation, category
                ));
            }
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Logging verbosity level
    pub log_level: LogLevel,
    /// How long a review checkpoint waits for a human signal
    pub approval_timeout_seconds: u64,
    /// Decisions below this confidence are recorded as needing downstream review
    pub review_floor: f64,
    /// JSON decision store location; in-memory store when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_store_path: Option<PathBuf>,
    /// Confidence gate tables
    pub thresholds: GateThresholds,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            approval_timeout_seconds: 1800, // 30 minutes
            review_floor: 0.7,
            audit_store_path: None,
            thresholds: GateThresholds::default(),
        }
    }
}

impl Configuration {
    /// Load configuration from a TOML (or YAML, by extension) file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            // Return default configuration if file doesn't exist
            return Ok(Configuration::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML configuration {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML configuration {}", path.display()))?,
        };

        Ok(config)
    }

    /// Save configuration to file as TOML
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration {}", path.display()))?;
        Ok(())
    }

    /// Get the XDG config directory path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("finloop").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.approval_timeout_seconds == 0 {
            errors.push("approval_timeout_seconds must be at least 1".to_string());
        }
        if self.approval_timeout_seconds > 86_400 {
            errors.push("approval_timeout_seconds cannot exceed 86400 (24 hours)".to_string());
        }

        if !(0.0..=1.0).contains(&self.review_floor) {
            errors.push("review_floor must be within 0.0..=1.0".to_string());
        }

        self.thresholds.validate_into(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn approval_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.approval_timeout_seconds)
    }
}
