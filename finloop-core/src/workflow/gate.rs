//! Confidence gate deciding whether an automated decision needs a human

use crate::models::configuration::{GateThresholds, DEFAULT_OPERATION, DEFAULT_VALUE_CATEGORY};
use crate::models::workflow::RiskLevel;
use serde::Serialize;
use std::fmt;

/// Why the gate routed a decision to a reviewer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    /// Caller forced a review
    Forced,
    /// Operation is in the regulatory set
    Regulatory,
    LowConfidence { confidence: f64, threshold: f64 },
    ValueExceeded { value: f64, threshold: f64 },
    HighRisk,
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewReason::Forced => f.write_str("Human review explicitly requested"),
            ReviewReason::Regulatory => f.write_str("Regulatory requirement for human review"),
            ReviewReason::LowConfidence {
                confidence,
                threshold,
            } => write!(
                f,
                "AI confidence {:.2} below required {:.2}",
                confidence, threshold
            ),
            ReviewReason::ValueExceeded { value, threshold } => write!(
                f,
                "Operation value {:.2} exceeds threshold {:.2}",
                value, threshold
            ),
            ReviewReason::HighRisk => f.write_str("High risk operation"),
        }
    }
}

/// Outcome of a gate evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub requires_review: bool,
    /// First rule that matched, when a review is required
    pub reason: Option<ReviewReason>,
}

/// Pure decision function over the injected threshold tables
#[derive(Debug, Clone, Default)]
pub struct ConfidenceGate {
    thresholds: GateThresholds,
}

impl ConfidenceGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Minimum confidence for an operation, falling back to `general_operation`.
    /// With no fallback entry at all every decision is reviewed.
    pub fn confidence_threshold(&self, operation_type: &str) -> f64 {
        self.thresholds
            .confidence
            .get(operation_type)
            .or_else(|| self.thresholds.confidence.get(DEFAULT_OPERATION))
            .copied()
            .unwrap_or(1.0)
    }

    /// Monetary limit of the operation's value category
    pub fn value_threshold(&self, operation_type: &str) -> f64 {
        let category = self
            .thresholds
            .value_category
            .get(operation_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_VALUE_CATEGORY);

        self.thresholds
            .value
            .get(category)
            .or_else(|| self.thresholds.value.get(DEFAULT_VALUE_CATEGORY))
            .copied()
            .unwrap_or(f64::INFINITY)
    }

    /// Evaluate the rules in order; the first match wins
    pub fn evaluate(
        &self,
        operation_type: &str,
        confidence: f64,
        value: f64,
        risk_level: RiskLevel,
        force: bool,
    ) -> GateDecision {
        let reason = if force {
            Some(ReviewReason::Forced)
        } else if self.thresholds.is_regulatory(operation_type) {
            Some(ReviewReason::Regulatory)
        } else {
            let confidence_threshold = self.confidence_threshold(operation_type);
            let value_threshold = self.value_threshold(operation_type);

            // NaN or out-of-range inputs never pass the gate
            if !(0.0..=1.0).contains(&confidence) || confidence < confidence_threshold {
                Some(ReviewReason::LowConfidence {
                    confidence,
                    threshold: confidence_threshold,
                })
            } else if !value.is_finite() || value > value_threshold {
                Some(ReviewReason::ValueExceeded {
                    value,
                    threshold: value_threshold,
                })
            } else if risk_level == RiskLevel::High {
                Some(ReviewReason::HighRisk)
            } else {
                None
            }
        };

        GateDecision {
            requires_review: reason.is_some(),
            reason,
        }
    }

    pub fn requires_human_review(
        &self,
        operation_type: &str,
        confidence: f64,
        value: f64,
        risk_level: RiskLevel,
        force: bool,
    ) -> bool {
        self.evaluate(operation_type, confidence, value, risk_level, force)
            .requires_review
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ConfidenceGate {
        ConfidenceGate::new(GateThresholds::default())
    }

    #[test]
    fn test_gate_rule_table() {
        let gate = gate();
        let cases = [
            // (operation, confidence, value, risk, force, expected)
            ("loan_approval", 0.80, 1_000.0, RiskLevel::Low, false, false),
            ("loan_approval", 0.74, 1_000.0, RiskLevel::Low, false, true),
            ("loan_approval", 0.80, 50_000.0, RiskLevel::Low, false, false),
            ("loan_approval", 0.80, 50_000.01, RiskLevel::Low, false, true),
            ("trading_execution", 0.99, 100.0, RiskLevel::High, false, true),
            ("trading_execution", 0.99, 100.0, RiskLevel::Medium, false, false),
            ("trading_execution", 0.99, 100.0, RiskLevel::Low, true, true),
            ("account_closure", 1.0, 0.0, RiskLevel::Low, false, true),
            ("suspicious_activity", 1.0, 0.0, RiskLevel::Low, false, true),
            ("general_operation", 0.65, 10_000.0, RiskLevel::Low, false, false),
            ("general_operation", 0.64, 100.0, RiskLevel::Low, false, true),
            ("unlisted_operation", 0.70, 10_001.0, RiskLevel::Low, false, true),
            ("large_withdrawal", 0.90, 5_001.0, RiskLevel::Low, false, true),
        ];

        for (operation, confidence, value, risk, force, expected) in cases {
            assert_eq!(
                gate.requires_human_review(operation, confidence, value, risk, force),
                expected,
                "{} conf={} value={} risk={:?} force={}",
                operation,
                confidence,
                value,
                risk,
                force
            );
        }
    }

    #[test]
    fn test_first_matching_reason_is_reported() {
        let gate = gate();

        let decision = gate.evaluate("account_closure", 0.1, 1e9, RiskLevel::High, true);
        assert_eq!(decision.reason, Some(ReviewReason::Forced));

        let decision = gate.evaluate("account_closure", 0.1, 1e9, RiskLevel::High, false);
        assert_eq!(decision.reason, Some(ReviewReason::Regulatory));

        let decision = gate.evaluate("kyc_verification", 0.5, 1e9, RiskLevel::High, false);
        assert_eq!(
            decision.reason,
            Some(ReviewReason::LowConfidence {
                confidence: 0.5,
                threshold: 0.70
            })
        );

        let decision = gate.evaluate("kyc_verification", 0.9, 20_000.0, RiskLevel::High, false);
        assert!(matches!(
            decision.reason,
            Some(ReviewReason::ValueExceeded { threshold, .. }) if threshold == 10_000.0
        ));

        let decision = gate.evaluate("kyc_verification", 0.9, 10.0, RiskLevel::Low, false);
        assert!(!decision.requires_review);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn test_thresholds_fall_back_for_unlisted_operations() {
        let gate = gate();
        assert_eq!(gate.confidence_threshold("aml_screening"), 0.65);
        assert_eq!(gate.value_threshold("aml_screening"), 10_000.0);
        assert_eq!(gate.value_threshold("trading_execution"), 25_000.0);

        let empty = ConfidenceGate::new(GateThresholds {
            confidence: Default::default(),
            value: Default::default(),
            value_category: Default::default(),
            regulatory: Default::default(),
        });
        assert_eq!(empty.confidence_threshold("anything"), 1.0);
        assert!(empty.requires_human_review("anything", 0.99, 0.0, RiskLevel::Low, false));
    }

    #[test]
    fn test_reason_display() {
        let reason = ReviewReason::LowConfidence {
            confidence: 0.5,
            threshold: 0.7,
        };
        assert_eq!(reason.to_string(), "AI confidence 0.50 below required 0.70");
    }
}
