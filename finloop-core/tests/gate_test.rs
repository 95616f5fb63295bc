//! Confidence gate decision table against the default thresholds

use finloop_core::models::configuration::GateThresholds;
use finloop_core::models::workflow::RiskLevel;
use finloop_core::workflow::gate::{ConfidenceGate, ReviewReason};

struct Case {
    operation: &'static str,
    confidence: f64,
    value: f64,
    risk: RiskLevel,
    force: bool,
    expected: Option<ReviewReason>,
}

fn case(
    operation: &'static str,
    confidence: f64,
    value: f64,
    risk: RiskLevel,
    force: bool,
    expected: Option<ReviewReason>,
) -> Case {
    Case {
        operation,
        confidence,
        value,
        risk,
        force,
        expected,
    }
}

#[test]
fn test_gate_decision_table() {
    let gate = ConfidenceGate::new(GateThresholds::default());

    let cases = vec![
        // Confident, small and low risk: no review
        case("general_operation", 0.9, 100.0, RiskLevel::Low, false, None),
        case("trading_execution", 0.80, 25_000.0, RiskLevel::Medium, false, None),
        // Forced wins over everything
        case("general_operation", 0.99, 0.0, RiskLevel::Low, true, Some(ReviewReason::Forced)),
        // Regulatory operations always go to a human
        case(
            "account_closure",
            0.99,
            0.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::Regulatory),
        ),
        case(
            "suspicious_activity",
            1.0,
            0.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::Regulatory),
        ),
        // Confidence below the operation threshold
        case(
            "high_value_transaction",
            0.94,
            0.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::LowConfidence {
                confidence: 0.94,
                threshold: 0.95,
            }),
        ),
        // Unlisted operations use the general_operation fallback
        case(
            "wire_transfer",
            0.6,
            0.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::LowConfidence {
                confidence: 0.6,
                threshold: 0.65,
            }),
        ),
        // Value above the category limit
        case(
            "large_withdrawal",
            0.9,
            5_001.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::ValueExceeded {
                value: 5_001.0,
                threshold: 5_000.0,
            }),
        ),
        case(
            "loan_approval",
            0.8,
            50_001.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::ValueExceeded {
                value: 50_001.0,
                threshold: 50_000.0,
            }),
        ),
        // Unmapped operations fall back to the transaction category
        case(
            "general_operation",
            0.9,
            10_001.0,
            RiskLevel::Low,
            false,
            Some(ReviewReason::ValueExceeded {
                value: 10_001.0,
                threshold: 10_000.0,
            }),
        ),
        // High risk alone
        case("kyc_verification", 0.95, 0.0, RiskLevel::High, false, Some(ReviewReason::HighRisk)),
    ];

    for c in cases {
        let decision = gate.evaluate(c.operation, c.confidence, c.value, c.risk, c.force);
        assert_eq!(
            decision.reason, c.expected,
            "operation {} confidence {} value {}",
            c.operation, c.confidence, c.value
        );
        assert_eq!(
            gate.requires_human_review(c.operation, c.confidence, c.value, c.risk, c.force),
            c.expected.is_some()
        );
    }
}

#[test]
fn test_customized_thresholds_are_honoured() {
    let mut thresholds = GateThresholds::default();
    thresholds.confidence.insert("kyc_verification".to_string(), 0.5);
    thresholds.regulatory.remove("account_closure");
    let gate = ConfidenceGate::new(thresholds);

    assert!(!gate.requires_human_review("kyc_verification", 0.55, 0.0, RiskLevel::Low, false));
    assert!(!gate.requires_human_review("account_closure", 0.95, 0.0, RiskLevel::Low, false));
}

#[test]
fn test_non_finite_and_out_of_range_inputs_require_review() {
    let gate = ConfidenceGate::new(GateThresholds::default());

    let cases = [
        // (operation, confidence, value)
        ("high_value_transaction", f64::NAN, 0.0),
        ("general_operation", 1.5, 0.0),
        ("general_operation", -0.1, 0.0),
        ("general_operation", f64::INFINITY, 0.0),
        ("large_withdrawal", 0.99, f64::NAN),
        ("large_withdrawal", 0.99, f64::INFINITY),
    ];

    for (operation, confidence, value) in cases {
        assert!(
            gate.requires_human_review(operation, confidence, value, RiskLevel::Low, false),
            "operation {} confidence {} value {}",
            operation,
            confidence,
            value
        );
    }

    let decision = gate.evaluate("trading_execution", f64::NAN, 0.0, RiskLevel::Low, false);
    assert!(matches!(
        decision.reason,
        Some(ReviewReason::LowConfidence { threshold, .. }) if threshold == 0.80
    ));
    let decision = gate.evaluate("trading_execution", 0.9, f64::NAN, RiskLevel::Low, false);
    assert!(matches!(decision.reason, Some(ReviewReason::ValueExceeded { .. })));
}
