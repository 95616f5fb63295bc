//! Startup validation of the configuration against the registered workflows

use crate::models::configuration::{Configuration, DEFAULT_OPERATION};
use crate::workflow::definitions::WorkflowDefinition;
use std::collections::HashSet;
use std::sync::Arc;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: String, message: String) {
        self.errors.push(ValidationError { field, message });
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Error messages, one line each, for reporting
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|error| format!("{}: {}", error.field, error.message))
            .collect()
    }
}

/// Configuration and registry validator
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Range checks on the configuration file values
    pub fn validate_configuration(config: &Configuration) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Err(errors) = config.validate() {
            for message in errors {
                // Messages lead with the offending key
                let field = message
                    .split_whitespace()
                    .next()
                    .unwrap_or("configuration")
                    .to_string();
                result.add_error(field, message);
            }
        }

        result
    }

    /// Cross-check the threshold tables against the gate operations of each workflow.
    /// Operations without their own confidence entry still work; they are reported so
    /// operators know the `general_operation` fallback applies.
    pub fn validate_definitions(
        config: &Configuration,
        definitions: &[Arc<dyn WorkflowDefinition>],
    ) -> ValidationResult {
        let mut result = ValidationResult::new();
        let thresholds = &config.thresholds;
        let mut seen = HashSet::new();

        for definition in definitions {
            let kind = definition.kind();
            if !seen.insert(kind) {
                result.add_error(
                    format!("workflows.{}", kind),
                    "Workflow registered more than once".to_string(),
                );
            }

            if definition.operation_types().is_empty() {
                result.add_error(
                    format!("workflows.{}.operation_types", kind),
                    "Workflow accepts no operation type".to_string(),
                );
            }

            for operation in definition.gate_operations() {
                if thresholds.is_regulatory(&operation) {
                    continue;
                }
                if !thresholds.has_confidence_threshold(&operation) {
                    result.add_warning(format!(
                        "{} operation '{}' has no confidence threshold, using '{}'",
                        kind, operation, DEFAULT_OPERATION
                    ));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::configuration::GateThresholds;
    use crate::services::business::Collaborators;
    use crate::workflow::definitions::builtin;

    #[test]
    fn test_default_configuration_is_valid() {
        let result = WorkflowValidator::validate_configuration(&Configuration::default());
        assert!(result.is_valid());
    }

    #[test]
    fn test_out_of_range_values_are_errors() {
        let config = Configuration {
            approval_timeout_seconds: 0,
            review_floor: 1.5,
            ..Configuration::default()
        };

        let result = WorkflowValidator::validate_configuration(&config);
        assert!(!result.is_valid());
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"approval_timeout_seconds"));
        assert!(fields.contains(&"review_floor"));
    }

    #[test]
    fn test_builtin_fallbacks_are_reported() {
        let config = Configuration::default();
        let definitions = builtin(&Collaborators::simulated(), &config.thresholds);

        let result = WorkflowValidator::validate_definitions(&config, &definitions);
        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("'aml_screening'")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("'risk_assessment'")));
        assert!(!result
            .warnings
            .iter()
            .any(|w| w.contains("'trading_execution'")));
        assert!(!result
            .warnings
            .iter()
            .any(|w| w.contains("'regulatory_reporting'")));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let config = Configuration::default();
        let mut definitions = builtin(&Collaborators::simulated(), &GateThresholds::default());
        definitions.push(definitions[0].clone());

        let result = WorkflowValidator::validate_definitions(&config, &definitions);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "workflows.compliance");
    }
}
