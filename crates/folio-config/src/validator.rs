//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, REJECTION_CATEGORIES};

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Convert the first error into a `ConfigError`.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(ConfigError::InvalidValue {
                field: err.path,
                message: err.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_escalation(config, &mut result);
        Self::validate_runner(config, &mut result);
        Self::validate_executor(config, &mut result);
        Self::validate_workflows(config, &mut result);

        Ok(result)
    }

    fn validate_escalation(config: &Config, result: &mut ValidationResult) {
        let escalation = &config.escalation;

        if escalation.threshold == 0 {
            result.add_error(ValidationError::new(
                "escalation.threshold",
                "threshold must be greater than 0",
            ));
        }

        if escalation.threshold > 10 {
            result.add_warning(ValidationWarning::new(
                "escalation.threshold",
                "threshold is very high (>10), failing steps will retry for a long time",
            ));
        }

        if escalation.default_target.trim().is_empty() {
            result.add_error(ValidationError::new(
                "escalation.default_target",
                "Default target cannot be empty",
            ));
        }

        for (category, target) in &escalation.targets {
            Self::check_category(result, "targets", category);
            if target.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("escalation.targets.{}", category),
                    "Target cannot be empty",
                ));
            }
        }

        if escalation.default_handler.trim().is_empty() {
            result.add_error(ValidationError::new(
                "escalation.default_handler",
                "Default handler cannot be empty",
            ));
        }

        for (category, handler) in &escalation.handlers {
            Self::check_category(result, "handlers", category);
            if handler.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("escalation.handlers.{}", category),
                    "Handler cannot be empty",
                ));
            }
        }

        for (category, max) in &escalation.max_retries {
            Self::check_category(result, "max_retries", category);
            if *max == 0 {
                result.add_error(ValidationError::new(
                    format!("escalation.max_retries.{}", category),
                    "max_retries must be greater than 0",
                ));
            }
        }

        if !escalation.notify_human {
            result.add_warning(ValidationWarning::new(
                "escalation.notify_human",
                "Escalations will be recorded without notification events",
            ));
        }
    }

    fn check_category(result: &mut ValidationResult, table: &str, category: &str) {
        if !REJECTION_CATEGORIES.contains(&category) {
            result.add_error(ValidationError::new(
                format!("escalation.{}.{}", table, category),
                format!(
                    "Unknown rejection category, expected one of: {}",
                    REJECTION_CATEGORIES.join(", ")
                ),
            ));
        }
    }

    fn validate_runner(config: &Config, result: &mut ValidationResult) {
        let category = config.runner.default_rejection_category.as_str();
        if !REJECTION_CATEGORIES.contains(&category) {
            result.add_error(ValidationError::new(
                "runner.default_rejection_category",
                format!(
                    "Unknown rejection category '{}', expected one of: {}",
                    category,
                    REJECTION_CATEGORIES.join(", ")
                ),
            ));
        }

        if config.runner.max_auto_steps == 0 {
            result.add_error(ValidationError::new(
                "runner.max_auto_steps",
                "max_auto_steps must be greater than 0",
            ));
        }
    }

    fn validate_executor(config: &Config, result: &mut ValidationResult) {
        if config.executor.shell.trim().is_empty() {
            result.add_error(ValidationError::new(
                "executor.shell",
                "Shell cannot be empty",
            ));
        }

        if config.executor.timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "executor.timeout_secs",
                "timeout_secs must be greater than 0",
            ));
        }

        if let Some(dir) = config.executor.resolved_working_dir() {
            if !dir.is_dir() {
                result.add_warning(ValidationWarning::new(
                    "executor.working_dir",
                    format!("Working directory does not exist: {}", dir.display()),
                ));
            }
        }
    }

    fn validate_workflows(config: &Config, result: &mut ValidationResult) {
        if let Some(dir) = config.workflows.resolved_definitions_dir() {
            if !dir.is_dir() {
                result.add_warning(ValidationWarning::new(
                    "workflows.definitions_dir",
                    format!("Definitions directory does not exist: {}", dir.display()),
                ));
            }
        }
    }
}
