//! Configuration validation
//!
//! Collects every problem in a [`SorterConfig`] instead of stopping at the
//! first one:
//! - At least one mailbox, none blank
//! - Positive batch size
//! - Move actions name a target box
//! - Forward and unsubscribe addresses look like addresses

use super::sorter_config::SorterConfig;
use crate::mail::EmailAddress;
use crate::mailbox::MailboxAction;
use crate::MailSortError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a sorter configuration
pub fn validate_config(config: &SorterConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.mailboxes.is_empty() {
        errors.push(ValidationError::new(
            "mailboxes",
            "At least one mailbox must be listed",
        ));
    }
    if config.mailboxes.iter().any(|name| name.trim().is_empty()) {
        errors.push(ValidationError::new("mailboxes", "Mailbox names cannot be blank"));
    }

    if config.message_batch_size == 0 {
        errors.push(ValidationError::new(
            "message_batch_size",
            "Batch size must be greater than 0",
        ));
    }

    check_action(&mut errors, "actions.processed", &config.actions.processed);
    check_action(&mut errors, "actions.unprocessed", &config.actions.unprocessed);
    for (message_type, overrides) in &config.actions_per_type {
        if let Some(action) = &overrides.processed {
            check_action(
                &mut errors,
                &format!("actions_per_type.{}.processed", message_type),
                action,
            );
        }
        if let Some(action) = &overrides.unprocessed {
            check_action(
                &mut errors,
                &format!("actions_per_type.{}.unprocessed", message_type),
                action,
            );
        }
    }

    if let Some(ref forward_to) = config.forward_to {
        check_address(&mut errors, "forward_to", forward_to);
    }
    if let Some(ref address) = config.unsubscribe_additional_address {
        check_address(&mut errors, "unsubscribe_additional_address", address);
    }

    if config.max_temporary_failures == Some(0) {
        errors.push(ValidationError::new(
            "max_temporary_failures",
            "Must be greater than 0 (omit it to never disable on temporary failures)",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_action(errors: &mut Vec<ValidationError>, field: &str, action: &MailboxAction) {
    if let MailboxAction::Move(target) = action {
        if target.trim().is_empty() {
            errors.push(ValidationError::new(field, "Move action needs a target mailbox"));
        }
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if !value.contains('@') || value.parse::<EmailAddress>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("Invalid email address: {}", value),
        ));
    }
}

/// Validate configuration and return a Result
pub fn validate_config_result(config: &SorterConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        MailSortError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
