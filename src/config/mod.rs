//! Configuration system
//!
//! Loads ~/.config/mailsort/config.yaml with support for:
//! - The Maildir store and the boxes to sort
//! - Global and per-message-type mailbox actions
//! - Bounce escalation and forwarding settings
//! - The statistics database location

mod sorter_config;
pub mod validation;

pub use sorter_config::{
    ActionOverrides, ActionsConfig, DatabaseConfig, MaildirConfig, SorterConfig,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
