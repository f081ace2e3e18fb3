//! Sorter configuration file

use crate::mail::MessageType;
use crate::mailbox::MailboxAction;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Maildir store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaildirConfig {
    /// Root directory holding INBOX and the other boxes
    #[serde(default = "default_maildir_path")]
    pub path: PathBuf,

    /// Remove deleted messages when a box is closed
    #[serde(default = "default_true")]
    pub expunge_on_close: bool,
}

fn default_maildir_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("Maildir");
    path
}

fn default_true() -> bool {
    true
}

impl Default for MaildirConfig {
    fn default() -> Self {
        Self {
            path: default_maildir_path(),
            expunge_on_close: true,
        }
    }
}

/// Mailbox action for each handler outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_processed_action")]
    pub processed: MailboxAction,

    #[serde(default)]
    pub unprocessed: MailboxAction,
}

fn default_processed_action() -> MailboxAction {
    MailboxAction::Read
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            processed: default_processed_action(),
            unprocessed: MailboxAction::None,
        }
    }
}

/// Per-type action overrides; unset outcomes use the global actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<MailboxAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unprocessed: Option<MailboxAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file for address and mailing statistics; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Complete sorter configuration
///
/// Represents `~/.config/mailsort/config.yaml`:
///
/// ```yaml
/// maildir:
///   path: /var/mail/postmaster
/// mailboxes: [INBOX]
/// message_batch_size: 100
/// actions:
///   processed: read
///   unprocessed: none
/// actions_per_type:
///   mail_server:
///     processed: "move:Bounces"
///   autoresponder:
///     processed: delete
/// max_temporary_failures: 5
/// unsubscribe_additional_address: unsubscribe@example.com
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SorterConfig {
    #[serde(default)]
    pub maildir: MaildirConfig,

    /// Boxes processed in order
    #[serde(default = "default_mailboxes")]
    pub mailboxes: Vec<String>,

    /// Dry run: classify, parse and count, but never touch the mailbox
    #[serde(default)]
    pub readonly: bool,

    #[serde(default = "default_batch_size")]
    pub message_batch_size: usize,

    #[serde(default)]
    pub actions: ActionsConfig,

    #[serde(default)]
    pub actions_per_type: BTreeMap<MessageType, ActionOverrides>,

    /// Temporary failures after which an address is disabled
    #[serde(default)]
    pub max_temporary_failures: Option<u32>,

    /// Address whose incoming mail is always treated as an unsubscribe request
    #[serde(default)]
    pub unsubscribe_additional_address: Option<String>,

    /// Where human replies are forwarded
    #[serde(default)]
    pub forward_to: Option<String>,

    #[serde(default)]
    pub max_forward_days: Option<u32>,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Default log filter when RUST_LOG is not set
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_mailboxes() -> Vec<String> {
    vec!["INBOX".to_string()]
}

fn default_batch_size() -> usize {
    100
}

impl SorterConfig {
    pub fn new() -> Self {
        Self {
            maildir: MaildirConfig::default(),
            mailboxes: default_mailboxes(),
            readonly: false,
            message_batch_size: default_batch_size(),
            actions: ActionsConfig::default(),
            actions_per_type: BTreeMap::new(),
            max_temporary_failures: None,
            unsubscribe_additional_address: None,
            forward_to: None,
            max_forward_days: None,
            database: DatabaseConfig::default(),
            log_level: None,
        }
    }

    /// Load configuration from the default path (~/.config/mailsort/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::MailSortError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading sorter configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            mailboxes = config.mailboxes.len(),
            batch_size = config.message_batch_size,
            readonly = config.readonly,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving sorter configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/mailsort/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("mailsort");
        path.push("config.yaml");
        path
    }

    /// Action for a message type and handler outcome (`processed`/`unprocessed`)
    pub fn action_for(&self, message_type: MessageType, processed: bool) -> &MailboxAction {
        let overrides = self.actions_per_type.get(&message_type);
        if processed {
            overrides
                .and_then(|o| o.processed.as_ref())
                .unwrap_or(&self.actions.processed)
        } else {
            overrides
                .and_then(|o| o.unprocessed.as_ref())
                .unwrap_or(&self.actions.unprocessed)
        }
    }
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: SorterConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.mailboxes, vec!["INBOX"]);
        assert_eq!(config.message_batch_size, 100);
        assert!(!config.readonly);
        assert_eq!(config.actions.processed, MailboxAction::Read);
        assert_eq!(config.actions.unprocessed, MailboxAction::None);
    }

    #[test]
    fn test_per_type_overrides_are_partial() {
        let yaml = r#"
actions:
  processed: read
  unprocessed: flag
actions_per_type:
  mail_server:
    processed: "move:Bounces"
  autoresponder:
    processed: delete
"#;
        let config: SorterConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            config.action_for(MessageType::MailServer, true),
            &MailboxAction::Move("Bounces".to_string())
        );
        assert_eq!(
            config.action_for(MessageType::MailServer, false),
            &MailboxAction::Flag
        );
        assert_eq!(
            config.action_for(MessageType::Autoresponder, true),
            &MailboxAction::Delete
        );
        assert_eq!(config.action_for(MessageType::Human, true), &MailboxAction::Read);
    }

    #[test]
    fn test_invalid_action_is_rejected() {
        let yaml = "actions:\n  processed: shred\n";
        assert!(serde_yaml::from_str::<SorterConfig>(yaml).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let mut config = SorterConfig::new();
        config.mailboxes = vec!["INBOX".to_string(), "Bounces".to_string()];
        config.max_temporary_failures = Some(3);
        config.actions_per_type.insert(
            MessageType::Unsubscribe,
            ActionOverrides {
                processed: Some(MailboxAction::Delete),
                unprocessed: None,
            },
        );
        config.save(&path).unwrap();

        let loaded = SorterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let result = SorterConfig::load("/nonexistent/mailsort.yaml");
        assert!(matches!(result, Err(crate::MailSortError::Config(_))));
    }

    #[test]
    fn test_default_path() {
        let path = SorterConfig::default_path();
        assert!(path.ends_with(".config/mailsort/config.yaml"));
    }
}
