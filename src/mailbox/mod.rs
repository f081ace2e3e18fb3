//! Mailbox sessions
//!
//! The sorter talks to a mailbox through [`MailboxSession`]: select a box,
//! pull batches of not-yet-processed messages, and apply a disposition
//! ([`MailboxAction`]) to each one.
//!
//! Two sessions ship with the crate:
//! - [`MaildirMailbox`] - a Maildir tree on disk
//! - [`MemoryMailbox`] - an in-memory mailbox that records every action

mod maildir;
mod memory;

pub use maildir::MaildirMailbox;
pub use memory::{AppliedAction, MemoryMailbox};

use crate::mail::{Message, Uid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mailbox session errors
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("cannot open mailbox store: {0}")]
    Connect(String),

    #[error("no such mailbox: {0}")]
    NoSuchBox(String),

    #[error("no mailbox selected")]
    NotSelected,

    #[error("message {0} is no longer in the mailbox")]
    MessageGone(Uid),

    #[error("invalid mailbox action: {0}")]
    InvalidAction(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mailbox operations
pub type Result<T> = std::result::Result<T, MailboxError>;

/// Disposition applied to a processed message
///
/// Written in configuration as `none`, `read`, `flag`, `delete` or
/// `move:<mailbox>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MailboxAction {
    /// Leave the message untouched
    #[default]
    None,
    /// Mark as seen
    Read,
    /// Flag for a human to look at
    Flag,
    /// Move into another mailbox
    Move(String),
    /// Delete (expunged when the box is closed)
    Delete,
}

impl MailboxAction {
    /// Whether applying this action changes the mailbox
    pub fn is_mutating(&self) -> bool {
        !matches!(self, MailboxAction::None)
    }

    /// Label used in logs and metrics (`move` without its target)
    pub fn kind(&self) -> &'static str {
        match self {
            MailboxAction::None => "none",
            MailboxAction::Read => "read",
            MailboxAction::Flag => "flag",
            MailboxAction::Move(_) => "move",
            MailboxAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MailboxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxAction::Move(target) => write!(f, "move:{}", target),
            other => f.write_str(other.kind()),
        }
    }
}

impl FromStr for MailboxAction {
    type Err = MailboxError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((verb, target)) = s.split_once(':') {
            if verb.trim().eq_ignore_ascii_case("move") {
                let target = target.trim();
                if target.is_empty() {
                    return Err(MailboxError::InvalidAction(s.to_string()));
                }
                return Ok(MailboxAction::Move(target.to_string()));
            }
            return Err(MailboxError::InvalidAction(s.to_string()));
        }

        match s.to_ascii_lowercase().as_str() {
            "none" | "leave" | "" => Ok(MailboxAction::None),
            "read" | "seen" => Ok(MailboxAction::Read),
            "flag" => Ok(MailboxAction::Flag),
            "delete" => Ok(MailboxAction::Delete),
            _ => Err(MailboxError::InvalidAction(s.to_string())),
        }
    }
}

impl TryFrom<String> for MailboxAction {
    type Error = MailboxError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MailboxAction> for String {
    fn from(action: MailboxAction) -> Self {
        action.to_string()
    }
}

/// A session against a mailbox store
///
/// `fetch_batch` is lazy and resumable: each call continues where the
/// previous one stopped, and an empty batch means the selected box is
/// exhausted. A UID is never yielded twice while the same box stays selected.
pub trait MailboxSession {
    /// Open the underlying store
    fn initialize(&mut self) -> Result<()>;

    /// Select the mailbox subsequent fetches read from
    fn set_box_name(&mut self, name: &str) -> Result<()>;

    /// Fetch up to `size` unprocessed messages
    fn fetch_batch(&mut self, size: usize) -> Result<Vec<Message>>;

    /// Apply a disposition to a previously fetched message
    fn apply_action(&mut self, message: &Message, action: &MailboxAction) -> Result<()>;

    /// Close the selected box, expunging deleted messages if configured
    fn close(&mut self) -> Result<()>;

    /// End the session
    fn end(&mut self) -> Result<()>;
}
