//! In-memory mailbox session
//!
//! Holds messages per box and records every action applied to them.
//! Useful for embedding the sorter with an external fetcher and for tests.

use super::{MailboxAction, MailboxError, MailboxSession, Result};
use crate::mail::{Message, Uid};
use std::collections::BTreeMap;

/// An action recorded by [`MemoryMailbox`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAction {
    pub mailbox: String,
    pub uid: Uid,
    pub action: MailboxAction,
}

/// Mailbox session backed by in-memory message lists
#[derive(Debug, Default)]
pub struct MemoryMailbox {
    boxes: BTreeMap<String, Vec<Message>>,
    selected: Option<String>,
    cursor: usize,
    applied: Vec<AppliedAction>,
    initialized: bool,
    closed_boxes: Vec<String>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a box with its messages
    pub fn with_box(mut self, name: impl Into<String>, messages: Vec<Message>) -> Self {
        self.boxes.insert(name.into(), messages);
        self
    }

    /// Every action applied so far, in order
    pub fn applied(&self) -> &[AppliedAction] {
        &self.applied
    }

    /// Boxes closed so far, in order
    pub fn closed_boxes(&self) -> &[String] {
        &self.closed_boxes
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl MailboxSession for MemoryMailbox {
    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn set_box_name(&mut self, name: &str) -> Result<()> {
        if !self.boxes.contains_key(name) {
            return Err(MailboxError::NoSuchBox(name.to_string()));
        }
        if self.selected.is_some() {
            self.close()?;
        }
        self.selected = Some(name.to_string());
        self.cursor = 0;
        Ok(())
    }

    fn fetch_batch(&mut self, size: usize) -> Result<Vec<Message>> {
        let name = self.selected.as_ref().ok_or(MailboxError::NotSelected)?;
        let messages = self
            .boxes
            .get(name)
            .ok_or_else(|| MailboxError::NoSuchBox(name.clone()))?;

        let end = (self.cursor + size).min(messages.len());
        let batch = messages[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(batch)
    }

    fn apply_action(&mut self, message: &Message, action: &MailboxAction) -> Result<()> {
        let name = self.selected.clone().ok_or(MailboxError::NotSelected)?;
        self.applied.push(AppliedAction {
            mailbox: name,
            uid: message.uid(),
            action: action.clone(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(name) = self.selected.take() {
            self.closed_boxes.push(name);
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.initialized = false;
        Ok(())
    }
}
