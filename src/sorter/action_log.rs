//! Record of the disposition chosen for every sorted message

use crate::logging::ACTION_TARGET;
use crate::mail::{MessageType, Uid};
use crate::mailbox::MailboxAction;
use serde::Serialize;

/// One line of the action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub mailbox: String,
    pub uid: Uid,
    pub message_type: MessageType,
    /// `processed` or `unprocessed`
    pub outcome: &'static str,
    pub action: MailboxAction,
    /// False when the action was suppressed by a read-only run
    pub applied: bool,
}

/// In-memory action log, mirrored to the `mailsort::actions` tracing target
#[derive(Debug, Default, Clone, Serialize)]
pub struct ActionLog {
    records: Vec<ActionRecord>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ActionRecord) {
        if record.applied {
            tracing::info!(
                target: ACTION_TARGET,
                mailbox = %record.mailbox,
                uid = record.uid,
                message_type = %record.message_type,
                outcome = record.outcome,
                action = %record.action,
                "Applied action"
            );
        } else {
            tracing::info!(
                target: ACTION_TARGET,
                mailbox = %record.mailbox,
                uid = record.uid,
                message_type = %record.message_type,
                outcome = record.outcome,
                action = %record.action,
                "Would apply action (read-only)"
            );
        }
        self.records.push(record);
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
