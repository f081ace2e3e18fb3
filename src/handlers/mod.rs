//! Per-type message handlers
//!
//! Every [`MessageType`] has one handler. A handler does the work for its
//! type (accounting a bounce, recording an unsubscribe, forwarding a human
//! reply) and reports a [`HandlerOutcome`]; the sorter then picks the mailbox
//! action from the outcome.

mod autoresponder;
mod human;
mod mail_server;
mod unsubscribe;

pub use autoresponder::AutoresponderHandler;
pub use human::{HumanHandler, MailSender};
pub use mail_server::MailServerHandler;
pub use unsubscribe::UnsubscribeHandler;

use crate::mail::{EmailAddress, Message, MessageType};
use crate::parser::FailureStatus;
use crate::stats::StatsAction;
use serde::Serialize;

/// What a handler did with a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandlerOutcome {
    /// Handled with nothing further to report
    Processed,
    /// Forwarded to a human
    Forwarded { to: EmailAddress },
    /// Bounce accounted against its recipient
    Bounce {
        recipient: EmailAddress,
        status: FailureStatus,
        stats: Vec<StatsAction>,
        disabled: bool,
    },
    /// Sender unsubscribed
    Unsubscribed { address: EmailAddress },
    /// Nothing could be done; the "unprocessed" action applies
    Unprocessed { reason: String },
}

impl HandlerOutcome {
    pub fn unprocessed(reason: impl Into<String>) -> Self {
        HandlerOutcome::Unprocessed {
            reason: reason.into(),
        }
    }

    pub fn is_processed(&self) -> bool {
        !matches!(self, HandlerOutcome::Unprocessed { .. })
    }

    /// Key into the configured action table
    pub fn key(&self) -> &'static str {
        if self.is_processed() {
            "processed"
        } else {
            "unprocessed"
        }
    }
}

/// Work done for one message type
pub trait MessageHandler: Send {
    /// Handle a message; errors leave the message untouched in the mailbox
    fn handle(&mut self, message: &Message) -> crate::Result<HandlerOutcome>;
}

/// One handler per message type
pub struct HandlerSet {
    pub human: Box<dyn MessageHandler>,
    pub mail_server: Box<dyn MessageHandler>,
    pub autoresponder: Box<dyn MessageHandler>,
    pub unsubscribe: Box<dyn MessageHandler>,
}

impl HandlerSet {
    pub fn get_mut(&mut self, message_type: MessageType) -> &mut dyn MessageHandler {
        match message_type {
            MessageType::Human => self.human.as_mut(),
            MessageType::MailServer => self.mail_server.as_mut(),
            MessageType::Autoresponder => self.autoresponder.as_mut(),
            MessageType::Unsubscribe => self.unsubscribe.as_mut(),
        }
    }
}
