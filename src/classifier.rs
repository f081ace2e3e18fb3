//! Message classification
//!
//! Assigns exactly one [`MessageType`] to every message. Rules are checked in
//! priority order and the first match wins:
//!
//! 1. delivery status reports and other bounces -> `MailServer`
//! 2. unsubscribe requests -> `Unsubscribe`
//! 3. vacation / out-of-office replies -> `Autoresponder`
//! 4. everything else -> `Human`
//!
//! Bounce detection comes first so that a bounce of an unsubscribe
//! confirmation is never mistaken for a real unsubscribe request.

use crate::mail::{EmailAddress, Message, MessageType};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BOUNCE_SUBJECT: Regex = Regex::new(
        r"(?i)(undeliver(ed|able)|delivery (status notification|failure|has failed)|mail delivery (failed|failure|subsystem)|returned mail|failure notice|delivery incomplete|non-?delivery|message not delivered|could not be delivered)"
    )
    .unwrap();
    static ref UNSUBSCRIBE_SUBJECT: Regex =
        Regex::new(r"(?i)^\s*(re:\s*)?(unsubscribe|odhlásit|remove me|abbestellen)\b").unwrap();
    static ref AUTOREPLY_SUBJECT: Regex = Regex::new(
        r"(?i)^\s*(auto(matic)?[ -]?(reply|response|antwort)|out of (the )?office|abwesenheitsnotiz|vacation reply|away from (the )?office|automatická odpověď)"
    )
    .unwrap();
}

/// Local parts that only automated mail systems send from
const DAEMON_SENDERS: &[&str] = &["mailer-daemon", "postmaster", "mail-daemon"];

/// Rule-based message classifier
#[derive(Debug, Clone, Default)]
pub struct MessageClassifier {
    unsubscribe_address: Option<EmailAddress>,
}

impl MessageClassifier {
    /// Create a classifier
    ///
    /// `unsubscribe_address` is an extra address (for example
    /// `unsubscribe@lists.example.com`); any message delivered to it is an
    /// unsubscribe request.
    pub fn new(unsubscribe_address: Option<EmailAddress>) -> Self {
        Self {
            unsubscribe_address,
        }
    }

    /// Classify a message
    pub fn classify(&self, message: &Message) -> MessageType {
        let message_type = if is_mail_server(message) {
            MessageType::MailServer
        } else if self.is_unsubscribe(message) {
            MessageType::Unsubscribe
        } else if is_autoresponder(message) {
            MessageType::Autoresponder
        } else {
            MessageType::Human
        };

        tracing::trace!(uid = message.uid(), %message_type, "Classified message");
        message_type
    }

    fn is_unsubscribe(&self, message: &Message) -> bool {
        if let Some(address) = &self.unsubscribe_address {
            if message.recipients().iter().any(|r| r == address) {
                return true;
            }
        }

        if UNSUBSCRIBE_SUBJECT.is_match(message.subject()) {
            return true;
        }

        let body = message.body_text();
        let first_line = body.lines().map(str::trim).find(|l| !l.is_empty());
        matches!(first_line, Some(line) if line.eq_ignore_ascii_case("unsubscribe"))
    }
}

fn is_mail_server(message: &Message) -> bool {
    if let Some(ct) = message.header("Content-Type") {
        let ct = ct.to_ascii_lowercase();
        if ct.starts_with("multipart/report") {
            return true;
        }
    }

    if let Some(auto) = message.header("Auto-Submitted") {
        if auto.trim().to_ascii_lowercase().starts_with("auto-generated") {
            return true;
        }
    }

    if message.header("X-Failed-Recipients").is_some() {
        return true;
    }

    if let Some(sender) = message.sender() {
        let local = sender.local_part();
        if DAEMON_SENDERS.iter().any(|d| local.eq_ignore_ascii_case(d)) {
            return true;
        }
    } else if message
        .header("From")
        .map(|f| f.to_ascii_lowercase().contains("mailer-daemon"))
        .unwrap_or(false)
    {
        return true;
    }

    let null_return_path = message
        .header("Return-Path")
        .map(|rp| rp.trim() == "<>")
        .unwrap_or(false);

    null_return_path && BOUNCE_SUBJECT.is_match(message.subject())
}

fn is_autoresponder(message: &Message) -> bool {
    if let Some(auto) = message.header("Auto-Submitted") {
        if auto.trim().to_ascii_lowercase().starts_with("auto-replied") {
            return true;
        }
    }

    if ["X-Autoreply", "X-Autorespond", "X-Vacation"]
        .iter()
        .any(|h| message.header(h).is_some())
    {
        return true;
    }

    if let Some(precedence) = message.header("Precedence") {
        let precedence = precedence.trim().to_ascii_lowercase();
        if precedence == "auto_reply" || precedence == "auto-reply" {
            return true;
        }
    }

    AUTOREPLY_SUBJECT.is_match(message.subject())
}
