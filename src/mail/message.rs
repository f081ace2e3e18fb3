//! Mailbox messages
//!
//! A [`Message`] is one entry fetched from a mailbox session: a UID plus the
//! raw RFC 5322 bytes. Header lookups work on the unfolded header block,
//! with RFC 2047 encoded words in `Subject`, `From`, `To` and `Cc` decoded by
//! `mail-parser`. MIME structure is parsed on demand.

use super::EmailAddress;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Mailbox-unique message identifier
pub type Uid = u32;

/// The category a message is sorted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A reply written by a person
    Human,
    /// A delivery status notification or other bounce
    MailServer,
    /// Vacation and out-of-office noise
    Autoresponder,
    /// A request to stop receiving mailings
    Unsubscribe,
}

impl MessageType {
    /// All message types, in report order
    pub const ALL: [MessageType; 4] = [
        MessageType::Human,
        MessageType::MailServer,
        MessageType::Autoresponder,
        MessageType::Unsubscribe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Human => "human",
            MessageType::MailServer => "mail_server",
            MessageType::Autoresponder => "autoresponder",
            MessageType::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "human" => Ok(MessageType::Human),
            "mail_server" | "mailserver" => Ok(MessageType::MailServer),
            "autoresponder" => Ok(MessageType::Autoresponder),
            "unsubscribe" => Ok(MessageType::Unsubscribe),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

/// A message fetched from a mailbox
#[derive(Debug, Clone)]
pub struct Message {
    uid: Uid,
    raw: Vec<u8>,
    headers: Vec<(String, String)>,
    received_at: DateTime<Utc>,
}

impl Message {
    /// Create a message from its raw RFC 5322 bytes
    pub fn new(uid: Uid, raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let mut headers = parse_header_block(&raw);
        if headers.iter().any(|(_, value)| value.contains("=?")) {
            if let Some(parsed) = message_parser().parse(&raw) {
                decode_headers(&mut headers, &parsed);
            }
        }
        let received_at = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Date"))
            .and_then(|(_, value)| DateTime::parse_from_rfc2822(value).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            uid,
            raw,
            headers,
            received_at,
        }
    }

    /// Override the time the mailbox received this message
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// When the message arrived (mailbox internal date, else the Date header)
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated header
    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or_default()
    }

    /// Lowercased `type/subtype` of the top-level Content-Type
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type").map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Sender address from the From header
    pub fn sender(&self) -> Option<EmailAddress> {
        self.header("From").and_then(EmailAddress::extract)
    }

    /// Addresses the message was delivered to (To, Cc, Delivered-To, X-Original-To)
    pub fn recipients(&self) -> Vec<EmailAddress> {
        ["To", "Cc", "Delivered-To", "X-Original-To"]
            .into_iter()
            .flat_map(move |name| self.headers_named(name))
            .flat_map(EmailAddress::extract_all)
            .collect()
    }

    /// Parse the MIME structure
    pub fn parsed(&self) -> Option<mail_parser::Message<'_>> {
        message_parser().parse(&self.raw)
    }

    /// Decoded text of the first body part, falling back to the raw body
    pub fn body_text(&self) -> String {
        if let Some(text) = self
            .parsed()
            .and_then(|parsed| parsed.body_text(0).map(|t| t.into_owned()))
        {
            return text;
        }
        String::from_utf8_lossy(raw_body(&self.raw)).into_owned()
    }
}

fn message_parser() -> &'static MessageParser {
    static PARSER: OnceLock<MessageParser> = OnceLock::new();
    PARSER.get_or_init(MessageParser::default)
}

/// Replace encoded-word values with the decoded text `mail-parser` produced
fn decode_headers(headers: &mut [(String, String)], parsed: &mail_parser::Message<'_>) {
    for (name, value) in headers.iter_mut() {
        if !value.contains("=?") {
            continue;
        }
        let decoded = match name.to_ascii_lowercase().as_str() {
            "subject" => parsed.subject().map(str::to_string),
            "from" => parsed.from().map(render_address),
            "to" => parsed.to().map(render_address),
            "cc" => parsed.cc().map(render_address),
            _ => None,
        };
        if let Some(decoded) = decoded.filter(|d| !d.is_empty()) {
            *value = decoded;
        }
    }
}

fn render_address<'x>(address: &'x mail_parser::Address<'x>) -> String {
    address
        .iter()
        .filter_map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(email)) => Some(format!("\"{}\" <{}>", name.replace(',', " "), email)),
            (None, Some(email)) => Some(email.to_string()),
            (Some(name), None) => Some(name.to_string()),
            (None, None) => None,
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// The bytes after the blank line separating headers from body
fn raw_body(raw: &[u8]) -> &[u8] {
    let header_len = header_block_len(raw);
    &raw[header_len.min(raw.len())..]
}

fn header_block_len(raw: &[u8]) -> usize {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => raw.len(),
    }
}

/// Split an unfolded header block into `(name, value)` pairs
pub(crate) fn parse_header_block(raw: &[u8]) -> Vec<(String, String)> {
    let block = String::from_utf8_lossy(&raw[..header_block_len(raw)]);
    parse_header_lines(&block)
}

/// Unfold `Name: value` lines; continuation lines start with whitespace
pub(crate) fn parse_header_lines(text: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    headers
}
