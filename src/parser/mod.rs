//! Failure information extraction
//!
//! Turns a bounce into a normalized [`FailureInfo`]. Parsing is layered: an
//! ordered list of [`FailureParseStrategy`] implementations is tried and the
//! first one that finds a recipient wins.
//!
//! - [`DsnParser`] - standards-conformant `multipart/report` delivery status
//!   notifications
//! - [`SpecialHeaderParser`] - vendor headers and free-text bounce bodies
//!
//! The mailing identity (`List-Id`) is looked up separately, from the
//! returned original message, regardless of which strategy succeeded.

mod dsn;
mod parts;
mod special_header;

pub use dsn::DsnParser;
pub use special_header::SpecialHeaderParser;

use crate::mail::{EmailAddress, Message, Uid};
use lazy_static::lazy_static;
use parts::ReportParts;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref ENHANCED_STATUS: Regex = Regex::new(r"\b([245])\.(\d{1,3})\.(\d{1,3})\b").unwrap();
    static ref SPAM_WORDING: Regex = Regex::new(
        r"(?i)(spam|black ?list(ed)?|block ?list(ed)?|junk|spamhaus|spamcop|barracuda|reputation|\bRBL\b|\bDNSBL\b)"
    )
    .unwrap();
    static ref LIST_ID_LINE: Regex = Regex::new(r"(?im)^list-id:[ \t]*(.+)$").unwrap();
}

/// Failure class of a bounce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    /// Delivery will never succeed (`Action: failed`, `5.x.x`)
    PermanentFailure,
    /// Delivery may still succeed (`Action: delayed`, `4.x.x`)
    TemporaryFailure,
    /// A recipient was found but the failure class was not
    Unknown,
}

impl FailureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStatus::PermanentFailure => "permanent_failure",
            FailureStatus::TemporaryFailure => "temporary_failure",
            FailureStatus::Unknown => "unknown",
        }
    }

    /// Class of an enhanced status code (`5.1.1`) or SMTP reply code (`550`)
    pub fn from_status_code(code: &str) -> Self {
        match code.trim().chars().next() {
            Some('5') => FailureStatus::PermanentFailure,
            Some('4') => FailureStatus::TemporaryFailure,
            _ => FailureStatus::Unknown,
        }
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of one bounce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Address whose delivery failed
    pub recipient: EmailAddress,
    /// Failure class
    pub status: FailureStatus,
    /// Enhanced status code as reported (e.g. `5.1.1`), empty if unknown
    pub dsn_status: String,
    /// Remote server diagnostic, without the `smtp;` type prefix
    pub diagnostic_code: String,
    /// Whether the diagnostic points at spam filtering or a blocklist
    pub spam: bool,
    /// Mailing identity of the bounced message
    pub list_id: Option<String>,
    /// UID of the bounce this was parsed from
    pub uid: Uid,
}

impl FailureInfo {
    /// Build a record; the spam marker is derived from the diagnostic
    pub fn new(
        uid: Uid,
        recipient: EmailAddress,
        status: FailureStatus,
        dsn_status: impl Into<String>,
        diagnostic_code: impl Into<String>,
    ) -> Self {
        let diagnostic_code = diagnostic_code.into();
        Self {
            spam: looks_like_spam_rejection(&diagnostic_code),
            recipient,
            status,
            dsn_status: dsn_status.into(),
            diagnostic_code,
            list_id: None,
            uid,
        }
    }

    pub fn with_list_id(mut self, list_id: impl Into<String>) -> Self {
        self.list_id = Some(list_id.into());
        self
    }

    /// One-line description passed on when an address gets disabled
    pub fn full_status(&self) -> String {
        if self.diagnostic_code.is_empty() {
            format!("{} {}", self.status, self.dsn_status).trim().to_string()
        } else {
            format!("{} {} {}", self.status, self.dsn_status, self.diagnostic_code)
        }
    }
}

/// A way of reading failure information out of a bounce
pub trait FailureParseStrategy: Send + Sync {
    /// Return the failure record, or `None` if this strategy finds no recipient
    fn try_parse(&self, message: &Message) -> Option<FailureInfo>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Ordered chain of parse strategies
pub struct FailureInfoParser {
    strategies: Vec<Box<dyn FailureParseStrategy>>,
}

impl FailureInfoParser {
    /// Chain with the standard strategies: DSN first, then special headers
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(DsnParser::new()),
            Box::new(SpecialHeaderParser::new()),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn FailureParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Parse a bounce; `None` means no recipient could be found
    pub fn parse(&self, message: &Message) -> Option<FailureInfo> {
        for strategy in &self.strategies {
            if let Some(mut info) = strategy.try_parse(message) {
                tracing::debug!(
                    uid = message.uid(),
                    strategy = strategy.name(),
                    recipient = %info.recipient,
                    status = %info.status,
                    "Parsed failure info"
                );
                info.list_id = extract_list_id(message);
                return Some(info);
            }
        }

        tracing::debug!(uid = message.uid(), "No parse strategy found a recipient");
        None
    }
}

impl Default for FailureInfoParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Mailing identity of the message that bounced
///
/// Looks at the returned original message first (embedded MIME part, then any
/// `List-Id:` line in the body) and falls back to the bounce's own header.
pub fn extract_list_id(message: &Message) -> Option<String> {
    let parts = ReportParts::collect(message);
    let from_parts = parts
        .original
        .iter()
        .find_map(|text| LIST_ID_LINE.captures(text).map(|c| c[1].to_string()));

    let from_body = || {
        let body = String::from_utf8_lossy(message.raw());
        let header_len = body.find("\r\n\r\n").or_else(|| body.find("\n\n"))?;
        LIST_ID_LINE
            .captures(&body[header_len..])
            .map(|c| c[1].to_string())
    };

    from_parts
        .or_else(from_body)
        .or_else(|| message.header("List-Id").map(str::to_string))
        .and_then(|raw| normalize_list_id(&raw))
}

/// `Weekly News <weekly.example.com>` -> `weekly.example.com`
pub fn normalize_list_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let id = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw,
    };
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_ascii_lowercase())
    }
}

/// First enhanced status code (`5.1.1`) in a piece of text
pub(crate) fn find_enhanced_status(text: &str) -> Option<String> {
    ENHANCED_STATUS.find(text).map(|m| m.as_str().to_string())
}

/// Drop a DSN type prefix such as `smtp;` or `X-Postfix;`
pub(crate) fn strip_type_prefix(value: &str) -> &str {
    match value.split_once(';') {
        Some((kind, rest)) if !kind.trim().contains(' ') && kind.trim().len() < 24 => rest.trim(),
        _ => value.trim(),
    }
}

pub(crate) fn looks_like_spam_rejection(diagnostic: &str) -> bool {
    SPAM_WORDING.is_match(diagnostic)
}
