//! RFC 3464 delivery status notification parser
//!
//! Reads the per-recipient fields of the `message/delivery-status` part of a
//! `multipart/report` bounce:
//!
//! ```text
//! Final-Recipient: rfc822; bob@example.com
//! Action: failed
//! Status: 5.1.1
//! Diagnostic-Code: smtp; 550 5.1.1 User unknown
//! ```
//!
//! `Action: failed` is a permanent failure and `Action: delayed` a temporary
//! one. Any other or missing action falls back to the class of the status
//! code.

use super::parts::{field, field_groups, ReportParts};
use super::{find_enhanced_status, strip_type_prefix, FailureInfo, FailureParseStrategy, FailureStatus};
use crate::mail::{EmailAddress, Message};

/// Parser for standard delivery status reports
#[derive(Debug, Default, Clone)]
pub struct DsnParser;

impl DsnParser {
    pub fn new() -> Self {
        Self
    }

    /// Delivery-status blocks of a report, from MIME parts or the raw body
    fn delivery_status_blocks(message: &Message) -> Vec<String> {
        let parts = ReportParts::collect(message);
        if !parts.delivery_status.is_empty() {
            return parts.delivery_status;
        }

        // Some reports are mangled enough that the MIME walk misses the part;
        // the per-recipient fields are still plain text in the body.
        let body = String::from_utf8_lossy(message.raw()).into_owned();
        if body.to_ascii_lowercase().contains("-recipient:") {
            vec![body]
        } else {
            Vec::new()
        }
    }

    fn parse_block(message: &Message, block: &str) -> Option<FailureInfo> {
        for group in field_groups(block) {
            let Some(recipient) = field(&group, "Original-Recipient")
                .and_then(EmailAddress::extract)
                .or_else(|| field(&group, "Final-Recipient").and_then(EmailAddress::extract))
            else {
                continue;
            };

            let action = field(&group, "Action").map(|a| {
                a.split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase()
            });
            let diagnostic = field(&group, "Diagnostic-Code")
                .map(strip_type_prefix)
                .unwrap_or_default()
                .to_string();
            let dsn_status = field(&group, "Status")
                .and_then(|s| s.split_whitespace().next())
                .map(str::to_string)
                .or_else(|| find_enhanced_status(&diagnostic))
                .unwrap_or_default();

            let status = classify_action(action.as_deref(), &dsn_status);
            return Some(FailureInfo::new(
                message.uid(),
                recipient,
                status,
                dsn_status,
                diagnostic,
            ));
        }
        None
    }
}

/// Map the DSN `Action` to a failure class, falling back to the status code
pub fn classify_action(action: Option<&str>, dsn_status: &str) -> FailureStatus {
    match action {
        Some("failed") => FailureStatus::PermanentFailure,
        Some("delayed") => FailureStatus::TemporaryFailure,
        _ => FailureStatus::from_status_code(dsn_status),
    }
}

impl FailureParseStrategy for DsnParser {
    fn try_parse(&self, message: &Message) -> Option<FailureInfo> {
        let is_report = message
            .content_type()
            .map(|ct| ct == "multipart/report")
            .unwrap_or(false);
        if !is_report {
            return None;
        }

        Self::delivery_status_blocks(message)
            .iter()
            .find_map(|block| Self::parse_block(message, block))
    }

    fn name(&self) -> &'static str {
        "dsn"
    }
}
