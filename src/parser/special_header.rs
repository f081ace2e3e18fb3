//! Fallback parser for non-standard bounces
//!
//! Many MTAs (qmail, older Exim, hosted providers) send bounces that are not
//! `multipart/report`. This strategy looks for:
//!
//! - vendor headers naming the failed recipient (`X-Failed-Recipients`)
//! - DSN-style `Final-Recipient:` lines in a plain text body
//! - well-known free-text phrasings around the failed address
//!
//! The failure class comes from an enhanced status code in the text, then an
//! SMTP reply code, then wording. If none of those is present but a recipient
//! was found, the status is [`FailureStatus::Unknown`].

use super::parts::ReportParts;
use super::{find_enhanced_status, strip_type_prefix, FailureInfo, FailureParseStrategy, FailureStatus};
use crate::mail::{EmailAddress, Message};
use lazy_static::lazy_static;
use regex::Regex;

/// Headers that name the failed recipient directly
const RECIPIENT_HEADERS: &[&str] = &[
    "X-Failed-Recipients",
    "X-Failed-Recipient",
    "X-Original-Failed-Recipient",
];

lazy_static! {
    static ref DSN_RECIPIENT_LINE: Regex =
        Regex::new(r"(?im)^(?:original|final)-recipient:[ \t]*(.+)$").unwrap();
    static ref DIAGNOSTIC_LINE: Regex =
        Regex::new(r"(?im)^diagnostic-code:[ \t]*(.+)$").unwrap();
    static ref STATUS_LINE: Regex = Regex::new(r"(?im)^status:[ \t]*([245]\.\d{1,3}\.\d{1,3})").unwrap();
    // qmail: "<bob@example.com>:" alone on a line
    static ref QMAIL_RECIPIENT: Regex =
        Regex::new(r"(?m)^<([^<>\s]+@[^<>\s]+)>:\s*$").unwrap();
    // Exim and friends: a failure phrase followed by an indented address
    static ref FAILED_PHRASE: Regex = Regex::new(
        r"(?i)(failed:|could not be delivered|couldn't be delivered|delivery .* failed|permanent error|undeliverable|has been delayed|delivery delayed|was not delivered|following (address|recipient)s? failed|unknown user|user unknown|no such user|does not exist)"
    )
    .unwrap();
    static ref SMTP_REPLY: Regex = Regex::new(r"\b([45])\d\d[ -]").unwrap();
    static ref PERMANENT_WORDING: Regex = Regex::new(
        r"(?i)(permanent|user unknown|unknown user|no such (user|mailbox)|does not exist|mailbox unavailable|address rejected|invalid recipient|account (has been )?disabled)"
    )
    .unwrap();
    static ref TEMPORARY_WORDING: Regex = Regex::new(
        r"(?i)(temporar|delayed|will (be )?retr(y|ied)|try again later|mailbox (is )?full|over quota|quota exceeded)"
    )
    .unwrap();
}

/// Best-effort parser for vendor-specific and free-text bounces
#[derive(Debug, Default, Clone)]
pub struct SpecialHeaderParser;

impl SpecialHeaderParser {
    pub fn new() -> Self {
        Self
    }

    /// Human-readable text of the bounce
    fn bounce_text(message: &Message) -> String {
        let parts = ReportParts::collect(message);
        let mut text = parts.texts.join("\n");
        for block in &parts.delivery_status {
            text.push('\n');
            text.push_str(block);
        }
        if text.trim().is_empty() {
            text = message.body_text();
        }
        text
    }

    fn find_recipient(message: &Message, text: &str) -> Option<EmailAddress> {
        for header in RECIPIENT_HEADERS {
            if let Some(addr) = message.header(header).and_then(EmailAddress::extract) {
                return Some(addr);
            }
        }

        if let Some(addr) = DSN_RECIPIENT_LINE
            .captures(text)
            .and_then(|c| EmailAddress::extract(&c[1]))
        {
            return Some(addr);
        }

        if let Some(addr) = QMAIL_RECIPIENT
            .captures(text)
            .and_then(|c| EmailAddress::new(&c[1]).ok())
        {
            return Some(addr);
        }

        // Our own addresses appear in the bounce too; never blame them.
        let own: Vec<EmailAddress> = message
            .recipients()
            .into_iter()
            .chain(message.sender())
            .collect();

        let lines: Vec<&str> = text.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if !FAILED_PHRASE.is_match(line) {
                continue;
            }
            let window = lines.iter().skip(idx).take(6);
            for candidate in window {
                if let Some(addr) = EmailAddress::extract(candidate) {
                    if !own.contains(&addr) {
                        return Some(addr);
                    }
                }
            }
        }

        None
    }

    fn find_status(text: &str) -> (FailureStatus, String) {
        if let Some(caps) = STATUS_LINE.captures(text) {
            let code = caps[1].to_string();
            return (FailureStatus::from_status_code(&code), code);
        }
        if let Some(code) = find_enhanced_status(text) {
            return (FailureStatus::from_status_code(&code), code);
        }
        if let Some(caps) = SMTP_REPLY.captures(text) {
            return (FailureStatus::from_status_code(&caps[1]), String::new());
        }
        if TEMPORARY_WORDING.is_match(text) {
            return (FailureStatus::TemporaryFailure, String::new());
        }
        if PERMANENT_WORDING.is_match(text) {
            return (FailureStatus::PermanentFailure, String::new());
        }
        (FailureStatus::Unknown, String::new())
    }

    fn find_diagnostic(text: &str) -> String {
        if let Some(caps) = DIAGNOSTIC_LINE.captures(text) {
            return strip_type_prefix(&caps[1]).to_string();
        }

        let with_code = |line: &&str| SMTP_REPLY.is_match(line) || find_enhanced_status(line).is_some();
        let with_wording =
            |line: &&str| PERMANENT_WORDING.is_match(line) || TEMPORARY_WORDING.is_match(line);

        let lines = || text.lines().map(str::trim);
        lines()
            .find(with_code)
            .or_else(|| lines().find(with_wording))
            .map(|line| line.chars().take(500).collect())
            .unwrap_or_default()
    }
}

impl FailureParseStrategy for SpecialHeaderParser {
    fn try_parse(&self, message: &Message) -> Option<FailureInfo> {
        let text = Self::bounce_text(message);
        let recipient = Self::find_recipient(message, &text)?;
        let (status, dsn_status) = Self::find_status(&text);
        let diagnostic = Self::find_diagnostic(&text);

        Some(FailureInfo::new(
            message.uid(),
            recipient,
            status,
            dsn_status,
            diagnostic,
        ))
    }

    fn name(&self) -> &'static str {
        "special-header"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(headers: &str, body: &str) -> Message {
        Message::new(
            5,
            format!(
                "{}\r\nContent-Type: text/plain\r\n\r\n{}",
                headers.replace('\n', "\r\n"),
                body.replace('\n', "\r\n")
            ),
        )
    }

    #[test]
    fn test_failed_recipients_header() {
        let msg = plain(
            "From: Mail Delivery System <Mailer-Daemon@mx.example.net>\nTo: bounces@example.com\nX-Failed-Recipients: bob@y",
            "This message was created automatically by mail delivery software.\n\nA message that you sent could not be delivered to one or more of its\nrecipients. This is a permanent error. The following address(es) failed:\n\n  bob@y\n    SMTP error from remote mail server after RCPT TO:<bob@y>:\n    550 5.1.1 User unknown\n",
        );
        let info = SpecialHeaderParser::new().try_parse(&msg).unwrap();
        assert_eq!(info.recipient.as_str(), "bob@y");
        assert_eq!(info.status, FailureStatus::PermanentFailure);
        assert_eq!(info.dsn_status, "5.1.1");
        assert!(info.diagnostic_code.contains("550 5.1.1"));
    }

    #[test]
    fn test_qmail_bounce() {
        let msg = plain(
            "From: MAILER-DAEMON@mx.example.net\nTo: bounces@example.com",
            "Hi. This is the qmail-send program at mx.example.net.\nI'm afraid I wasn't able to deliver your message to the following addresses.\nThis is a permanent error; I've given up. Sorry it didn't work out.\n\n<carol@example.org>:\nSorry, no mailbox here by that name.\n",
        );
        let info = SpecialHeaderParser::new().try_parse(&msg).unwrap();
        assert_eq!(info.recipient.as_str(), "carol@example.org");
        assert_eq!(info.status, FailureStatus::PermanentFailure);
    }

    #[test]
    fn test_temporary_wording() {
        let msg = plain(
            "From: postmaster@mx.example.net\nTo: bounces@example.com",
            "Delivery to the following recipient has been delayed:\n\n    dave@example.org\n\nMessage will be retried for 2 more day(s)\n",
        );
        let info = SpecialHeaderParser::new().try_parse(&msg).unwrap();
        assert_eq!(info.recipient.as_str(), "dave@example.org");
        assert_eq!(info.status, FailureStatus::TemporaryFailure);
    }

    #[test]
    fn test_unknown_class_with_recipient() {
        let msg = plain(
            "From: postmaster@mx.example.net\nTo: bounces@example.com\nX-Failed-Recipients: erin@example.org",
            "Something went wrong.\n",
        );
        let info = SpecialHeaderParser::new().try_parse(&msg).unwrap();
        assert_eq!(info.recipient.as_str(), "erin@example.org");
        assert_eq!(info.status, FailureStatus::Unknown);
        assert_eq!(info.dsn_status, "");
    }

    #[test]
    fn test_plain_text_dsn_fields() {
        let msg = plain(
            "From: postmaster@mx.example.net\nTo: bounces@example.com",
            "Final-Recipient: rfc822; frank@example.org\nStatus: 4.2.2\nDiagnostic-Code: smtp; 452 4.2.2 over quota\n",
        );
        let info = SpecialHeaderParser::new().try_parse(&msg).unwrap();
        assert_eq!(info.recipient.as_str(), "frank@example.org");
        assert_eq!(info.status, FailureStatus::TemporaryFailure);
        assert_eq!(info.dsn_status, "4.2.2");
        assert_eq!(info.diagnostic_code, "452 4.2.2 over quota");
    }

    #[test]
    fn test_own_addresses_are_not_recipients() {
        let msg = plain(
            "From: postmaster@mx.example.net\nTo: bounces@example.com",
            "Your message to bounces@example.com could not be delivered.\n",
        );
        assert!(SpecialHeaderParser::new().try_parse(&msg).is_none());
    }

    #[test]
    fn test_unrecognizable_message() {
        let msg = plain("From: postmaster@mx.example.net\nTo: bounces@example.com", "Hello there.\n");
        assert!(SpecialHeaderParser::new().try_parse(&msg).is_none());
    }
}
