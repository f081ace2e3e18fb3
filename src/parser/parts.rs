//! MIME part collection for bounce reports
//!
//! Walks the parsed MIME tree once and sorts the interesting parts into
//! buckets: machine-readable delivery-status blocks, the returned original
//! message (or just its headers), and human-readable text.

use crate::mail::Message;
use mail_parser::{MessagePart, MimeHeaders};

/// Text extracted from the parts of a bounce
#[derive(Debug, Default)]
pub(crate) struct ReportParts {
    /// `message/delivery-status` bodies
    pub delivery_status: Vec<String>,
    /// Returned original message or `text/rfc822-headers` bodies
    pub original: Vec<String>,
    /// Plain text and HTML parts
    pub texts: Vec<String>,
}

impl ReportParts {
    pub fn collect(message: &Message) -> Self {
        let mut out = Self::default();
        let Some(parsed) = message.parsed() else {
            return out;
        };

        for part in &parsed.parts {
            let mime = part_mime_type(part);
            let Some(text) = decoded_part_text(part) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }

            match mime.as_str() {
                "message/delivery-status" | "message/global-delivery-status" => {
                    out.delivery_status.push(text)
                }
                "message/rfc822" | "message/global" | "text/rfc822-headers"
                | "message/rfc822-headers" | "message/global-headers" => out.original.push(text),
                m if m.starts_with("text/") => out.texts.push(text),
                _ => {}
            }
        }

        out
    }
}

fn part_mime_type(part: &MessagePart<'_>) -> String {
    if let Some(ct) = part.content_type() {
        let ctype = ct.ctype().trim().to_ascii_lowercase();
        if let Some(subtype) = ct.subtype() {
            return format!("{}/{}", ctype, subtype.trim().to_ascii_lowercase());
        }
        return ctype;
    }

    if part.is_text_html() {
        return "text/html".to_string();
    }
    if part.is_text() {
        return "text/plain".to_string();
    }
    if part.is_message() {
        return "message/rfc822".to_string();
    }

    "application/octet-stream".to_string()
}

fn decoded_part_text(part: &MessagePart<'_>) -> Option<String> {
    if let Some(text) = part.text_contents() {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    let bytes = part.contents();
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Split a delivery-status body into its field groups
///
/// Groups are separated by blank lines; the first group holds per-message
/// fields and each following group describes one recipient. Folded lines are
/// joined.
pub(crate) fn field_groups(text: &str) -> Vec<Vec<(String, String)>> {
    let mut groups = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                groups.push(crate::mail::parse_header_lines(&current));
                current.clear();
            }
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        groups.push(crate::mail::parse_header_lines(&current));
    }

    groups.into_iter().filter(|g| !g.is_empty()).collect()
}

/// Case-insensitive field lookup in one group
pub(crate) fn field<'a>(group: &'a [(String, String)], name: &str) -> Option<&'a str> {
    group
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}
