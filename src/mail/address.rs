//! Email address handling
//!
//! Bounce reports carry recipient addresses in many shapes:
//! `rfc822;bob@example.com`, `"Bob" <bob@example.com>`, `<bob@example.com>:`.
//! [`EmailAddress`] normalizes them into a lowercase `local@domain` form that is
//! used as the key for address statistics.
//!
//! # Examples
//!
//! ```
//! use mailsort::mail::EmailAddress;
//!
//! let addr = EmailAddress::extract("rfc822; Bob@Example.COM").unwrap();
//! assert_eq!(addr.as_str(), "bob@example.com");
//! assert_eq!(addr.local_part(), "bob");
//! assert_eq!(addr.domain(), "example.com");
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    static ref ANGLE_ADDR: Regex = Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>").unwrap();
    static ref BARE_ADDR: Regex =
        Regex::new(r#"([A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?)"#)
            .unwrap();
}

/// Error type for address parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address format: expected 'local@domain', got '{0}'")]
    InvalidFormat(String),

    #[error("address local part cannot be empty")]
    EmptyLocalPart,

    #[error("address domain cannot be empty")]
    EmptyDomain,
}

/// A normalized email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Parse a plain `local@domain` address
    pub fn new(address: impl AsRef<str>) -> Result<Self, AddressError> {
        let address = address.as_ref().trim();
        let (local, domain) = address
            .rsplit_once('@')
            .ok_or_else(|| AddressError::InvalidFormat(address.to_string()))?;

        if local.is_empty() {
            return Err(AddressError::EmptyLocalPart);
        }
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain);
        }
        if address.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
            return Err(AddressError::InvalidFormat(address.to_string()));
        }

        Ok(Self(address.to_ascii_lowercase()))
    }

    /// Find the first address inside a header value or free text
    ///
    /// Angle-bracketed addresses win over bare ones, and an `rfc822;`
    /// address-type prefix is ignored.
    pub fn extract(text: &str) -> Option<Self> {
        let text = strip_address_type(text);

        if let Some(caps) = ANGLE_ADDR.captures(text) {
            if let Ok(addr) = Self::new(&caps[1]) {
                return Some(addr);
            }
        }

        BARE_ADDR
            .captures(text)
            .and_then(|caps| Self::new(caps[1].trim_end_matches('.')).ok())
    }

    /// Every address found in a header value such as `To` or `Cc`
    pub fn extract_all(text: &str) -> Vec<Self> {
        text.split(',').filter_map(Self::extract).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn local_part(&self) -> &str {
        self.0.rsplit_once('@').map(|(l, _)| l).unwrap_or_default()
    }

    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map(|(_, d)| d).unwrap_or_default()
    }
}

/// Strip a DSN address-type prefix (`rfc822;`)
fn strip_address_type(text: &str) -> &str {
    match text.split_once(';') {
        Some((kind, rest)) if !kind.contains('@') && kind.trim().len() < 16 => rest,
        _ => text,
    }
}

impl FromStr for EmailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EmailAddress> for String {
    fn from(addr: EmailAddress) -> Self {
        addr.0
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
