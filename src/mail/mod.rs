//! Mail primitives
//!
//! Messages as fetched from a mailbox, their sorting category, and
//! normalized email addresses.

mod address;
mod message;

pub use address::{AddressError, EmailAddress};
pub use message::{Message, MessageType, Uid};

pub(crate) use message::parse_header_lines;
