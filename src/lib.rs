//! mailsort - Postmaster mailbox sorter
//!
//! Sorts the messages that pile up in a shared postmaster/bounce mailbox:
//! bounces are parsed and counted against the recipient and the mailing they
//! came from, unsubscribe requests are recorded, human replies are forwarded
//! and autoresponder noise is cleared away. Every message then gets the
//! mailbox action configured for its type.
//!
//! # Architecture
//!
//! - **mail**: Messages, message types and addresses
//! - **classifier**: Message type detection
//! - **parser**: Failure information from DSN and non-standard bounces
//! - **stats**: Per-address and per-mailing counters and their repositories
//! - **handlers**: Per-type message handling
//! - **sorter**: Batched mailbox traversal, actions and run statistics
//! - **mailbox**: Mailbox sessions (Maildir, in-memory)
//! - **database**: Mailing-list database (disable, unsubscribe)
//! - **runner**: Wiring everything together from configuration

// Core pipeline
pub mod classifier;
pub mod handlers;
pub mod mail;
pub mod parser;
pub mod sorter;
pub mod stats;

// Collaborators
pub mod database;
pub mod mailbox;
pub mod runner;

// Ambient
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

// Re-exports
pub use error::{MailSortError, Result};
