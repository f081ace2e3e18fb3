//! Mailbox sorting
//!
//! [`MailboxSorter`] drives one pass over the selected mailbox: it fetches
//! messages in bounded batches, classifies each one, hands it to the handler
//! for its type and applies the configured action for the handler's outcome.
//!
//! # Failure containment
//!
//! A handler error leaves its message untouched (no action is applied) and
//! the pass moves on to the next message. Only session errors while fetching
//! abort the pass.
//!
//! # Read-only runs
//!
//! With `readonly` set, everything up to and including the handlers runs as
//! usual; only `apply_action` is skipped. The action log still records what
//! would have been applied.

mod action_log;
mod stats_collector;

pub use action_log::{ActionLog, ActionRecord};
pub use stats_collector::{MailboxSorterStatsCollector, TypeStats};

use crate::classifier::MessageClassifier;
use crate::config::SorterConfig;
use crate::handlers::{HandlerOutcome, HandlerSet};
use crate::mail::{Message, MessageType, Uid};
use crate::mailbox::{MailboxAction, MailboxSession};
use crate::{metrics, MailSortError};
use serde::Serialize;
use std::time::Instant;

/// Something that happened to one message during a pass
#[derive(Debug)]
pub enum SortEvent<'a> {
    /// Handler finished and an action was chosen
    Sorted {
        record: &'a ActionRecord,
        outcome: &'a HandlerOutcome,
    },
    /// Handler or action failed; the message was left as it was
    Failed {
        mailbox: &'a str,
        uid: Uid,
        message_type: MessageType,
        error: &'a MailSortError,
    },
}

/// Receives every [`SortEvent`] of a pass
pub trait SortObserver {
    fn observe(&mut self, event: &SortEvent<'_>);
}

/// Observer that ignores everything
pub struct NoopObserver;

impl SortObserver for NoopObserver {
    fn observe(&mut self, _event: &SortEvent<'_>) {}
}

/// Summary of one pass over one mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SortReport {
    pub mailbox: String,
    pub fetched: usize,
    pub processed: usize,
    pub unprocessed: usize,
    pub failed: usize,
    pub actions_applied: usize,
}

/// Classifies, handles and disposes of mailbox messages
pub struct MailboxSorter {
    config: SorterConfig,
    classifier: MessageClassifier,
    handlers: HandlerSet,
    action_log: ActionLog,
}

impl MailboxSorter {
    pub fn new(config: SorterConfig, classifier: MessageClassifier, handlers: HandlerSet) -> Self {
        Self {
            config,
            classifier,
            handlers,
            action_log: ActionLog::new(),
        }
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.action_log
    }

    pub fn is_readonly(&self) -> bool {
        self.config.readonly
    }

    /// Sort the mailbox currently selected in `session`
    pub fn sort(
        &mut self,
        session: &mut dyn MailboxSession,
        mailbox: &str,
        observer: &mut dyn SortObserver,
    ) -> crate::Result<SortReport> {
        let started = Instant::now();
        let batch_size = self.config.message_batch_size.max(1);
        let mut report = SortReport {
            mailbox: mailbox.to_string(),
            ..Default::default()
        };

        tracing::info!(mailbox, batch_size, readonly = self.config.readonly, "Sorting mailbox");

        loop {
            let batch = session.fetch_batch(batch_size)?;
            if batch.is_empty() {
                break;
            }
            tracing::debug!(mailbox, messages = batch.len(), "Fetched batch");
            report.fetched += batch.len();

            for message in &batch {
                self.sort_message(session, mailbox, message, observer, &mut report);
            }
        }

        metrics::record_sort_duration(mailbox, started.elapsed().as_secs_f64());
        tracing::info!(
            mailbox,
            fetched = report.fetched,
            processed = report.processed,
            unprocessed = report.unprocessed,
            failed = report.failed,
            "Finished mailbox"
        );

        Ok(report)
    }

    fn sort_message(
        &mut self,
        session: &mut dyn MailboxSession,
        mailbox: &str,
        message: &Message,
        observer: &mut dyn SortObserver,
        report: &mut SortReport,
    ) {
        let uid = message.uid();
        let message_type = self.classifier.classify(message);
        tracing::debug!(mailbox, uid, message_type = %message_type, "Classified");

        let outcome = match self.handlers.get_mut(message_type).handle(message) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(
                    mailbox,
                    uid,
                    message_type = %message_type,
                    error = %error,
                    "Handler failed, leaving message untouched"
                );
                metrics::record_handler_error(message_type.as_str());
                report.failed += 1;
                observer.observe(&SortEvent::Failed {
                    mailbox,
                    uid,
                    message_type,
                    error: &error,
                });
                return;
            }
        };

        let action = self
            .config
            .action_for(message_type, outcome.is_processed())
            .clone();

        if let Err(error) = self.apply(session, message, &action) {
            tracing::error!(mailbox, uid, action = %action, error = %error, "Failed to apply action");
            report.failed += 1;
            observer.observe(&SortEvent::Failed {
                mailbox,
                uid,
                message_type,
                error: &error,
            });
            return;
        }

        let applied = !self.config.readonly;
        if outcome.is_processed() {
            report.processed += 1;
        } else {
            report.unprocessed += 1;
        }
        if applied {
            report.actions_applied += 1;
        }
        metrics::record_message(message_type.as_str(), outcome.key());
        metrics::record_action(action.kind());

        let record = ActionRecord {
            mailbox: mailbox.to_string(),
            uid,
            message_type,
            outcome: outcome.key(),
            action,
            applied,
        };
        observer.observe(&SortEvent::Sorted {
            record: &record,
            outcome: &outcome,
        });
        self.action_log.record(record);
    }

    fn apply(
        &self,
        session: &mut dyn MailboxSession,
        message: &Message,
        action: &MailboxAction,
    ) -> crate::Result<()> {
        if self.config.readonly {
            return Ok(());
        }
        session.apply_action(message, action)?;
        Ok(())
    }
}
