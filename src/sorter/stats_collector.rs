//! Per-run counts for the final report

use super::{SortEvent, SortObserver};
use crate::mail::MessageType;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts for one message type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    pub failed: u64,
}

/// Aggregates sort events by message type and by action
///
/// Only observes; it never influences what the sorter does.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxSorterStatsCollector {
    by_type: BTreeMap<MessageType, TypeStats>,
    by_action: BTreeMap<String, u64>,
    readonly: bool,
}

impl MailboxSorterStatsCollector {
    pub fn new(readonly: bool) -> Self {
        Self {
            by_type: MessageType::ALL
                .iter()
                .map(|t| (*t, TypeStats::default()))
                .collect(),
            by_action: BTreeMap::new(),
            readonly,
        }
    }

    pub fn type_stats(&self, message_type: MessageType) -> TypeStats {
        self.by_type.get(&message_type).copied().unwrap_or_default()
    }

    pub fn action_count(&self, action: &str) -> u64 {
        self.by_action.get(action).copied().unwrap_or(0)
    }

    pub fn by_action(&self) -> &BTreeMap<String, u64> {
        &self.by_action
    }

    pub fn total(&self) -> u64 {
        self.by_type.values().map(|s| s.total).sum()
    }

    /// Write the summary to the log
    pub fn log_stats(&self) {
        for (message_type, stats) in &self.by_type {
            tracing::info!(
                message_type = %message_type,
                total = stats.total,
                processed = stats.processed,
                unprocessed = stats.unprocessed,
                failed = stats.failed,
                "Message type summary"
            );
        }
        for (action, count) in &self.by_action {
            tracing::info!(action = %action, count, readonly = self.readonly, "Action summary");
        }
        tracing::info!(total = self.total(), "Sorted messages");
    }
}

impl SortObserver for MailboxSorterStatsCollector {
    fn observe(&mut self, event: &SortEvent<'_>) {
        match event {
            SortEvent::Sorted { record, outcome } => {
                let stats = self.by_type.entry(record.message_type).or_default();
                stats.total += 1;
                if outcome.is_processed() {
                    stats.processed += 1;
                } else {
                    stats.unprocessed += 1;
                }
                *self.by_action.entry(record.action.to_string()).or_insert(0) += 1;
            }
            SortEvent::Failed { message_type, .. } => {
                let stats = self.by_type.entry(*message_type).or_default();
                stats.total += 1;
                stats.failed += 1;
            }
        }
    }
}
