//! Applies parsed bounces to the statistics repositories

use super::{
    AddressStats, AddressStatsRepository, MailingId, MailingRepository, RepositoryError, Result,
};
use crate::mail::EmailAddress;
use crate::parser::{FailureInfo, FailureStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A statistics change made for one bounce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsAction {
    UpdatedMailingStats,
    UpdatedAddressStats,
    CreatedAddressStats,
}

/// `List-Id` to mailing id lookups resolved during this run
///
/// Only successful lookups are stored and an entry is never replaced, so a
/// list id maps to at most one mailing for the lifetime of the cache.
#[derive(Debug, Default, Clone)]
pub struct ListIdCache {
    entries: HashMap<String, MailingId>,
}

impl ListIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, list_id: &str) -> Option<MailingId> {
        self.entries.get(list_id).copied()
    }

    /// Remember a resolved mailing; returns the id the cache holds afterwards
    pub fn insert(&mut self, list_id: &str, id: MailingId) -> MailingId {
        *self.entries.entry(list_id.to_string()).or_insert(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counts delivery failures per mailing and per address
pub struct MailingStatsTracker {
    mailings: Option<Arc<dyn MailingRepository>>,
    addresses: Option<Arc<dyn AddressStatsRepository>>,
    cache: ListIdCache,
}

impl MailingStatsTracker {
    /// Either repository may be absent; that side of the accounting is then skipped
    pub fn new(
        mailings: Option<Arc<dyn MailingRepository>>,
        addresses: Option<Arc<dyn AddressStatsRepository>>,
    ) -> Self {
        Self {
            mailings,
            addresses,
            cache: ListIdCache::new(),
        }
    }

    pub fn cache(&self) -> &ListIdCache {
        &self.cache
    }

    /// Record one failure against its mailing and its recipient address
    pub fn count_failure(&mut self, info: &FailureInfo) -> Result<Vec<StatsAction>> {
        let mut actions = Vec::new();

        if let Some(list_id) = info.list_id.as_deref() {
            if self.count_for_mailing(list_id)? {
                actions.push(StatsAction::UpdatedMailingStats);
            }
        }

        if let Some(action) = self.count_for_address(info)? {
            actions.push(action);
        }

        Ok(actions)
    }

    /// Stored temporary failure count, or 0 for an unknown address
    pub fn temporary_failure_count(&self, email: &EmailAddress) -> Result<u32> {
        let Some(repo) = &self.addresses else {
            return Ok(0);
        };
        Ok(repo
            .get_by_email(email)?
            .map(|stats| stats.temporary_failure_count)
            .unwrap_or(0))
    }

    /// Resolve a list id through the cache, asking the repository on a miss
    pub fn mailing_id_for_list(&mut self, list_id: &str) -> Result<Option<MailingId>> {
        if let Some(id) = self.cache.get(list_id) {
            return Ok(Some(id));
        }
        let Some(repo) = &self.mailings else {
            return Ok(None);
        };

        match repo.get_by_list_id(list_id)? {
            Some(mailing) => Ok(Some(self.cache.insert(list_id, mailing.id))),
            None => Ok(None),
        }
    }

    fn count_for_mailing(&mut self, list_id: &str) -> Result<bool> {
        let Some(id) = self.mailing_id_for_list(list_id)? else {
            tracing::debug!(list_id, "No mailing for list id");
            return Ok(false);
        };
        let Some(repo) = &self.mailings else {
            return Ok(false);
        };

        match repo.update_in_transaction(id, &mut |mailing| mailing.undelivered_count += 1)? {
            Some(mailing) => {
                tracing::debug!(
                    mailing_id = id,
                    list_id,
                    undelivered = mailing.undelivered_count,
                    "Counted undelivered message"
                );
                Ok(true)
            }
            None => {
                tracing::debug!(mailing_id = id, list_id, "Mailing disappeared before update");
                Ok(false)
            }
        }
    }

    fn count_for_address(&self, info: &FailureInfo) -> Result<Option<StatsAction>> {
        let Some(repo) = &self.addresses else {
            tracing::debug!(recipient = %info.recipient, "No address repository, skipping");
            return Ok(None);
        };

        if Self::update_address(repo.as_ref(), info)? {
            return Ok(Some(StatsAction::UpdatedAddressStats));
        }

        let record = AddressStats {
            email: info.recipient.clone(),
            last_status: info.dsn_status.clone(),
            last_status_date: Utc::now(),
            spam: info.spam,
            diagnostic_code: info.diagnostic_code.clone(),
            temporary_failure_count: 0,
        };

        match repo.create(record) {
            Ok(_) => {
                tracing::debug!(recipient = %info.recipient, "Created address stats");
                Ok(Some(StatsAction::CreatedAddressStats))
            }
            Err(RepositoryError::AlreadyExists(_)) => {
                // Another run created it between our update and insert
                if Self::update_address(repo.as_ref(), info)? {
                    Ok(Some(StatsAction::UpdatedAddressStats))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e),
        }
    }

    fn update_address(repo: &dyn AddressStatsRepository, info: &FailureInfo) -> Result<bool> {
        let updated = repo.update_in_transaction(&info.recipient, &mut |stats| {
            stats.last_status = info.dsn_status.clone();
            stats.last_status_date = Utc::now();
            stats.spam = info.spam;
            stats.diagnostic_code = info.diagnostic_code.clone();
            if info.status == FailureStatus::TemporaryFailure {
                stats.temporary_failure_count += 1;
            }
        })?;

        if let Some(stats) = &updated {
            tracing::debug!(
                recipient = %stats.email,
                status = %info.status,
                temporary_failures = stats.temporary_failure_count,
                "Updated address stats"
            );
        }
        Ok(updated.is_some())
    }
}
