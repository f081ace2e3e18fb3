//! Run bootstrapping
//!
//! Builds the classifier, parser, tracker, handlers and sorter from a
//! [`SorterConfig`], then sorts every configured mailbox over one session.

use crate::classifier::MessageClassifier;
use crate::config::{validate_config_result, SorterConfig};
use crate::database::{LoggingMailingListDatabase, MailingListDatabase, SqliteMailingListDatabase};
use crate::handlers::{
    AutoresponderHandler, HandlerSet, HumanHandler, MailSender, MailServerHandler,
    UnsubscribeHandler,
};
use crate::mail::EmailAddress;
use crate::mailbox::{MaildirMailbox, MailboxSession};
use crate::parser::FailureInfoParser;
use crate::sorter::{ActionRecord, MailboxSorter, MailboxSorterStatsCollector, SortReport};
use crate::stats::{AddressStatsRepository, MailingRepository, MailingStatsTracker, SqliteStatsStore};
use crate::{MailSortError, Result};
use serde::Serialize;
use std::sync::Arc;

/// Overrides and injected collaborators for one run
#[derive(Default)]
pub struct RunOptions {
    /// Force a read-only run regardless of the configuration
    pub readonly: bool,
    /// Outbound path for forwarding human replies
    pub mail_sender: Option<Arc<dyn MailSender>>,
    /// Mailing-list database to report to instead of the configured one
    pub mailing_list_database: Option<Arc<dyn MailingListDatabase>>,
}

/// Repositories and databases the handlers write to
#[derive(Clone)]
pub struct Stores {
    pub mailings: Option<Arc<dyn MailingRepository>>,
    pub addresses: Option<Arc<dyn AddressStatsRepository>>,
    pub mailing_list: Arc<dyn MailingListDatabase>,
}

impl Stores {
    /// Open the stores named by the configuration
    ///
    /// Without a database path, statistics live in memory for this run and
    /// mailing-list updates are only logged.
    pub fn from_config(config: &SorterConfig) -> Result<Self> {
        match &config.database.path {
            Some(path) => {
                let stats = Arc::new(SqliteStatsStore::open(path)?);
                let mailing_list = Arc::new(SqliteMailingListDatabase::open(path)?);
                Ok(Self {
                    mailings: Some(stats.clone()),
                    addresses: Some(stats),
                    mailing_list,
                })
            }
            None => {
                tracing::warn!("No database configured, statistics will not be kept");
                let stats = Arc::new(SqliteStatsStore::open_in_memory()?);
                Ok(Self {
                    mailings: Some(stats.clone()),
                    addresses: Some(stats),
                    mailing_list: Arc::new(LoggingMailingListDatabase),
                })
            }
        }
    }
}

/// Result of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub readonly: bool,
    pub mailboxes: Vec<SortReport>,
    pub stats: MailboxSorterStatsCollector,
    pub actions: Vec<ActionRecord>,
}

fn parse_address(field: &str, value: Option<&str>) -> Result<Option<EmailAddress>> {
    value
        .map(|v| {
            EmailAddress::new(v)
                .map_err(|e| MailSortError::Config(format!("{}: {}: {}", field, v, e)))
        })
        .transpose()
}

/// Wire up a sorter from configuration and stores
pub fn build_sorter(
    config: &SorterConfig,
    stores: &Stores,
    mail_sender: Option<Arc<dyn MailSender>>,
) -> Result<MailboxSorter> {
    let unsubscribe_address = parse_address(
        "unsubscribe_additional_address",
        config.unsubscribe_additional_address.as_deref(),
    )?;
    let forward_to = parse_address("forward_to", config.forward_to.as_deref())?;

    let tracker = MailingStatsTracker::new(stores.mailings.clone(), stores.addresses.clone());
    let handlers = HandlerSet {
        human: Box::new(HumanHandler::new(
            mail_sender,
            forward_to,
            config.max_forward_days,
            config.readonly,
        )),
        mail_server: Box::new(MailServerHandler::new(
            FailureInfoParser::new(),
            tracker,
            stores.mailing_list.clone(),
            config.max_temporary_failures,
            config.readonly,
        )),
        autoresponder: Box::new(AutoresponderHandler),
        unsubscribe: Box::new(UnsubscribeHandler::new(
            stores.mailing_list.clone(),
            config.readonly,
        )),
    };

    Ok(MailboxSorter::new(
        config.clone(),
        MessageClassifier::new(unsubscribe_address),
        handlers,
    ))
}

/// Sort every configured mailbox over an already constructed session
pub fn sort_mailboxes(
    config: &SorterConfig,
    session: &mut dyn MailboxSession,
    sorter: &mut MailboxSorter,
) -> Result<RunSummary> {
    if config.readonly {
        tracing::info!("Read-only run: no mailbox modifications will be made");
    }

    tracing::debug!("Initializing mailbox session");
    session.initialize()?;

    let mut collector = MailboxSorterStatsCollector::new(config.readonly);
    let mut sort_all = || -> Result<Vec<SortReport>> {
        let mut reports = Vec::with_capacity(config.mailboxes.len());
        for name in &config.mailboxes {
            tracing::info!(mailbox = %name, "Processing mailbox");
            session.set_box_name(name)?;
            reports.push(sorter.sort(session, name, &mut collector)?);
        }
        Ok(reports)
    };

    let reports = match sort_all() {
        Ok(reports) => reports,
        Err(e) => {
            if let Err(close_err) = session.close().and_then(|_| session.end()) {
                tracing::warn!(error = %close_err, "Failed to close mailbox session");
            }
            return Err(e);
        }
    };

    collector.log_stats();
    session.close()?;
    session.end()?;
    tracing::info!("Done");

    Ok(RunSummary {
        readonly: config.readonly,
        mailboxes: reports,
        stats: collector,
        actions: sorter.action_log().records().to_vec(),
    })
}

/// Run the sorter against the configured Maildir store
pub fn run(config: &SorterConfig, options: RunOptions) -> Result<RunSummary> {
    validate_config_result(config)?;

    let mut config = config.clone();
    config.readonly |= options.readonly;

    let mut stores = Stores::from_config(&config)?;
    if let Some(database) = options.mailing_list_database {
        stores.mailing_list = database;
    }

    let mut sorter = build_sorter(&config, &stores, options.mail_sender)?;
    let mut session = MaildirMailbox::new(&config.maildir.path, config.maildir.expunge_on_close);

    sort_mailboxes(&config, &mut session, &mut sorter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::MemoryMailbox;
    use crate::mail::Message;

    #[test]
    fn test_invalid_addresses_are_config_errors() {
        let mut config = SorterConfig::new();
        config.forward_to = Some("@".to_string());
        let stores = Stores::from_config(&config).unwrap();
        let result = build_sorter(&config, &stores, None);
        assert!(matches!(result, Err(MailSortError::Config(_))));
    }

    #[test]
    fn test_missing_mailbox_is_fatal() {
        let mut config = SorterConfig::new();
        config.mailboxes = vec!["Missing".to_string()];
        let stores = Stores::from_config(&config).unwrap();
        let mut sorter = build_sorter(&config, &stores, None).unwrap();
        let mut session = MemoryMailbox::new().with_box("INBOX", vec![]);

        let err = sort_mailboxes(&config, &mut session, &mut sorter).unwrap_err();
        assert!(err.is_fatal());
        assert!(!session.is_initialized());
    }

    #[test]
    fn test_session_closed_after_failing_box() {
        let mut config = SorterConfig::new();
        config.mailboxes = vec!["INBOX".to_string(), "Missing".to_string()];
        let stores = Stores::from_config(&config).unwrap();
        let mut sorter = build_sorter(&config, &stores, None).unwrap();
        let mut session = MemoryMailbox::new().with_box("INBOX", vec![]);

        assert!(sort_mailboxes(&config, &mut session, &mut sorter).is_err());
        assert_eq!(session.closed_boxes(), ["INBOX".to_string()]);
        assert!(!session.is_initialized());
    }

    #[test]
    fn test_sorts_every_mailbox() {
        let mut config = SorterConfig::new();
        config.mailboxes = vec!["INBOX".to_string(), "Bounces".to_string()];
        let stores = Stores::from_config(&config).unwrap();
        let mut sorter = build_sorter(&config, &stores, None).unwrap();
        let mut session = MemoryMailbox::new()
            .with_box("INBOX", vec![Message::new(1, "From: a@b.org\r\nSubject: hi\r\n\r\nhello\r\n")])
            .with_box("Bounces", vec![]);

        let summary = sort_mailboxes(&config, &mut session, &mut sorter).unwrap();
        assert_eq!(summary.mailboxes.len(), 2);
        assert_eq!(summary.stats.total(), 1);
        assert_eq!(session.closed_boxes(), ["INBOX".to_string(), "Bounces".to_string()]);
        assert!(!session.is_initialized());
    }
}
