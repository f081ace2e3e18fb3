//! Integration tests for mailsort
//!
//! These tests run the whole pipeline, from configuration through
//! classification, parsing and accounting to mailbox actions.

use mailsort::config::{ActionOverrides, SorterConfig};
use mailsort::database::{MailingListDatabase, SqliteMailingListDatabase};
use mailsort::mail::{EmailAddress, Message, MessageType};
use mailsort::mailbox::{MailboxAction, MemoryMailbox};
use mailsort::runner::{self, RunOptions, RunSummary, Stores};
use mailsort::stats::{AddressStatsRepository, SqliteStatsStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Bounce in the terse form postfix-style MTAs produce
fn terse_dsn(uid: u32) -> Message {
    Message::new(
        uid,
        concat!(
            "From: mailer-daemon@x\r\n",
            "To: bounces@example.com\r\n",
            "Subject: Undelivered Mail Returned to Sender\r\n",
            "Content-Type: multipart/report\r\n",
            "\r\n",
            "Original-Recipient: rfc822;bob@y\r\n",
            "Action: failed\r\n",
            "Status: 5.1.1\r\n",
        ),
    )
}

/// Standard multipart/report bounce carrying the original List-Id
fn dsn(uid: u32, recipient: &str, action: &str, status: &str) -> Message {
    Message::new(
        uid,
        format!(
            concat!(
                "From: Mail Delivery System <MAILER-DAEMON@mx.example.net>\r\n",
                "To: bounces@example.com\r\n",
                "Subject: Undelivered Mail Returned to Sender\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: multipart/report; report-type=delivery-status; boundary=\"XX\"\r\n",
                "\r\n",
                "--XX\r\n",
                "Content-Type: text/plain\r\n",
                "\r\n",
                "Your message could not be delivered.\r\n",
                "\r\n",
                "--XX\r\n",
                "Content-Type: message/delivery-status\r\n",
                "\r\n",
                "Reporting-MTA: dns; mx.example.net\r\n",
                "\r\n",
                "Final-Recipient: rfc822; {recipient}\r\n",
                "Action: {action}\r\n",
                "Status: {status}\r\n",
                "Diagnostic-Code: smtp; {status} mailbox problem\r\n",
                "\r\n",
                "--XX\r\n",
                "Content-Type: text/rfc822-headers\r\n",
                "\r\n",
                "From: news@example.com\r\n",
                "To: {recipient}\r\n",
                "List-Id: Weekly News <weekly.example.com>\r\n",
                "Subject: This week\r\n",
                "\r\n",
                "--XX--\r\n",
            ),
            recipient = recipient,
            action = action,
            status = status
        ),
    )
}

fn unparseable_bounce(uid: u32) -> Message {
    Message::new(
        uid,
        "From: MAILER-DAEMON@mx.example.net\r\nTo: bounces@example.com\r\nSubject: Returned mail\r\n\r\nSomething went wrong somewhere.\r\n",
    )
}

fn human(uid: u32) -> Message {
    Message::new(
        uid,
        "From: Reader <reader@example.org>\r\nTo: news@example.com\r\nSubject: Re: This week\r\n\r\nGreat issue, thanks!\r\n",
    )
}

fn autoreply(uid: u32) -> Message {
    Message::new(
        uid,
        "From: away@example.org\r\nTo: news@example.com\r\nAuto-Submitted: auto-replied\r\nSubject: Out of office\r\n\r\nBack on Monday.\r\n",
    )
}

fn unsubscribe_request(uid: u32) -> Message {
    Message::new(
        uid,
        "From: Leaver <leaver@example.org>\r\nTo: unsubscribe@example.com\r\nSubject: please\r\n\r\nRemove me.\r\n",
    )
}

fn config() -> SorterConfig {
    let mut config = SorterConfig::new();
    config.message_batch_size = 2;
    config.max_temporary_failures = Some(3);
    config.unsubscribe_additional_address = Some("unsubscribe@example.com".to_string());
    config.actions.processed = MailboxAction::Read;
    config.actions.unprocessed = MailboxAction::Flag;
    config.actions_per_type.insert(
        MessageType::MailServer,
        ActionOverrides {
            processed: Some(MailboxAction::Move("Bounces".to_string())),
            unprocessed: None,
        },
    );
    config.actions_per_type.insert(
        MessageType::Autoresponder,
        ActionOverrides {
            processed: Some(MailboxAction::Delete),
            unprocessed: None,
        },
    );
    config
}

struct Harness {
    stats: Arc<SqliteStatsStore>,
    database: Arc<SqliteMailingListDatabase>,
    stores: Stores,
}

impl Harness {
    fn new() -> Self {
        let stats = Arc::new(SqliteStatsStore::open_in_memory().unwrap());
        let database = Arc::new(SqliteMailingListDatabase::open_in_memory().unwrap());
        let stores = Stores {
            mailings: Some(stats.clone()),
            addresses: Some(stats.clone()),
            mailing_list: database.clone(),
        };
        Self {
            stats,
            database,
            stores,
        }
    }

    fn run(&self, config: &SorterConfig, messages: Vec<Message>) -> (RunSummary, MemoryMailbox) {
        let mut session = MemoryMailbox::new().with_box("INBOX", messages);
        let mut sorter = runner::build_sorter(config, &self.stores, None).unwrap();
        let summary = runner::sort_mailboxes(config, &mut session, &mut sorter).unwrap();
        (summary, session)
    }
}

fn addr(s: &str) -> EmailAddress {
    s.parse().unwrap()
}

mod scenario_tests {
    use super::*;

    #[test]
    fn test_mailer_daemon_report_is_accounted() {
        let harness = Harness::new();
        let (summary, session) = harness.run(&config(), vec![terse_dsn(1)]);

        assert_eq!(summary.stats.type_stats(MessageType::MailServer).processed, 1);

        let stats = harness.stats.get_by_email(&addr("bob@y")).unwrap().unwrap();
        assert_eq!(stats.last_status, "5.1.1");
        assert_eq!(stats.temporary_failure_count, 0);

        assert!(harness.database.disabled(&addr("bob@y")).unwrap().is_some());
        assert_eq!(session.applied().len(), 1);
        assert_eq!(
            session.applied()[0].action,
            MailboxAction::Move("Bounces".to_string())
        );
    }

    #[test]
    fn test_unparseable_bounce_still_gets_an_action() {
        let harness = Harness::new();
        let mailing = harness
            .stats
            .register_mailing("weekly.example.com", None)
            .unwrap();

        let (summary, session) = harness.run(&config(), vec![unparseable_bounce(1)]);

        let mail_server = summary.stats.type_stats(MessageType::MailServer);
        assert_eq!(mail_server.total, 1);
        assert_eq!(mail_server.unprocessed, 1);
        assert_eq!(mail_server.failed, 0);

        assert_eq!(session.applied().len(), 1);
        assert_eq!(session.applied()[0].action, MailboxAction::Flag);
        assert_eq!(
            harness
                .stats
                .mailing(mailing.id)
                .unwrap()
                .unwrap()
                .undelivered_count,
            0
        );
    }

    #[test]
    fn test_bounce_counts_against_mailing() {
        let harness = Harness::new();
        let mailing = harness
            .stats
            .register_mailing("weekly.example.com", Some("Weekly"))
            .unwrap();

        harness.run(
            &config(),
            vec![
                dsn(1, "carol@example.org", "failed", "5.1.1"),
                dsn(2, "dave@example.org", "delayed", "4.2.2"),
            ],
        );

        let mailing = harness.stats.mailing(mailing.id).unwrap().unwrap();
        assert_eq!(mailing.undelivered_count, 2);
        assert!(harness
            .database
            .disabled(&addr("carol@example.org"))
            .unwrap()
            .is_some());
        assert!(harness
            .database
            .disabled(&addr("dave@example.org"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_repeated_temporary_failures_disable_address() {
        let harness = Harness::new();
        let messages = (1..=4)
            .map(|uid| dsn(uid, "dave@example.org", "delayed", "4.2.2"))
            .collect();

        harness.run(&config(), messages);

        let stats = harness
            .stats
            .get_by_email(&addr("dave@example.org"))
            .unwrap()
            .unwrap();
        assert_eq!(stats.temporary_failure_count, 3);
        let disabled = harness
            .database
            .disabled(&addr("dave@example.org"))
            .unwrap()
            .unwrap();
        assert_eq!(disabled.status, "temporary_failure");
    }
}

mod sorting_tests {
    use super::*;

    fn mixed() -> Vec<Message> {
        vec![
            human(1),
            dsn(2, "carol@example.org", "failed", "5.1.1"),
            autoreply(3),
            unsubscribe_request(4),
            dsn(5, "dave@example.org", "delayed", "4.2.2"),
        ]
    }

    #[test]
    fn test_every_type_gets_its_action() {
        let harness = Harness::new();
        let (summary, session) = harness.run(&config(), mixed());

        let actions: Vec<_> = session
            .applied()
            .iter()
            .map(|a| (a.uid, a.action.to_string()))
            .collect();
        assert_eq!(
            actions,
            vec![
                (1, "flag".to_string()),
                (2, "move:Bounces".to_string()),
                (3, "delete".to_string()),
                (4, "read".to_string()),
                (5, "move:Bounces".to_string()),
            ]
        );

        assert_eq!(summary.stats.total(), 5);
        assert_eq!(summary.stats.type_stats(MessageType::Human).total, 1);
        assert_eq!(summary.stats.type_stats(MessageType::MailServer).total, 2);
        assert_eq!(summary.stats.type_stats(MessageType::Autoresponder).total, 1);
        assert_eq!(summary.stats.type_stats(MessageType::Unsubscribe).total, 1);
        assert_eq!(summary.stats.action_count("move:Bounces"), 2);
        assert!(harness
            .database
            .is_unsubscribed(&addr("leaver@example.org"))
            .unwrap());
    }

    #[test]
    fn test_readonly_run_matches_live_run() {
        // one sender is already on record, so a live run cannot act on them again
        let messages = || {
            let mut messages = mixed();
            messages.push(Message::new(
                6,
                "From: repeat@example.org\r\nTo: unsubscribe@example.com\r\nSubject: please\r\n\r\nStill getting mail.\r\n",
            ));
            messages
        };
        let known = addr("repeat@example.org");

        let live = Harness::new();
        live.database.unsubscribe_address(&known).unwrap();
        let (live_summary, live_session) = live.run(&config(), messages());

        let mut readonly_config = config();
        readonly_config.readonly = true;
        let dry = Harness::new();
        dry.database.unsubscribe_address(&known).unwrap();
        let (dry_summary, dry_session) = dry.run(&readonly_config, messages());

        assert!(dry_session.applied().is_empty());
        assert_eq!(live_session.applied().len(), 6);

        let unsubscribes = dry_summary.stats.type_stats(MessageType::Unsubscribe);
        assert_eq!((unsubscribes.processed, unsubscribes.unprocessed), (1, 1));

        for message_type in MessageType::ALL {
            assert_eq!(
                dry_summary.stats.type_stats(message_type),
                live_summary.stats.type_stats(message_type)
            );
        }
        assert_eq!(dry_summary.stats.by_action(), live_summary.stats.by_action());

        for email in ["carol@example.org", "dave@example.org"] {
            let live_stats = live.stats.get_by_email(&addr(email)).unwrap().unwrap();
            let dry_stats = dry.stats.get_by_email(&addr(email)).unwrap().unwrap();
            assert_eq!(live_stats.last_status, dry_stats.last_status);
            assert_eq!(
                live_stats.temporary_failure_count,
                dry_stats.temporary_failure_count
            );
        }

        assert!(dry_summary.actions.iter().all(|a| !a.applied));
        assert!(dry
            .database
            .disabled(&addr("carol@example.org"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_summary_serializes() {
        let harness = Harness::new();
        let (summary, _) = harness.run(&config(), vec![human(1)]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["mailboxes"][0]["mailbox"], "INBOX");
        assert_eq!(json["actions"][0]["action"], "flag");
    }
}

mod maildir_tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn make_maildir(root: &Path) {
        for sub in ["cur", "new", "tmp"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
    }

    fn deliver(root: &Path, name: &str, message: &Message) {
        fs::write(root.join("new").join(name), message.raw()).unwrap();
    }

    fn count_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_run_against_maildir() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("Maildir");
        make_maildir(&root);
        deliver(&root, "1000.a.host", &dsn(0, "carol@example.org", "failed", "5.1.1"));
        deliver(&root, "1001.b.host", &human(0));

        let mut config = config();
        config.maildir.path = root.clone();
        config.database.path = Some(temp_dir.path().join("mailsort.db"));

        let summary = runner::run(&config, RunOptions::default()).unwrap();
        assert_eq!(summary.mailboxes[0].fetched, 2);
        assert_eq!(count_files(&root.join("Bounces").join("cur")), 1);

        // Nothing left to sort on the second pass
        let summary = runner::run(&config, RunOptions::default()).unwrap();
        assert_eq!(summary.mailboxes[0].fetched, 0);

        let stats = SqliteStatsStore::open(temp_dir.path().join("mailsort.db")).unwrap();
        assert!(stats
            .get_by_email(&addr("carol@example.org"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_readonly_option_leaves_maildir_alone() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("Maildir");
        make_maildir(&root);
        deliver(&root, "1000.a.host", &dsn(0, "carol@example.org", "failed", "5.1.1"));

        let mut config = config();
        config.maildir.path = root.clone();

        let summary = runner::run(
            &config,
            RunOptions {
                readonly: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(summary.readonly);
        assert_eq!(count_files(&root.join("new")), 1);
        assert!(!root.join("Bounces").exists());
    }

    #[test]
    fn test_missing_maildir_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config();
        config.maildir.path = temp_dir.path().join("nope");

        let err = runner::run(&config, RunOptions::default()).unwrap_err();
        assert!(err.is_fatal());
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_yaml_config_drives_a_run() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs_write(
            &path,
            r#"
message_batch_size: 10
actions:
  processed: read
  unprocessed: none
actions_per_type:
  autoresponder:
    processed: delete
unsubscribe_additional_address: unsubscribe@example.com
"#,
        );

        let config = SorterConfig::load(&path).unwrap();
        let harness = Harness::new();
        let (_, session) = harness.run(&config, vec![autoreply(1), human(2)]);

        let actions: Vec<_> = session
            .applied()
            .iter()
            .map(|a| (a.uid, a.action.clone()))
            .collect();
        assert_eq!(
            actions,
            vec![(1, MailboxAction::Delete), (2, MailboxAction::None)]
        );
    }

    fn fs_write(path: &std::path::Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }
}
