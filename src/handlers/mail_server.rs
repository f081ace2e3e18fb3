//! Bounces and other delivery status notifications
//!
//! Parses the bounce, counts it against the mailing and the recipient, and
//! disables the recipient when the failure is permanent or the address has
//! failed temporarily too often.

use super::{HandlerOutcome, MessageHandler};
use crate::database::MailingListDatabase;
use crate::logging::ACTION_TARGET;
use crate::mail::Message;
use crate::parser::{FailureInfo, FailureInfoParser, FailureStatus};
use crate::stats::MailingStatsTracker;
use std::sync::Arc;

pub struct MailServerHandler {
    parser: FailureInfoParser,
    tracker: MailingStatsTracker,
    database: Arc<dyn MailingListDatabase>,
    max_temporary_failures: Option<u32>,
    readonly: bool,
}

impl MailServerHandler {
    pub fn new(
        parser: FailureInfoParser,
        tracker: MailingStatsTracker,
        database: Arc<dyn MailingListDatabase>,
        max_temporary_failures: Option<u32>,
        readonly: bool,
    ) -> Self {
        Self {
            parser,
            tracker,
            database,
            max_temporary_failures,
            readonly,
        }
    }

    pub fn tracker(&self) -> &MailingStatsTracker {
        &self.tracker
    }

    fn should_disable(&self, info: &FailureInfo) -> crate::Result<bool> {
        match info.status {
            FailureStatus::PermanentFailure => Ok(true),
            FailureStatus::TemporaryFailure => match self.max_temporary_failures {
                Some(max) => Ok(self.tracker.temporary_failure_count(&info.recipient)? >= max),
                None => Ok(false),
            },
            FailureStatus::Unknown => Ok(false),
        }
    }
}

impl MessageHandler for MailServerHandler {
    fn handle(&mut self, message: &Message) -> crate::Result<HandlerOutcome> {
        let Some(info) = self.parser.parse(message) else {
            tracing::warn!(
                uid = message.uid(),
                subject = message.subject(),
                "Could not find a failed recipient in bounce"
            );
            return Ok(HandlerOutcome::unprocessed("no failed recipient found"));
        };

        let stats = self.tracker.count_failure(&info)?;

        let mut disabled = false;
        if self.should_disable(&info)? {
            let full_status = info.full_status();
            if self.readonly {
                tracing::info!(
                    target: ACTION_TARGET,
                    uid = message.uid(),
                    recipient = %info.recipient,
                    full_status = %full_status,
                    "Would disable"
                );
            } else {
                let known = self.database.disable_emails_for_address(
                    &info.recipient,
                    info.status,
                    &full_status,
                )?;
                tracing::info!(
                    target: ACTION_TARGET,
                    uid = message.uid(),
                    recipient = %info.recipient,
                    full_status = %full_status,
                    changed = known,
                    "Disabled emails for address"
                );
            }
            disabled = true;
        }

        Ok(HandlerOutcome::Bounce {
            recipient: info.recipient,
            status: info.status,
            stats,
            disabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteMailingListDatabase;
    use crate::stats::{SqliteStatsStore, StatsAction};

    fn bounce(uid: u32, recipient: &str, status: &str) -> Message {
        Message::new(
            uid,
            format!(
                "From: MAILER-DAEMON@mx.example.net\r\nTo: bounces@example.com\r\nSubject: Delivery Status Notification (Failure)\r\nX-Failed-Recipients: {}\r\nContent-Type: text/plain\r\n\r\nDelivery failed.\r\nStatus: {}\r\n",
                recipient, status
            ),
        )
    }

    fn handler(
        max_temporary_failures: Option<u32>,
        readonly: bool,
    ) -> (MailServerHandler, Arc<SqliteMailingListDatabase>) {
        let store = Arc::new(SqliteStatsStore::open_in_memory().unwrap());
        let db = Arc::new(SqliteMailingListDatabase::open_in_memory().unwrap());
        let tracker = MailingStatsTracker::new(Some(store.clone()), Some(store));
        let handler = MailServerHandler::new(
            FailureInfoParser::new(),
            tracker,
            db.clone(),
            max_temporary_failures,
            readonly,
        );
        (handler, db)
    }

    #[test]
    fn test_permanent_failure_disables_address() {
        let (mut handler, db) = handler(None, false);
        let outcome = handler.handle(&bounce(1, "bob@y", "5.1.1")).unwrap();

        match outcome {
            HandlerOutcome::Bounce {
                recipient,
                status,
                stats,
                disabled,
            } => {
                assert_eq!(recipient.as_str(), "bob@y");
                assert_eq!(status, FailureStatus::PermanentFailure);
                assert_eq!(stats, vec![StatsAction::CreatedAddressStats]);
                assert!(disabled);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(db.disabled(&"bob@y".parse().unwrap()).unwrap().is_some());
    }

    #[test]
    fn test_temporary_failures_disable_at_threshold() {
        let (mut handler, db) = handler(Some(2), false);
        let addr = "carol@example.org".parse().unwrap();

        // created with count 0, then 1, then 2
        for uid in 1..=2 {
            handler.handle(&bounce(uid, "carol@example.org", "4.2.2")).unwrap();
            assert!(db.disabled(&addr).unwrap().is_none());
        }
        handler.handle(&bounce(3, "carol@example.org", "4.2.2")).unwrap();
        assert!(db.disabled(&addr).unwrap().is_some());
        assert_eq!(handler.tracker().temporary_failure_count(&addr).unwrap(), 2);
    }

    #[test]
    fn test_readonly_does_not_disable() {
        let (mut handler, db) = handler(None, true);
        let outcome = handler.handle(&bounce(1, "bob@y", "5.1.1")).unwrap();
        assert!(matches!(outcome, HandlerOutcome::Bounce { disabled: true, .. }));
        assert!(db.disabled(&"bob@y".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_unparseable_bounce_is_unprocessed() {
        let (mut handler, _db) = handler(None, false);
        let msg = Message::new(
            1,
            "From: MAILER-DAEMON@mx.example.net\r\nTo: bounces@example.com\r\nSubject: Returned mail\r\n\r\nSomething happened.\r\n",
        );
        let outcome = handler.handle(&msg).unwrap();
        assert_eq!(outcome.key(), "unprocessed");
    }
}
