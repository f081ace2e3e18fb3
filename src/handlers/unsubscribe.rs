//! Unsubscribe requests

use super::{HandlerOutcome, MessageHandler};
use crate::database::MailingListDatabase;
use crate::mail::Message;
use std::sync::Arc;

/// Unsubscribes the sender of the message
pub struct UnsubscribeHandler {
    database: Arc<dyn MailingListDatabase>,
    readonly: bool,
}

impl UnsubscribeHandler {
    pub fn new(database: Arc<dyn MailingListDatabase>, readonly: bool) -> Self {
        Self { database, readonly }
    }
}

impl MessageHandler for UnsubscribeHandler {
    fn handle(&mut self, message: &Message) -> crate::Result<HandlerOutcome> {
        let Some(address) = message.sender() else {
            return Ok(HandlerOutcome::unprocessed("no sender address"));
        };

        let changed = if self.readonly {
            !self.database.is_unsubscribed(&address)?
        } else {
            self.database.unsubscribe_address(&address)?
        };

        if changed {
            if self.readonly {
                tracing::info!(uid = message.uid(), address = %address, "Would unsubscribe");
            } else {
                tracing::info!(uid = message.uid(), address = %address, "Unsubscribed");
            }
            Ok(HandlerOutcome::Unsubscribed { address })
        } else {
            tracing::debug!(uid = message.uid(), address = %address, "Already unsubscribed");
            Ok(HandlerOutcome::unprocessed(format!("{} already unsubscribed", address)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteMailingListDatabase;

    fn request() -> Message {
        Message::new(
            9,
            "From: Reader <Reader@Example.org>\r\nTo: unsubscribe@example.com\r\nSubject: unsubscribe\r\n\r\n",
        )
    }

    #[test]
    fn test_unsubscribes_sender() {
        let db = Arc::new(SqliteMailingListDatabase::open_in_memory().unwrap());
        let mut handler = UnsubscribeHandler::new(db.clone(), false);

        let outcome = handler.handle(&request()).unwrap();
        assert_eq!(
            outcome,
            HandlerOutcome::Unsubscribed {
                address: "reader@example.org".parse().unwrap()
            }
        );
        assert!(db
            .is_unsubscribed(&"reader@example.org".parse().unwrap())
            .unwrap());

        assert!(!handler.handle(&request()).unwrap().is_processed());
    }

    #[test]
    fn test_readonly_leaves_database_alone() {
        let db = Arc::new(SqliteMailingListDatabase::open_in_memory().unwrap());
        let mut handler = UnsubscribeHandler::new(db.clone(), true);

        assert!(handler.handle(&request()).unwrap().is_processed());
        assert!(!db
            .is_unsubscribed(&"reader@example.org".parse().unwrap())
            .unwrap());
    }

    #[test]
    fn test_readonly_matches_live_for_known_address() {
        let db = Arc::new(SqliteMailingListDatabase::open_in_memory().unwrap());
        UnsubscribeHandler::new(db.clone(), false)
            .handle(&request())
            .unwrap();

        let live = UnsubscribeHandler::new(db.clone(), false)
            .handle(&request())
            .unwrap();
        let dry = UnsubscribeHandler::new(db, true).handle(&request()).unwrap();
        assert_eq!(live.key(), "unprocessed");
        assert_eq!(dry, live);
    }

    #[test]
    fn test_missing_sender() {
        let db = Arc::new(SqliteMailingListDatabase::open_in_memory().unwrap());
        let mut handler = UnsubscribeHandler::new(db, false);
        let msg = Message::new(1, "Subject: unsubscribe\r\n\r\n");
        assert!(!handler.handle(&msg).unwrap().is_processed());
    }
}
