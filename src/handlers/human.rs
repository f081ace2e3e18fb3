//! Human replies

use super::{HandlerOutcome, MessageHandler};
use crate::logging::ACTION_TARGET;
use crate::mail::{EmailAddress, Message};
use crate::MailSortError;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Outbound mail path used to forward human replies
pub trait MailSender: Send + Sync {
    fn forward(&self, message: &Message, to: &EmailAddress) -> anyhow::Result<()>;
}

/// Forwards recent human replies to a real inbox
pub struct HumanHandler {
    sender: Option<Arc<dyn MailSender>>,
    forward_to: Option<EmailAddress>,
    max_forward_days: Option<u32>,
    readonly: bool,
}

impl HumanHandler {
    pub fn new(
        sender: Option<Arc<dyn MailSender>>,
        forward_to: Option<EmailAddress>,
        max_forward_days: Option<u32>,
        readonly: bool,
    ) -> Self {
        Self {
            sender,
            forward_to,
            max_forward_days,
            readonly,
        }
    }

    fn is_recent(&self, message: &Message) -> bool {
        match self.max_forward_days {
            Some(days) => Utc::now() - message.received_at() <= Duration::days(i64::from(days)),
            None => true,
        }
    }
}

impl MessageHandler for HumanHandler {
    fn handle(&mut self, message: &Message) -> crate::Result<HandlerOutcome> {
        let (Some(sender), Some(to)) = (&self.sender, &self.forward_to) else {
            return Ok(HandlerOutcome::unprocessed("forwarding not configured"));
        };

        if !self.is_recent(message) {
            tracing::debug!(uid = message.uid(), "Too old to forward");
            return Ok(HandlerOutcome::unprocessed("too old to forward"));
        }

        if self.readonly {
            tracing::info!(target: ACTION_TARGET, uid = message.uid(), to = %to, "Would forward");
        } else {
            sender
                .forward(message, to)
                .map_err(|e| MailSortError::Forward(format!("{}: {:#}", to, e)))?;
            tracing::info!(target: ACTION_TARGET, uid = message.uid(), to = %to, "Forwarded");
        }

        Ok(HandlerOutcome::Forwarded { to: to.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(u32, String)>>,
        fail: bool,
    }

    impl MailSender for RecordingSender {
        fn forward(&self, message: &Message, to: &EmailAddress) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            self.sent
                .lock()
                .unwrap()
                .push((message.uid(), to.to_string()));
            Ok(())
        }
    }

    fn reply(days_old: i64) -> Message {
        Message::new(4, "From: reader@example.org\r\nSubject: Re: Weekly\r\n\r\nThanks!\r\n")
            .with_received_at(Utc::now() - Duration::days(days_old))
    }

    #[test]
    fn test_forwards_recent_reply() {
        let sender = Arc::new(RecordingSender::default());
        let mut handler = HumanHandler::new(
            Some(sender.clone()),
            Some("team@example.com".parse().unwrap()),
            Some(7),
            false,
        );

        let outcome = handler.handle(&reply(1)).unwrap();
        assert_eq!(
            outcome,
            HandlerOutcome::Forwarded {
                to: "team@example.com".parse().unwrap()
            }
        );
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_old_reply_is_not_forwarded() {
        let sender = Arc::new(RecordingSender::default());
        let mut handler = HumanHandler::new(
            Some(sender.clone()),
            Some("team@example.com".parse().unwrap()),
            Some(7),
            false,
        );

        assert!(!handler.handle(&reply(30)).unwrap().is_processed());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_without_sender_nothing_happens() {
        let mut handler =
            HumanHandler::new(None, Some("team@example.com".parse().unwrap()), None, false);
        assert!(!handler.handle(&reply(0)).unwrap().is_processed());
    }

    #[test]
    fn test_readonly_does_not_send() {
        let sender = Arc::new(RecordingSender::default());
        let mut handler = HumanHandler::new(
            Some(sender.clone()),
            Some("team@example.com".parse().unwrap()),
            None,
            true,
        );
        assert!(handler.handle(&reply(0)).unwrap().is_processed());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_failure_is_an_error() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let mut handler = HumanHandler::new(
            Some(sender),
            Some("team@example.com".parse().unwrap()),
            None,
            false,
        );
        let err = handler.handle(&reply(0)).unwrap_err();
        assert!(matches!(err, MailSortError::Forward(_)));
    }
}
