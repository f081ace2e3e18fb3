use super::{HandlerOutcome, MessageHandler};
use crate::mail::Message;

/// Out-of-office and vacation replies carry no information we act on
#[derive(Debug, Default, Clone)]
pub struct AutoresponderHandler;

impl MessageHandler for AutoresponderHandler {
    fn handle(&mut self, message: &Message) -> crate::Result<HandlerOutcome> {
        tracing::debug!(uid = message.uid(), subject = message.subject(), "Autoresponder");
        Ok(HandlerOutcome::Processed)
    }
}
