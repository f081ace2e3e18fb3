//! Prometheus metrics for sorter runs
//!
//! Counters are registered in the default registry on first use and can be
//! rendered with [`gather_metrics`] (the CLI's `--metrics` flag).

use crate::MailSortError;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter: sorted messages by type and handler outcome
    pub static ref MESSAGES: CounterVec = register_counter_vec!(
        "mailsort_messages_total",
        "Messages sorted by type and outcome",
        &["message_type", "outcome"]
    )
    .expect("Failed to create messages metric");

    /// Counter: mailbox actions applied (or suppressed in read-only runs)
    pub static ref ACTIONS: CounterVec = register_counter_vec!(
        "mailsort_actions_total",
        "Mailbox actions by kind",
        &["action"]
    )
    .expect("Failed to create actions metric");

    /// Counter: handler failures by message type
    pub static ref HANDLER_ERRORS: CounterVec = register_counter_vec!(
        "mailsort_handler_errors_total",
        "Handler errors by message type",
        &["message_type"]
    )
    .expect("Failed to create handler_errors metric");

    /// Histogram: time to sort one mailbox (seconds)
    pub static ref SORT_DURATION: HistogramVec = register_histogram_vec!(
        "mailsort_sort_duration_seconds",
        "Duration of sorting one mailbox",
        &["mailbox"],
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .expect("Failed to create sort_duration metric");
}

pub fn record_message(message_type: &str, outcome: &str) {
    MESSAGES.with_label_values(&[message_type, outcome]).inc();
}

pub fn record_action(action: &str) {
    ACTIONS.with_label_values(&[action]).inc();
}

pub fn record_handler_error(message_type: &str) {
    HANDLER_ERRORS.with_label_values(&[message_type]).inc();
}

pub fn record_sort_duration(mailbox: &str, duration_secs: f64) {
    SORT_DURATION
        .with_label_values(&[mailbox])
        .observe(duration_secs);
}

/// Encode all metrics as Prometheus text format
pub fn gather_metrics() -> crate::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| MailSortError::Other(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| MailSortError::Other(format!("Metrics are not UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_exported() {
        record_message("mail_server", "processed");
        record_action("move");
        record_handler_error("human");
        record_sort_duration("INBOX", 0.2);

        let output = gather_metrics().unwrap();
        assert!(output.contains("mailsort_messages_total"));
        assert!(output.contains("mailsort_actions_total"));
        assert!(output.contains("mailsort_handler_errors_total"));
        assert!(output.contains("mailsort_sort_duration_seconds"));
    }
}
