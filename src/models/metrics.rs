use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::models::retry::{DeadLetterReason, Outcome};

/// Counters shared by the publisher and every worker.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    published: AtomicU64,
    publish_failures: AtomicU64,
    received: AtomicU64,
    succeeded: AtomicU64,
    delivery_failures: AtomicU64,
    retried: AtomicU64,
    retry_publish_failures: AtomicU64,
    ack_failures: AtomicU64,
    dead_lettered_malformed: AtomicU64,
    dead_lettered_unsupported_type: AtomicU64,
    dead_lettered_missing_recipient: AtomicU64,
    dead_lettered_retries_exhausted: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub succeeded: u64,
    pub delivery_failures: u64,
    pub retried: u64,
    pub retry_publish_failures: u64,
    pub ack_failures: u64,
    pub dead_lettered: DeadLetterCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterCounts {
    pub malformed_payload: u64,
    pub unsupported_type: u64,
    pub missing_recipient: u64,
    pub retries_exhausted: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded { .. } => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Retrying { .. } => {
                self.retried.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::RetryLost { .. } => {
                self.retry_publish_failures.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::SettlementFailed => {
                self.ack_failures.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::DeadLettered { reason } => {
                let counter = match reason {
                    DeadLetterReason::MalformedPayload => &self.dead_lettered_malformed,
                    DeadLetterReason::UnsupportedType => &self.dead_lettered_unsupported_type,
                    DeadLetterReason::MissingRecipient => &self.dead_lettered_missing_recipient,
                    DeadLetterReason::RetriesExhausted => &self.dead_lettered_retries_exhausted,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            retry_publish_failures: self.retry_publish_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            dead_lettered: DeadLetterCounts {
                malformed_payload: self.dead_lettered_malformed.load(Ordering::Relaxed),
                unsupported_type: self.dead_lettered_unsupported_type.load(Ordering::Relaxed),
                missing_recipient: self.dead_lettered_missing_recipient.load(Ordering::Relaxed),
                retries_exhausted: self.dead_lettered_retries_exhausted.load(Ordering::Relaxed),
            },
        }
    }
}
