//! Retry/dead-letter decisions.
//!
//! Pure logic: given the retry counter carried on a message, decide whether a
//! failed delivery goes back through the delayed retry path or is dropped
//! into the dead-letter queue.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Ack the original, republish to the retry exchange with this counter.
    Retry { next_retry_count: u32 },
    /// Nack without requeue; the broker routes it to the dead-letter exchange.
    DeadLetter,
}

impl RetryPolicy {
    pub fn on_delivery_failure(&self, retry_count: u32) -> FailureAction {
        if retry_count < self.max_retries {
            FailureAction::Retry {
                next_retry_count: retry_count + 1,
            }
        } else {
            FailureAction::DeadLetter
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    MalformedPayload,
    UnsupportedType,
    MissingRecipient,
    RetriesExhausted,
}

impl Display for DeadLetterReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::MalformedPayload => write!(f, "malformed_payload"),
            DeadLetterReason::UnsupportedType => write!(f, "unsupported_type"),
            DeadLetterReason::MissingRecipient => write!(f, "missing_recipient"),
            DeadLetterReason::RetriesExhausted => write!(f, "retries_exhausted"),
        }
    }
}

/// Terminal state of one message occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded { provider_message_id: String },
    Retrying { next_retry_count: u32 },
    /// Original was acked but the retry publish failed: the message is gone.
    RetryLost { next_retry_count: u32 },
    DeadLettered { reason: DeadLetterReason },
    /// Ack or nack did not reach the broker; it still owns the original and
    /// will redeliver it once the channel goes away.
    SettlementFailed,
}
