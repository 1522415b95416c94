use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        adapter::DeliveryAdapter,
        rbmq::{InboundMessage, OutboundChannel, OutboundMessage},
    },
    error::DeliveryError,
    models::{
        metrics::PipelineMetrics,
        notification::{NotificationRequest, NotificationType},
        retry::{DeadLetterReason, FailureAction, Outcome, RetryPolicy},
    },
};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub retry_policy: RetryPolicy,
    pub retry_exchange: String,
    pub retry_routing_key: String,
    pub default_push_token: Option<String>,
    pub delivery_timeout: Duration,
}

/// Drives one message occurrence from receipt to a terminal outcome.
pub struct MessageProcessor {
    adapter: Arc<dyn DeliveryAdapter>,
    config: ProcessorConfig,
    metrics: Arc<PipelineMetrics>,
}

impl MessageProcessor {
    pub fn new(
        adapter: Arc<dyn DeliveryAdapter>,
        config: ProcessorConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            adapter,
            config,
            metrics,
        }
    }

    /// Settles `message` exactly once. Retries are published on `retry_channel`.
    pub async fn process<M>(&self, message: &M, retry_channel: &dyn OutboundChannel) -> Outcome
    where
        M: InboundMessage + ?Sized,
    {
        self.metrics.record_received();
        let outcome = self.handle(message, retry_channel).await;
        self.metrics.record_outcome(&outcome);
        outcome
    }

    async fn handle<M>(&self, message: &M, retry_channel: &dyn OutboundChannel) -> Outcome
    where
        M: InboundMessage + ?Sized,
    {
        let retry_count = message.retry_count();

        let request = match serde_json::from_slice::<NotificationRequest>(message.body()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, retry_count, "Failed to decode message body, dead-lettering");
                return dead_letter(message, DeadLetterReason::MalformedPayload).await;
            }
        };

        info!(
            request_id = %request.request_id,
            retry_count,
            "Processing notification"
        );

        if request.notification_type != NotificationType::Push {
            warn!(
                request_id = %request.request_id,
                notification_type = %request.notification_type,
                "Unsupported notification type, dead-lettering"
            );
            return dead_letter(message, DeadLetterReason::UnsupportedType).await;
        }

        let Some(token) = request.recipient_token(self.config.default_push_token.as_deref()) else {
            warn!(
                request_id = %request.request_id,
                "No recipient token on request and no default configured, dead-lettering"
            );
            return dead_letter(message, DeadLetterReason::MissingRecipient).await;
        };

        match self.deliver(token, &request).await {
            Ok(provider_message_id) => match message.ack().await {
                Ok(()) => {
                    info!(
                        request_id = %request.request_id,
                        provider_message_id = %provider_message_id,
                        "Notification delivered"
                    );
                    Outcome::Succeeded {
                        provider_message_id,
                    }
                }
                Err(e) => {
                    error!(error = %e, request_id = %request.request_id, "Failed to ack delivered message");
                    Outcome::SettlementFailed
                }
            },
            Err(e) => {
                self.metrics.record_delivery_failure();
                warn!(
                    error = %e,
                    request_id = %request.request_id,
                    retry_count,
                    "Delivery attempt failed"
                );
                self.on_delivery_failure(message, retry_count, &request.request_id, retry_channel)
                    .await
            }
        }
    }

    async fn deliver(
        &self,
        token: &str,
        request: &NotificationRequest,
    ) -> Result<String, DeliveryError> {
        match timeout(self.config.delivery_timeout, self.adapter.send(token, request)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.delivery_timeout)),
        }
    }

    async fn on_delivery_failure<M>(
        &self,
        message: &M,
        retry_count: u32,
        request_id: &str,
        retry_channel: &dyn OutboundChannel,
    ) -> Outcome
    where
        M: InboundMessage + ?Sized,
    {
        let next_retry_count = match self.config.retry_policy.on_delivery_failure(retry_count) {
            FailureAction::Retry { next_retry_count } => next_retry_count,
            FailureAction::DeadLetter => {
                warn!(
                    request_id,
                    max_retries = self.config.retry_policy.max_retries,
                    "Max retries exceeded, dead-lettering"
                );
                return dead_letter(message, DeadLetterReason::RetriesExhausted).await;
            }
        };

        // Ack first so only one live copy of this attempt ever exists.
        if let Err(e) = message.ack().await {
            error!(error = %e, request_id, "Failed to ack message before retry");
            return Outcome::SettlementFailed;
        }

        let retry = OutboundMessage {
            exchange: self.config.retry_exchange.clone(),
            routing_key: self.config.retry_routing_key.clone(),
            body: message.body().to_vec(),
            content_type: message.content_type().map(str::to_string),
            correlation_id: message.correlation_id().map(str::to_string),
            retry_count: Some(next_retry_count),
            persistent: true,
        };

        match retry_channel.publish(retry).await {
            Ok(()) => {
                debug!(request_id, next_retry_count, "Message scheduled for retry");
                Outcome::Retrying { next_retry_count }
            }
            Err(e) => {
                error!(
                    error = %e,
                    request_id,
                    next_retry_count,
                    "Retry publish failed after ack, message lost"
                );
                Outcome::RetryLost { next_retry_count }
            }
        }
    }
}

async fn dead_letter<M>(message: &M, reason: DeadLetterReason) -> Outcome
where
    M: InboundMessage + ?Sized,
{
    match message.reject().await {
        Ok(()) => Outcome::DeadLettered { reason },
        Err(e) => {
            error!(error = %e, %reason, "Failed to reject message");
            Outcome::SettlementFailed
        }
    }
}
