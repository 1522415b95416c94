//! Single-owner publishing task for the intake path.
//!
//! Request handlers never touch the channel directly: they send a job over a
//! bounded queue and wait for the broker's confirmation to come back.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::{
    clients::rbmq::{OutboundChannel, OutboundMessage},
    error::{BrokerError, PublishError},
    models::{metrics::PipelineMetrics, notification::NotificationRequest},
};

pub const JSON_CONTENT_TYPE: &str = "application/json";

struct PublishJob {
    message: OutboundMessage,
    reply: oneshot::Sender<Result<(), BrokerError>>,
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub routing_key: String,
    pub buffer: usize,
}

#[derive(Clone)]
pub struct Publisher {
    jobs: mpsc::Sender<PublishJob>,
    exchange: String,
    routing_key: String,
    metrics: Arc<PipelineMetrics>,
}

impl Publisher {
    /// Starts the publishing task. It stops once every `Publisher` clone has
    /// been dropped and the queue is drained.
    pub fn spawn<C>(
        channel: C,
        config: PublisherConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, JoinHandle<()>)
    where
        C: OutboundChannel + 'static,
    {
        let (jobs, receiver) = mpsc::channel(config.buffer.max(1));
        let handle = tokio::spawn(run_publisher(channel, receiver));

        let publisher = Self {
            jobs,
            exchange: config.exchange,
            routing_key: config.routing_key,
            metrics,
        };

        (publisher, handle)
    }

    /// Durably enqueues one request. `Ok` means the broker confirmed it, not
    /// that it was delivered.
    pub async fn publish(&self, request: &NotificationRequest) -> Result<(), PublishError> {
        let body = serde_json::to_vec(request)?;

        let message = OutboundMessage {
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            body,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            correlation_id: Some(request.request_id.clone()),
            retry_count: None,
            persistent: true,
        };

        let (reply, outcome) = oneshot::channel();
        if self.jobs.send(PublishJob { message, reply }).await.is_err() {
            self.metrics.record_publish_failure();
            return Err(PublishError::Closed);
        }

        match outcome.await {
            Ok(Ok(())) => {
                self.metrics.record_published();
                debug!(request_id = %request.request_id, "Notification queued");
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.record_publish_failure();
                Err(PublishError::Broker(e))
            }
            Err(_) => {
                self.metrics.record_publish_failure();
                Err(PublishError::Closed)
            }
        }
    }
}

async fn run_publisher<C: OutboundChannel>(channel: C, mut jobs: mpsc::Receiver<PublishJob>) {
    info!("Publisher task started");

    while let Some(job) = jobs.recv().await {
        let result = channel.publish(job.message).await;
        if let Err(e) = &result {
            error!(error = %e, "Failed to publish notification");
        }
        // The caller may have gone away; nothing to do then.
        let _ = job.reply.send(result);
    }

    info!("Publisher task stopped");
}
