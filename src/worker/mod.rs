//! Consumer pool for the main queue.
//!
//! Every worker owns its own channel: it consumes, settles and publishes its
//! retries there, so no channel is ever used from two tasks.

pub mod processor;

use std::{sync::Arc, time::Duration};

use futures_util::{StreamExt, future::join_all};
use lapin::{
    Channel, Consumer,
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
};
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    clients::rbmq::{AmqpChannel, AmqpDelivery, InboundMessage, RabbitMqClient},
    error::BrokerError,
};

pub use processor::{MessageProcessor, ProcessorConfig};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub prefetch_count: u16,
    pub shutdown_grace: Duration,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
    shutdown_grace: Duration,
}

impl WorkerPool {
    /// Opens one channel per worker and starts consuming `queue`.
    ///
    /// Channel or consumer setup failures abort the whole pool; nothing is
    /// consumed until every worker is ready.
    pub async fn spawn(
        client: &RabbitMqClient,
        queue: &str,
        config: &WorkerConfig,
        processor: Arc<MessageProcessor>,
        cancellation_token: CancellationToken,
    ) -> Result<Self, BrokerError> {
        info!(worker_count = config.worker_count, queue, "Spawning consumer workers");

        let mut prepared = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let channel = client.create_confirm_channel().await?;
            let consumer_tag = format!("push_worker_{}", worker_id);
            let consumer =
                start_consumer(&channel, queue, &consumer_tag, config.prefetch_count).await?;
            prepared.push((worker_id, channel, consumer, consumer_tag));
        }

        let handles = prepared
            .into_iter()
            .map(|(worker_id, channel, consumer, consumer_tag)| {
                let worker = Worker {
                    id: worker_id,
                    channel,
                    consumer,
                    consumer_tag,
                    processor: Arc::clone(&processor),
                    cancellation_token: cancellation_token.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        info!(spawned_workers = handles.len(), "Started workers, waiting for messages");

        Ok(Self {
            handles,
            cancellation_token,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Stops consumption and waits for in-flight messages to settle.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();

        match timeout(self.shutdown_grace, join_all(self.handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task panicked");
                    }
                }
                info!("All workers stopped");
            }
            Err(_) => {
                warn!(
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "Workers did not stop within the shutdown grace period"
                );
            }
        }
    }
}

async fn start_consumer(
    channel: &Channel,
    queue: &str,
    consumer_tag: &str,
    prefetch_count: u16,
) -> Result<Consumer, BrokerError> {
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .map_err(|e| BrokerError::Channel(format!("failed to set QoS: {}", e)))?;

    channel
        .basic_consume(
            queue,
            consumer_tag,
            BasicConsumeOptions {
                no_ack: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Consume {
            queue: queue.to_string(),
            message: e.to_string(),
        })
}

struct Worker {
    id: usize,
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
    processor: Arc<MessageProcessor>,
    cancellation_token: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        info!(worker_id = self.id, "Worker started");
        let retry_channel = AmqpChannel::new(self.channel.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                next = self.consumer.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let delivery = AmqpDelivery::new(delivery);
                    let span = info_span!(
                        "message",
                        worker_id = self.id,
                        delivery_tag = delivery.delivery_tag(),
                        retry_count = delivery.retry_count(),
                    );
                    let outcome = self
                        .processor
                        .process(&delivery, &retry_channel)
                        .instrument(span)
                        .await;
                    debug!(worker_id = self.id, ?outcome, "Message settled");
                }
                Some(Err(e)) => {
                    error!(worker_id = self.id, error = %e, "Consumer failed, shutting down");
                    self.cancellation_token.cancel();
                    break;
                }
                None => {
                    if !self.cancellation_token.is_cancelled() {
                        error!(worker_id = self.id, "Consumer stream closed unexpectedly");
                        self.cancellation_token.cancel();
                    }
                    break;
                }
            }
        }

        self.stop().await;
    }

    async fn stop(self) {
        if self.channel.status().connected() {
            if let Err(e) = self
                .channel
                .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                .await
            {
                warn!(worker_id = self.id, error = %e, "Failed to cancel consumer");
            }

            // Prefetched but unsettled deliveries return to the queue here.
            if let Err(e) = self.channel.close(200, "worker stopped").await {
                warn!(worker_id = self.id, error = %e, "Failed to close worker channel");
            }
        }

        info!(worker_id = self.id, "Worker stopped");
    }
}
