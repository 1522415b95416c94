use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions, ConfirmSelectOptions},
    types::{AMQPValue, FieldTable, ShortString},
};
use tracing::{debug, info, warn};

use crate::error::BrokerError;

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A message handed to a worker, abstracted away from the AMQP client.
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn body(&self) -> &[u8];
    fn content_type(&self) -> Option<&str>;
    fn correlation_id(&self) -> Option<&str>;
    /// Value of `x-retry-count`, 0 when absent or unreadable.
    fn retry_count(&self) -> u32;
    async fn ack(&self) -> Result<(), BrokerError>;
    /// Negative-ack without requeue.
    async fn reject(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub retry_count: Option<u32>,
    pub persistent: bool,
}

/// Publishing side of a channel.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;
}

pub struct RabbitMqClient {
    connection: Connection,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str) -> Result<Self, BrokerError> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!("RabbitMQ connection established");

        Ok(Self { connection })
    }

    pub async fn create_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Channel(e.to_string()))
    }

    /// Channel with publisher confirms enabled.
    pub async fn create_confirm_channel(&self) -> Result<Channel, BrokerError> {
        let channel = self.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Channel(format!("confirm mode refused: {}", e)))?;
        Ok(channel)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Ok(());
        }

        self.connection
            .close(200, "shutting down")
            .await
            .map_err(|e| BrokerError::Connection(format!("close failed: {}", e)))?;

        info!("RabbitMQ connection closed");
        Ok(())
    }
}

/// Reads the retry counter out of message headers.
///
/// Absent, negative or non-integer values count as 0.
pub fn retry_count_from_headers(headers: Option<&FieldTable>) -> u32 {
    let Some(value) = headers.and_then(|table| table.inner().get(RETRY_COUNT_HEADER)) else {
        return 0;
    };

    let count: i128 = match value {
        AMQPValue::ShortShortInt(v) => (*v).into(),
        AMQPValue::ShortShortUInt(v) => (*v).into(),
        AMQPValue::ShortInt(v) => (*v).into(),
        AMQPValue::ShortUInt(v) => (*v).into(),
        AMQPValue::LongInt(v) => (*v).into(),
        AMQPValue::LongUInt(v) => (*v).into(),
        AMQPValue::LongLongInt(v) => (*v).into(),
        other => {
            warn!(value = ?other, "Ignoring non-integer retry counter header");
            return 0;
        }
    };

    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

pub fn retry_count_header(retry_count: u32) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(RETRY_COUNT_HEADER),
        AMQPValue::LongLongInt(retry_count.into()),
    );
    headers
}

fn properties_for(message: &OutboundMessage) -> BasicProperties {
    let mut properties = BasicProperties::default();

    if message.persistent {
        properties = properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(content_type) = &message.content_type {
        properties = properties.with_content_type(content_type.as_str().into());
    }
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties
            .with_correlation_id(correlation_id.as_str().into())
            .with_message_id(correlation_id.as_str().into());
    }
    if let Some(retry_count) = message.retry_count {
        properties = properties.with_headers(retry_count_header(retry_count));
    }

    properties
}

/// Lapin channel in confirm mode.
///
/// Each owner publishes from a single task, so the channel is never written
/// to concurrently.
pub struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl OutboundChannel for AmqpChannel {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        let properties = properties_for(&message);

        let confirm = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish {
                exchange: message.exchange.clone(),
                message: e.to_string(),
            })?;

        let confirmation = confirm.await.map_err(|e| BrokerError::Publish {
            exchange: message.exchange.clone(),
            message: e.to_string(),
        })?;

        if confirmation.is_nack() {
            return Err(BrokerError::PublishNacked {
                exchange: message.exchange,
            });
        }

        debug!(
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            "Message confirmed by broker"
        );

        Ok(())
    }
}

const NOT_SENT: &str = "channel poisoned or delivery already settled";

/// lapin reports `Ok(false)` when a settlement was never sent to the broker.
/// The broker still owns the delivery then, so it must not count as settled.
fn require_sent(sent: bool, not_sent: impl FnOnce() -> BrokerError) -> Result<(), BrokerError> {
    if sent { Ok(()) } else { Err(not_sent()) }
}

pub struct AmqpDelivery {
    delivery: Delivery,
}

impl AmqpDelivery {
    pub fn new(delivery: Delivery) -> Self {
        Self { delivery }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }
}

#[async_trait]
impl InboundMessage for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    fn content_type(&self) -> Option<&str> {
        self.delivery
            .properties
            .content_type()
            .as_ref()
            .map(|value| value.as_str())
    }

    fn correlation_id(&self) -> Option<&str> {
        self.delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|value| value.as_str())
    }

    fn retry_count(&self) -> u32 {
        retry_count_from_headers(self.delivery.properties.headers().as_ref())
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        let delivery_tag = self.delivery.delivery_tag;
        let sent = self
            .delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Acknowledge {
                delivery_tag,
                message: e.to_string(),
            })?;

        require_sent(sent, || BrokerError::Acknowledge {
            delivery_tag,
            message: NOT_SENT.to_string(),
        })
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        let delivery_tag = self.delivery.delivery_tag;
        let sent = self
            .delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map_err(|e| BrokerError::Reject {
                delivery_tag,
                message: e.to_string(),
            })?;

        require_sent(sent, || BrokerError::Reject {
            delivery_tag,
            message: NOT_SENT.to_string(),
        })
    }
}
