use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use lapin::options::{ExchangeDeleteOptions, QueueDeleteOptions};
use push_relay::{
    clients::{
        adapter::DeliveryAdapter,
        rbmq::{InboundMessage, OutboundChannel, OutboundMessage, RabbitMqClient},
        topology::TopologyConfig,
    },
    config::Config,
    error::{BrokerError, DeliveryError},
    models::{metrics::PipelineMetrics, notification::NotificationRequest, retry::RetryPolicy},
    worker::{MessageProcessor, ProcessorConfig},
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
}

/// In-memory delivery that records how it was settled.
pub struct FakeDelivery {
    body: Vec<u8>,
    content_type: Option<String>,
    retry_count: u32,
    settlements: Mutex<Vec<Settlement>>,
    fail_settlement: bool,
}

impl FakeDelivery {
    pub fn new(body: impl Into<Vec<u8>>, retry_count: u32) -> Self {
        Self {
            body: body.into(),
            content_type: Some("application/json".to_string()),
            retry_count,
            settlements: Mutex::new(Vec::new()),
            fail_settlement: false,
        }
    }

    pub fn failing_settlement(mut self) -> Self {
        self.fail_settlement = true;
        self
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().unwrap().clone()
    }

    fn settle(&self, settlement: Settlement) -> Result<(), BrokerError> {
        if self.fail_settlement {
            return Err(BrokerError::Acknowledge {
                delivery_tag: 1,
                message: "channel closed".to_string(),
            });
        }
        self.settlements.lock().unwrap().push(settlement);
        Ok(())
    }
}

#[async_trait]
impl InboundMessage for FakeDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn correlation_id(&self) -> Option<&str> {
        None
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle(Settlement::Acked)
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.settle(Settlement::Rejected)
    }
}

/// Records every publish; optionally refuses them. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    published: Arc<Mutex<Vec<OutboundMessage>>>,
    fail: bool,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        Self {
            published: Arc::default(),
            fail: true,
        }
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        if self.fail {
            return Err(BrokerError::Publish {
                exchange: message.exchange,
                message: "connection reset".to_string(),
            });
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

pub enum Reply {
    Sent(&'static str),
    /// Succeeds after the given number of milliseconds.
    Slow(u64, &'static str),
    Fail,
    Hang,
}

/// Adapter that plays back scripted replies, then succeeds.
pub struct ScriptedAdapter {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicU32,
    tokens: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicU32::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing(times: usize) -> Self {
        Self::new((0..times).map(|_| Reply::Fail).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryAdapter for ScriptedAdapter {
    async fn send(
        &self,
        recipient_token: &str,
        _request: &NotificationRequest,
    ) -> Result<String, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(recipient_token.to_string());

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Ok("projects/test/messages/default".to_string()),
            Some(Reply::Sent(id)) => Ok(id.to_string()),
            Some(Reply::Slow(delay_ms, id)) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(id.to_string())
            }
            Some(Reply::Fail) => Err(DeliveryError::Rejected {
                status_code: 503,
                body: "UNAVAILABLE".to_string(),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".to_string())
            }
        }
    }
}

pub fn processor_config(default_push_token: Option<&str>) -> ProcessorConfig {
    ProcessorConfig {
        retry_policy: RetryPolicy { max_retries: 5 },
        retry_exchange: "retry-notifs_ex".to_string(),
        retry_routing_key: "retried-messages".to_string(),
        default_push_token: default_push_token.map(str::to_string),
        delivery_timeout: Duration::from_millis(200),
    }
}

pub fn processor(
    adapter: Arc<ScriptedAdapter>,
    config: ProcessorConfig,
) -> (MessageProcessor, Arc<PipelineMetrics>) {
    let metrics = Arc::new(PipelineMetrics::new());
    (
        MessageProcessor::new(adapter, config, Arc::clone(&metrics)),
        metrics,
    )
}

pub fn push_body(token: Option<&str>) -> Vec<u8> {
    let mut body = serde_json::json!({
        "notification_type": "push",
        "request_id": "r1",
        "variables": {"name": "Ann", "link": "http://x"}
    });
    if let Some(token) = token {
        body["token"] = serde_json::json!(token);
    }
    serde_json::to_vec(&body).unwrap()
}

/// Isolated names so runs do not collide with each other or a real deployment.
pub fn scratch_topology(config: &Config) -> TopologyConfig {
    let suffix = Uuid::new_v4().simple().to_string();
    let mut topology = config.topology_config();
    topology.main_exchange = format!("test_main_{}", suffix);
    topology.retry_exchange = format!("test_retry_{}", suffix);
    topology.dead_letter_exchange = format!("test_dlx_{}", suffix);
    topology.main_queue = format!("test_main_q_{}", suffix);
    topology.retry_queue = format!("test_retry_q_{}", suffix);
    topology.dead_letter_queue = format!("test_dlq_{}", suffix);
    topology.retry_delay = Duration::from_millis(200);
    topology
}

pub async fn cleanup_topology(client: &RabbitMqClient, topology: &TopologyConfig) -> Result<()> {
    let channel = client.create_channel().await?;

    let queues = [
        &topology.main_queue,
        &topology.retry_queue,
        &topology.dead_letter_queue,
    ];
    for queue in queues {
        channel.queue_delete(queue, QueueDeleteOptions::default()).await?;
    }

    let exchanges = [
        &topology.main_exchange,
        &topology.retry_exchange,
        &topology.dead_letter_exchange,
    ];
    for exchange in exchanges {
        channel
            .exchange_delete(exchange, ExchangeDeleteOptions::default())
            .await?;
    }

    Ok(())
}

/// Polls `check` for up to ten seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}
