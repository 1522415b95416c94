use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::{
    clients::rbmq::RabbitMqClient,
    models::{
        health::{BrokerHealth, HealthCheckResponse, HealthStatus},
        metrics::PipelineMetrics,
    },
};

pub trait BrokerProbe: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl BrokerProbe for RabbitMqClient {
    fn is_connected(&self) -> bool {
        RabbitMqClient::is_connected(self)
    }
}

pub struct HealthChecker {
    broker: Arc<dyn BrokerProbe>,
    metrics: Arc<PipelineMetrics>,
}

impl HealthChecker {
    pub fn new(broker: Arc<dyn BrokerProbe>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { broker, metrics }
    }

    pub fn check_all(&self) -> HealthCheckResponse {
        let message_broker = if self.broker.is_connected() {
            BrokerHealth::connected()
        } else {
            warn!("RabbitMQ connection is down");
            BrokerHealth::disconnected("Connection is not open".to_string())
        };

        let pipeline = self.metrics.snapshot();

        // Lost retries mean messages vanished after being acked.
        let status = if !message_broker.connected {
            HealthStatus::Unhealthy
        } else if pipeline.retry_publish_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            message_broker,
            pipeline,
        }
    }
}
