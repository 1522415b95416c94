use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::metrics::MetricsSnapshot;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub message_broker: BrokerHealth,
    pub pipeline: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerHealth {
    pub connected: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BrokerHealth {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn disconnected(error: String) -> Self {
        Self {
            connected: false,
            error: Some(error),
        }
    }
}
