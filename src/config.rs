use std::{collections::HashSet, time::Duration};

use anyhow::{Error, Result, anyhow, bail};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::{publisher::PublisherConfig, topology::TopologyConfig},
    models::retry::RetryPolicy,
    worker::{ProcessorConfig, WorkerConfig},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,

    #[serde(default = "default_main_exchange")]
    pub main_exchange: String,
    #[serde(default = "default_retry_exchange")]
    pub retry_exchange: String,
    #[serde(default = "default_dead_letter_exchange")]
    pub dead_letter_exchange: String,

    #[serde(default = "default_main_queue")]
    pub main_queue: String,
    #[serde(default = "default_retry_queue")]
    pub retry_queue: String,
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue: String,

    #[serde(default = "default_main_routing_key")]
    pub main_routing_key: String,
    #[serde(default = "default_retry_routing_key")]
    pub retry_routing_key: String,
    #[serde(default = "default_dead_letter_routing_key")]
    pub dead_letter_routing_key: String,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub default_push_token: Option<String>,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    #[serde(default)]
    pub fcm_project_id: String,
    #[serde(default = "default_fcm_base_url")]
    pub fcm_base_url: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_publish_buffer")]
    pub publish_buffer: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_main_exchange() -> String {
    "push_notifs".to_string()
}

fn default_retry_exchange() -> String {
    "retry-notifs_ex".to_string()
}

fn default_dead_letter_exchange() -> String {
    "push_notifs_dlx".to_string()
}

fn default_main_queue() -> String {
    "push_notifs_queue".to_string()
}

fn default_retry_queue() -> String {
    "retry-notifs_queue".to_string()
}

fn default_dead_letter_queue() -> String {
    "push_notifs_dlq".to_string()
}

fn default_main_routing_key() -> String {
    "notifs".to_string()
}

fn default_retry_routing_key() -> String {
    "retried-messages".to_string()
}

fn default_dead_letter_routing_key() -> String {
    "failed-messages".to_string()
}

fn default_worker_count() -> usize {
    5
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    5
}

fn default_delivery_timeout_ms() -> u64 {
    10_000
}

fn default_fcm_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_publish_buffer() -> usize {
    256
}

fn default_shutdown_grace_ms() -> u64 {
    30_000
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.rabbitmq_url.trim().is_empty() {
            bail!("RABBITMQ_URL must not be empty");
        }
        if self.worker_count == 0 {
            bail!("WORKER_COUNT must be at least 1");
        }
        if self.prefetch_count == 0 {
            bail!("PREFETCH_COUNT must be at least 1");
        }
        if self.retry_delay_ms == 0 {
            bail!("RETRY_DELAY_MS must be greater than zero");
        }
        if self.delivery_timeout_ms == 0 {
            bail!("DELIVERY_TIMEOUT_MS must be greater than zero");
        }
        if self.publish_buffer == 0 {
            bail!("PUBLISH_BUFFER must be at least 1");
        }

        let exchanges = [
            &self.main_exchange,
            &self.retry_exchange,
            &self.dead_letter_exchange,
        ];
        if exchanges.iter().any(|name| name.trim().is_empty()) {
            bail!("Exchange names must not be empty");
        }
        let distinct: HashSet<_> = exchanges.iter().collect();
        if distinct.len() != exchanges.len() {
            bail!("Main, retry and dead-letter exchanges must be distinct");
        }

        if self.retry_queue.trim().is_empty() || self.dead_letter_queue.trim().is_empty() {
            bail!("Retry and dead-letter queue names must not be empty");
        }

        Ok(())
    }

    pub fn topology_config(&self) -> TopologyConfig {
        TopologyConfig {
            main_exchange: self.main_exchange.clone(),
            retry_exchange: self.retry_exchange.clone(),
            dead_letter_exchange: self.dead_letter_exchange.clone(),
            main_queue: self.main_queue.clone(),
            retry_queue: self.retry_queue.clone(),
            dead_letter_queue: self.dead_letter_queue.clone(),
            main_routing_key: self.main_routing_key.clone(),
            retry_routing_key: self.retry_routing_key.clone(),
            dead_letter_routing_key: self.dead_letter_routing_key.clone(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            worker_count: self.worker_count,
            prefetch_count: self.prefetch_count,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            retry_policy: self.retry_policy(),
            retry_exchange: self.retry_exchange.clone(),
            retry_routing_key: self.retry_routing_key.clone(),
            default_push_token: self
                .default_push_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            exchange: self.main_exchange.clone(),
            routing_key: self.main_routing_key.clone(),
            buffer: self.publish_buffer,
        }
    }
}
