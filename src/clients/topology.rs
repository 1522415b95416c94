//! Exchange/queue graph for delivery, delayed retry and dead-lettering.
//!
//! ```text
//! main ex ──main key──▶ main queue ──nack──▶ dead-letter ex ──dl key──▶ dead-letter queue
//!    ▲                                                                   (terminal)
//!    └──TTL expiry── retry queue ◀──retry key── retry ex
//! ```
//!
//! All declarations are durable and repeatable. The broker refuses a
//! re-declaration whose arguments differ from the existing queue, which is
//! surfaced as a [`TopologyError`].

use std::time::Duration;

use lapin::{
    Channel, ExchangeKind,
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, ShortString},
};
use tracing::info;

use crate::error::TopologyError;

pub const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";
pub const DEAD_LETTER_ROUTING_KEY_ARG: &str = "x-dead-letter-routing-key";
pub const MESSAGE_TTL_ARG: &str = "x-message-ttl";

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyConfig {
    pub main_exchange: String,
    pub retry_exchange: String,
    pub dead_letter_exchange: String,
    /// Empty requests a broker-named queue.
    pub main_queue: String,
    pub retry_queue: String,
    pub dead_letter_queue: String,
    pub main_routing_key: String,
    pub retry_routing_key: String,
    pub dead_letter_routing_key: String,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    /// Name the broker reports for the main queue.
    pub main_queue: String,
    pub retry_delay: Duration,
}

pub fn main_queue_arguments(config: &TopologyConfig) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        ShortString::from(DEAD_LETTER_EXCHANGE_ARG),
        AMQPValue::LongString(config.dead_letter_exchange.as_str().into()),
    );
    args.insert(
        ShortString::from(DEAD_LETTER_ROUTING_KEY_ARG),
        AMQPValue::LongString(config.dead_letter_routing_key.as_str().into()),
    );
    args
}

/// Expired retries dead-letter back onto the main exchange, which turns the
/// TTL into a fixed delay.
pub fn retry_queue_arguments(config: &TopologyConfig) -> Result<FieldTable, TopologyError> {
    let ttl_ms = i64::try_from(config.retry_delay.as_millis())
        .map_err(|_| TopologyError::Invalid("retry delay does not fit in i64 ms".to_string()))?;
    if ttl_ms <= 0 {
        return Err(TopologyError::Invalid(
            "retry delay must be at least 1ms".to_string(),
        ));
    }

    let mut args = FieldTable::default();
    args.insert(
        ShortString::from(DEAD_LETTER_EXCHANGE_ARG),
        AMQPValue::LongString(config.main_exchange.as_str().into()),
    );
    args.insert(
        ShortString::from(DEAD_LETTER_ROUTING_KEY_ARG),
        AMQPValue::LongString(config.main_routing_key.as_str().into()),
    );
    args.insert(ShortString::from(MESSAGE_TTL_ARG), AMQPValue::LongLongInt(ttl_ms));
    Ok(args)
}

fn main_queue_options(config: &TopologyConfig) -> QueueDeclareOptions {
    if config.main_queue.is_empty() {
        QueueDeclareOptions {
            durable: false,
            exclusive: true,
            auto_delete: true,
            ..Default::default()
        }
    } else {
        durable_queue()
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Declares every exchange, queue and binding. Any failure is fatal.
pub async fn declare_topology(
    channel: &Channel,
    config: &TopologyConfig,
) -> Result<Topology, TopologyError> {
    let retry_args = retry_queue_arguments(config)?;

    for exchange in [
        &config.main_exchange,
        &config.dead_letter_exchange,
        &config.retry_exchange,
    ] {
        declare_exchange(channel, exchange).await?;
    }

    let main_queue = channel
        .queue_declare(
            &config.main_queue,
            main_queue_options(config),
            main_queue_arguments(config),
        )
        .await
        .map_err(|e| TopologyError::Queue {
            name: config.main_queue.clone(),
            message: e.to_string(),
        })?;
    let main_queue_name = main_queue.name().as_str().to_string();

    bind(channel, &main_queue_name, &config.main_exchange, &config.main_routing_key).await?;

    channel
        .queue_declare(
            &config.dead_letter_queue,
            durable_queue(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TopologyError::Queue {
            name: config.dead_letter_queue.clone(),
            message: e.to_string(),
        })?;

    bind(
        channel,
        &config.dead_letter_queue,
        &config.dead_letter_exchange,
        &config.dead_letter_routing_key,
    )
    .await?;

    channel
        .queue_declare(&config.retry_queue, durable_queue(), retry_args)
        .await
        .map_err(|e| TopologyError::Queue {
            name: config.retry_queue.clone(),
            message: e.to_string(),
        })?;

    bind(
        channel,
        &config.retry_queue,
        &config.retry_exchange,
        &config.retry_routing_key,
    )
    .await?;

    info!(
        main_queue = %main_queue_name,
        retry_queue = %config.retry_queue,
        dead_letter_queue = %config.dead_letter_queue,
        retry_delay_ms = config.retry_delay.as_millis() as u64,
        "Broker topology declared"
    );

    Ok(Topology {
        main_queue: main_queue_name,
        retry_delay: config.retry_delay,
    })
}

async fn declare_exchange(channel: &Channel, name: &str) -> Result<(), TopologyError> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| TopologyError::Exchange {
            name: name.to_string(),
            message: e.to_string(),
        })
}

async fn bind(
    channel: &Channel,
    queue: &str,
    exchange: &str,
    routing_key: &str,
) -> Result<(), TopologyError> {
    channel
        .queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| TopologyError::Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TopologyConfig {
        TopologyConfig {
            main_exchange: "push_notifs".to_string(),
            retry_exchange: "retry-notifs_ex".to_string(),
            dead_letter_exchange: "push_notifs_dlx".to_string(),
            main_queue: "push_notifs_queue".to_string(),
            retry_queue: "retry-notifs_queue".to_string(),
            dead_letter_queue: "push_notifs_dlq".to_string(),
            main_routing_key: "notifs".to_string(),
            retry_routing_key: "retried-messages".to_string(),
            dead_letter_routing_key: "failed-messages".to_string(),
            retry_delay: Duration::from_millis(5000),
        }
    }

    fn string_arg<'a>(args: &'a FieldTable, key: &str) -> Option<&'a str> {
        match args.inner().get(key) {
            Some(AMQPValue::LongString(value)) => std::str::from_utf8(value.as_bytes()).ok(),
            _ => None,
        }
    }

    #[test]
    fn main_queue_dead_letters_to_dlx() {
        let args = main_queue_arguments(&config());
        assert_eq!(string_arg(&args, DEAD_LETTER_EXCHANGE_ARG), Some("push_notifs_dlx"));
        assert_eq!(string_arg(&args, DEAD_LETTER_ROUTING_KEY_ARG), Some("failed-messages"));
        assert!(args.inner().get(MESSAGE_TTL_ARG).is_none());
    }

    #[test]
    fn retry_queue_expires_back_into_main_exchange() {
        let args = retry_queue_arguments(&config()).unwrap();
        assert_eq!(string_arg(&args, DEAD_LETTER_EXCHANGE_ARG), Some("push_notifs"));
        assert_eq!(string_arg(&args, DEAD_LETTER_ROUTING_KEY_ARG), Some("notifs"));
        assert_eq!(
            args.inner().get(MESSAGE_TTL_ARG),
            Some(&AMQPValue::LongLongInt(5000))
        );
    }

    #[test]
    fn sub_millisecond_delay_is_rejected() {
        let mut config = config();
        config.retry_delay = Duration::from_micros(10);
        assert!(matches!(
            retry_queue_arguments(&config),
            Err(TopologyError::Invalid(_))
        ));
    }

    #[test]
    fn anonymous_main_queue_is_exclusive() {
        let mut config = config();
        config.main_queue = String::new();
        let options = main_queue_options(&config);
        assert!(options.exclusive && options.auto_delete && !options.durable);
    }
}
