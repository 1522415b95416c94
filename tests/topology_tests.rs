//! These need a live broker: `RABBITMQ_URL=... cargo test -- --ignored`.

use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use lapin::{
    BasicProperties,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicGetOptions, BasicNackOptions,
        BasicPublishOptions,
    },
    types::FieldTable,
};
use push_relay::{
    clients::{
        rbmq::{RabbitMqClient, retry_count_from_headers, retry_count_header},
        topology::declare_topology,
    },
    config::Config,
};
use tokio::time::{sleep, timeout};

use crate::support::{cleanup_topology, scratch_topology};

/// Test: Declaring the same topology twice succeeds and yields the same queue
#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn test_topology_declaration_is_idempotent() -> Result<()> {
    let config = Config::load()?;
    let client = RabbitMqClient::connect(&config.rabbitmq_url).await?;
    let topology = scratch_topology(&config);

    let first = declare_topology(&client.create_channel().await?, &topology).await?;
    let second = declare_topology(&client.create_channel().await?, &topology).await?;

    assert_eq!(first, second);
    assert_eq!(first.main_queue, topology.main_queue);

    cleanup_topology(&client, &topology).await
}

/// Test: Changing the retry TTL on an existing queue is a reported conflict
#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn test_changed_ttl_is_a_conflict() -> Result<()> {
    let config = Config::load()?;
    let client = RabbitMqClient::connect(&config.rabbitmq_url).await?;
    let topology = scratch_topology(&config);

    declare_topology(&client.create_channel().await?, &topology).await?;

    let mut changed = topology.clone();
    changed.retry_delay = Duration::from_millis(900);
    let result = declare_topology(&client.create_channel().await?, &changed).await;

    assert!(result.is_err(), "conflicting TTL must not be ignored");

    cleanup_topology(&client, &topology).await
}

/// Test: Rejected messages land in the dead-letter queue
#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn test_rejected_message_is_dead_lettered() -> Result<()> {
    let config = Config::load()?;
    let client = RabbitMqClient::connect(&config.rabbitmq_url).await?;
    let topology = scratch_topology(&config);
    let channel = client.create_channel().await?;
    declare_topology(&channel, &topology).await?;

    channel
        .basic_publish(
            &topology.main_exchange,
            &topology.main_routing_key,
            BasicPublishOptions::default(),
            b"{ invalid json }",
            BasicProperties::default().with_delivery_mode(2),
        )
        .await?
        .await?;

    let mut consumer = channel
        .basic_consume(
            &topology.main_queue,
            "test_dead_letter",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    if let Some(Ok(delivery)) = timeout(Duration::from_secs(5), consumer.next()).await? {
        delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await?;
    }

    sleep(Duration::from_millis(500)).await;

    let dead = channel
        .basic_get(&topology.dead_letter_queue, BasicGetOptions::default())
        .await?;
    let dead = dead.expect("message should be in the dead-letter queue");
    assert_eq!(dead.delivery.data, b"{ invalid json }");
    dead.delivery.ack(BasicAckOptions::default()).await?;

    cleanup_topology(&client, &topology).await
}

/// Test: Retry queue TTL returns messages to the main queue with their counter
#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn test_retry_queue_requeues_after_delay() -> Result<()> {
    let config = Config::load()?;
    let client = RabbitMqClient::connect(&config.rabbitmq_url).await?;
    let topology = scratch_topology(&config);
    let channel = client.create_channel().await?;
    declare_topology(&channel, &topology).await?;

    channel
        .basic_publish(
            &topology.retry_exchange,
            &topology.retry_routing_key,
            BasicPublishOptions::default(),
            b"{}",
            BasicProperties::default()
                .with_delivery_mode(2)
                .with_headers(retry_count_header(1)),
        )
        .await?
        .await?;

    sleep(topology.retry_delay * 4).await;

    let requeued = channel
        .basic_get(&topology.main_queue, BasicGetOptions::default())
        .await?
        .expect("message should be back on the main queue");
    assert_eq!(
        retry_count_from_headers(requeued.delivery.properties.headers().as_ref()),
        1
    );
    requeued.delivery.ack(BasicAckOptions::default()).await?;

    cleanup_topology(&client, &topology).await
}
