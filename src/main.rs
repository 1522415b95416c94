use std::sync::Arc;

use anyhow::{Context, Error, Result, bail};
use push_relay::{
    api::{AppState, run_api_server},
    clients::{
        fcm::{FcmClient, GcpTokenSource},
        health::HealthChecker,
        publisher::Publisher,
        rbmq::{AmqpChannel, RabbitMqClient},
        topology::declare_topology,
    },
    config::Config,
    models::metrics::PipelineMetrics,
    utils::{init_tracing, shutdown_signal},
    worker::{MessageProcessor, WorkerPool},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    let client = Arc::new(
        RabbitMqClient::connect(&config.rabbitmq_url)
            .await
            .context("Failed to connect to RabbitMQ")?,
    );

    let setup_channel = client.create_channel().await?;
    let topology = declare_topology(&setup_channel, &config.topology_config())
        .await
        .context("Failed to declare broker topology")?;

    let metrics = Arc::new(PipelineMetrics::new());

    let token_source = GcpTokenSource::discover()
        .await
        .context("Failed to load FCM credentials")?;
    let adapter = Arc::new(FcmClient::new(&config, Arc::new(token_source)));
    let processor = Arc::new(MessageProcessor::new(
        adapter,
        config.processor_config(),
        Arc::clone(&metrics),
    ));

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(
        &client,
        &topology.main_queue,
        &config.worker_config(),
        processor,
        shutdown.clone(),
    )
    .await
    .context("Failed to start workers")?;

    let publish_channel = AmqpChannel::new(client.create_confirm_channel().await?);
    let (publisher, publisher_task) =
        Publisher::spawn(publish_channel, config.publisher_config(), Arc::clone(&metrics));

    let state = Arc::new(AppState {
        publisher,
        health_checker: HealthChecker::new(client.clone(), Arc::clone(&metrics)),
    });

    let listener = TcpListener::bind(("0.0.0.0", config.server_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.server_port))?;

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(run_api_server(listener, state, async move {
        server_shutdown.cancelled().await
    }));

    let workers_failed = tokio::select! {
        _ = shutdown_signal() => false,
        _ = shutdown.cancelled() => {
            error!("Worker pool failed, shutting down");
            true
        }
    };

    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => info!("HTTP server stopped"),
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }
    // The server dropped the last publisher handle, so the task drains and exits.
    if let Err(e) = publisher_task.await {
        error!(error = %e, "Publisher task panicked");
    }

    pool.shutdown().await;
    client.close().await?;

    if workers_failed {
        bail!("Worker pool stopped unexpectedly");
    }

    info!("Shutdown complete");
    Ok(())
}
