use fraud_detector_service::consumer::{
    EventProcessor, EventWorkerPool, KafkaEventSource, KafkaSourceConfig, PoolConfig,
    UnsafeListener,
};
use fraud_detector_service::services::{AlertDispatcher, LogAlertTransport, ThresholdRiskEvaluator};
use fraud_detector_service::{metrics, AppError, Config};
use idempotent_consumer::{DedupGuard, RedisDedupStore};
use redis_utils::RedisPool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,rdkafka=warn".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    tracing::info!(
        topic = %config.kafka_topic,
        group_id = %config.consumer_group,
        workers = config.worker_count,
        "Starting fraud detector service"
    );

    let redis = RedisPool::connect(&config.redis_url)
        .await
        .map_err(|e| AppError::Redis(e.to_string()))?;
    let store = Arc::new(RedisDedupStore::with_command_timeout(
        redis.manager(),
        config.redis_timeout(),
    ));
    let guard = DedupGuard::new(store, config.dedup_key_prefix.clone(), config.dedup_ttl());

    let evaluator = Arc::new(ThresholdRiskEvaluator::new(
        config.high_risk_threshold,
        config.medium_risk_threshold,
    ));
    let dispatcher = AlertDispatcher::new(Arc::new(LogAlertTransport));

    let source = Arc::new(KafkaEventSource::connect(&KafkaSourceConfig::new(
        &config.kafka_brokers,
        &config.kafka_topic,
        &config.consumer_group,
    ))?);

    let processor = Arc::new(
        EventProcessor::new(guard, evaluator.clone(), dispatcher.clone())
            .with_consumer_group(config.consumer_group.clone()),
    );

    // Mismatched worker/partition counts abort startup here
    let pool = EventWorkerPool::new(PoolConfig::from(&config), source, processor)?;
    let handle = pool.start();

    let (unsafe_shutdown_tx, unsafe_shutdown_rx) = watch::channel(false);
    let unsafe_task = if config.run_unsafe_listener {
        tracing::warn!(
            group_id = %config.unsafe_consumer_group,
            "Unsafe listener enabled: alerts for every event will be fired by both consumer groups"
        );
        let unsafe_source = Arc::new(KafkaEventSource::connect(&KafkaSourceConfig::new(
            &config.kafka_brokers,
            &config.kafka_topic,
            &config.unsafe_consumer_group,
        ))?);
        let listener = UnsafeListener::new(unsafe_source, evaluator, dispatcher, config.poll_timeout());
        Some(tokio::spawn(listener.run(unsafe_shutdown_rx)))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, draining workers");

    let _ = unsafe_shutdown_tx.send(true);
    if let Some(task) = unsafe_task {
        let _ = task.await;
    }

    let stats = handle.shutdown().await;
    tracing::info!(
        committed = stats.committed,
        skipped_duplicates = stats.skipped_duplicates,
        failed = stats.failed,
        guard_unavailable = stats.guard_unavailable,
        "Fraud detector service stopped"
    );
    tracing::debug!(metrics = %metrics::render(), "Final metrics");

    Ok(())
}
