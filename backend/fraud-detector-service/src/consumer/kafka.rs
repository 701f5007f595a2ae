//! Kafka event source with manual offset control.
//!
//! All partitions of the topic are assigned to this process and each one is
//! split onto its own queue, so the worker owning a partition is the only
//! reader of that queue. Offsets are committed synchronously, one partition at
//! a time, and only when the pool asks; auto-commit is disabled.
//!
//! Assignment is manual, so the group coordinator never splits partitions
//! between processes: run exactly one instance per consumer group. A second
//! instance with the same `group.id` would read every partition too, and both
//! would fire alerts for events neither has marked yet.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::consumer::{CommitMode, Consumer, DefaultConsumerContext, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::consumer::source::{Delivery, EventSource};
use crate::error::SourceError;
use crate::models::FraudEvent;

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaSourceConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub request_timeout: Duration,
}

impl KafkaSourceConfig {
    pub fn new(brokers: impl Into<String>, topic: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            topic: topic.into(),
            group_id: group_id.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

type PartitionQueue = StreamPartitionQueue<DefaultConsumerContext>;

pub struct KafkaEventSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
    queues: HashMap<i32, PartitionQueue>,
    request_timeout: Duration,
    driver: JoinHandle<()>,
}

impl KafkaEventSource {
    /// Connect, discover the topic's partitions and assign all of them
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: &KafkaSourceConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false") // Offsets move only after the dedup marker is written
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()?;
        let consumer = Arc::new(consumer);

        let metadata = consumer.fetch_metadata(Some(&config.topic), config.request_timeout)?;
        let partitions: Vec<i32> = metadata
            .topics()
            .iter()
            .find(|topic| topic.name() == config.topic)
            .map(|topic| topic.partitions().iter().map(|p| p.id()).collect())
            .unwrap_or_default();

        if partitions.is_empty() {
            return Err(SourceError::Transport(format!(
                "topic '{}' has no partitions",
                config.topic
            )));
        }

        let mut queues = HashMap::with_capacity(partitions.len());
        for &partition in &partitions {
            let queue = consumer
                .split_partition_queue(&config.topic, partition)
                .ok_or_else(|| {
                    SourceError::Transport(format!(
                        "failed to split queue for {}/{}",
                        config.topic, partition
                    ))
                })?;
            queues.insert(partition, queue);
        }

        let mut assignment = TopicPartitionList::new();
        for &partition in &partitions {
            assignment.add_partition_offset(&config.topic, partition, Offset::Stored)?;
        }
        consumer.assign(&assignment)?;

        // The parent queue still has to be polled to serve client callbacks
        let driver_consumer = consumer.clone();
        let driver = tokio::spawn(async move {
            loop {
                match driver_consumer.recv().await {
                    Ok(message) => error!(
                        partition = message.partition(),
                        offset = message.offset(),
                        "Message arrived on parent queue instead of its partition queue"
                    ),
                    Err(e) => {
                        warn!(error = %e, "Kafka consumer error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            partitions = partitions.len(),
            "Kafka event source assigned all partitions"
        );
        warn!(
            group_id = %config.group_id,
            "Partitions are assigned manually; no other instance may consume with this group id"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            queues,
            request_timeout: config.request_timeout,
            driver,
        })
    }

    fn queue(&self, partition: i32) -> Result<&PartitionQueue, SourceError> {
        self.queues
            .get(&partition)
            .ok_or(SourceError::UnknownPartition(partition))
    }
}

impl Drop for KafkaEventSource {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    fn partition_count(&self) -> usize {
        self.queues.len()
    }

    async fn poll(&self, partition: i32, timeout: Duration) -> Result<Option<Delivery>, SourceError> {
        let queue = self.queue(partition)?;

        let message = match tokio::time::timeout(timeout, queue.recv()).await {
            Err(_) => return Ok(None),
            Ok(received) => received?,
        };

        let offset = message.offset();
        let payload = message.payload().ok_or_else(|| SourceError::Decode {
            partition,
            offset,
            reason: "empty payload".to_string(),
        })?;

        let event = serde_json::from_slice::<FraudEvent>(payload).map_err(|e| SourceError::Decode {
            partition,
            offset,
            reason: e.to_string(),
        })?;

        Ok(Some(Delivery {
            partition,
            offset,
            event,
        }))
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        self.queue(partition)?;

        // Kafka's committed offset is the next one to read
        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&self.topic, partition, Offset::Offset(offset + 1))?;

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| SourceError::Transport(format!("commit task failed: {}", e)))??;

        Ok(())
    }

    async fn rewind(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        self.queue(partition)?;

        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), timeout)
        })
        .await
        .map_err(|e| SourceError::Transport(format!("seek task failed: {}", e)))??;

        Ok(())
    }
}
