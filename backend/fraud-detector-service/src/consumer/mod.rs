pub mod backoff;
pub mod kafka;
pub mod pool;
pub mod processor;
pub mod source;
pub mod unsafe_listener;

pub use backoff::RetryPolicy;
pub use kafka::{KafkaEventSource, KafkaSourceConfig};
pub use pool::{assign_partitions, EventWorkerPool, PoolConfig, PoolHandle, PoolStats, StatsSnapshot};
pub use processor::{EventOutcome, EventProcessor};
pub use source::{Delivery, EventSource, InMemoryEventLog};
pub use unsafe_listener::UnsafeListener;
