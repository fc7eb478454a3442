pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod ingestion;
pub mod log_writer;
pub mod logging;
pub mod manager;
pub mod publisher;
pub mod sink;
pub mod stream;

pub use client::{ClientBase, ClientStatus};
pub use config::{AppConfig, BrokerConfig, SinkConfig, StreamConfig};
pub use consumer::{Consumer, Handler};
pub use error::{BrokerError, Result};
pub use ingestion::{ErrorCallback, LogIngestionApp, SuccessCallback, TopicSetup};
pub use log_writer::{LogWriter, StreamProducerHandle};
pub use logging::{init_logging, LogCallback};
pub use manager::{ConnectionManager, ManagerStatus};
pub use publisher::{AsyncPublisher, PublishRequest};
pub use sink::{HttpIndexSink, IndexSink, IndexSinkHandle};
pub use stream::{
    connect as connect_stream, ensure_topic, IggyStreamConsumer, IggyStreamProducer,
    StreamConsumer, StreamProducer, StreamRecord,
};

// Re-export the bytes type used throughout the publish path, for callers who
// don't already depend on it directly.
pub use bytes::Bytes;
