//! Stream transport (alternative to the AMQP broker mode): a thin trait
//! boundary over a partitioned log-stream client, plus topic administration
//! (idempotent create, wait for visibility) and the concrete producer/
//! consumer built on `iggy`.
//!
//! The external transport's topics, partitions, and consumer-group mechanics
//! are genuinely out of scope per the specification; this module only wraps
//! the producer/consumer primitives the pipeline actually calls.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use iggy::prelude::*;
use iggy::users::defaults::{DEFAULT_ROOT_PASSWORD, DEFAULT_ROOT_USERNAME};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::StreamConfig;
use crate::error::{BrokerError, Result};

const TOPIC_REPLICATION_FACTOR: u8 = 3;
const TOPIC_WAIT: Duration = Duration::from_secs(30);

/// A single stream record: an opaque key (the log writer's 8-byte big-endian
/// sequence) and an opaque value.
pub struct StreamRecord {
    pub key: [u8; 8],
    pub value: Vec<u8>,
}

/// Produces records onto the configured topic, retrying per §6 (up to 3
/// per-send attempts, 5 s write timeout, LZ4 compression).
#[async_trait]
pub trait StreamProducer: Send + Sync {
    async fn produce(&self, record: StreamRecord) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Delivers records for one partition of the configured topic/consumer-group.
#[async_trait]
pub trait StreamConsumer: Send + Sync {
    async fn poll(&self) -> Result<Vec<StreamRecord>>;
    async fn commit(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Creates the topic if absent (idempotent) with the configured partition
/// count and a fixed replication factor of 3, then waits up to 30 s for the
/// topic to become visible.
pub async fn ensure_topic(client: &IggyClient, cfg: &StreamConfig) -> Result<()> {
    let stream_id = Identifier::named(&cfg.consumer_group)
        .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;

    if client.get_stream(&stream_id).await.map_err(to_broker_error)?.is_none() {
        client
            .create_stream(&cfg.consumer_group)
            .await
            .map_err(to_broker_error)?;
    }

    let topic_id =
        Identifier::named(&cfg.topic).map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;

    if client
        .get_topic(&stream_id, &topic_id)
        .await
        .map_err(to_broker_error)?
        .is_none()
    {
        client
            .create_topic(
                &stream_id,
                &cfg.topic,
                cfg.partitions,
                CompressionAlgorithm::Lz4,
                Some(TOPIC_REPLICATION_FACTOR),
                IggyExpiry::NeverExpire,
                MaxTopicSize::Unlimited,
            )
            .await
            .map_err(to_broker_error)?;
    }

    wait_for_topic(client, &stream_id, &topic_id).await
}

async fn wait_for_topic(
    client: &IggyClient,
    stream_id: &Identifier,
    topic_id: &Identifier,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + TOPIC_WAIT;
    loop {
        if client
            .get_topic(stream_id, topic_id)
            .await
            .map_err(to_broker_error)?
            .is_some()
        {
            info!(topic = %topic_id, "topic visible");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrokerError::InvalidConfig(
                "topic did not become visible within 30s".into(),
            ));
        }
        sleep(Duration::from_millis(250)).await;
    }
}

fn to_broker_error(error: iggy::error::IggyError) -> BrokerError {
    BrokerError::InvalidConfig(error.to_string())
}

/// Connects to an iggy server using the configured broker address. The
/// connection string carries credentials, so no separate login call is
/// needed once `connect` succeeds.
pub async fn connect(cfg: &StreamConfig) -> Result<IggyClient> {
    let address = cfg
        .brokers
        .first()
        .ok_or_else(|| BrokerError::InvalidConfig("stream.brokers must not be empty".into()))?;

    let connection_string = format!(
        "iggy://{}:{}@{}",
        DEFAULT_ROOT_USERNAME, DEFAULT_ROOT_PASSWORD, address
    );
    let client = IggyClient::from_connection_string(&connection_string).map_err(to_broker_error)?;
    client.connect().await.map_err(to_broker_error)?;

    Ok(client)
}

pub struct IggyStreamProducer {
    client: IggyClient,
    stream_id: Identifier,
    topic_id: Identifier,
    max_attempts: u32,
}

impl IggyStreamProducer {
    pub fn new(client: IggyClient, cfg: &StreamConfig) -> Result<Self> {
        Ok(Self {
            stream_id: Identifier::named(&cfg.consumer_group)
                .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?,
            topic_id: Identifier::named(&cfg.topic)
                .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?,
            max_attempts: cfg.max_send_attempts,
            client,
        })
    }
}

/// Frames a record's 8-byte key onto the front of its value so the key
/// survives a round trip through a transport whose wire message carries only
/// an opaque payload.
fn frame(record: &StreamRecord) -> Vec<u8> {
    let mut framed = Vec::with_capacity(8 + record.value.len());
    framed.extend_from_slice(&record.key);
    framed.extend_from_slice(&record.value);
    framed
}

fn unframe(payload: &[u8]) -> StreamRecord {
    let mut key = [0u8; 8];
    let split = payload.len().min(8);
    key[..split].copy_from_slice(&payload[..split]);
    StreamRecord {
        key,
        value: payload[split..].to_vec(),
    }
}

#[async_trait]
impl StreamProducer for IggyStreamProducer {
    async fn produce(&self, record: StreamRecord) -> Result<()> {
        let framed = frame(&record);
        let mut message = IggyMessage::builder()
            .payload(Bytes::from(framed.clone()))
            .build()
            .map_err(to_broker_error)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .send_messages(
                    &self.stream_id,
                    &self.topic_id,
                    &Partitioning::balanced(),
                    &mut [message.clone()],
                )
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(error) if attempt < self.max_attempts => {
                    warn!(%error, attempt, "stream send failed, retrying");
                    message = IggyMessage::builder()
                        .payload(Bytes::from(framed.clone()))
                        .build()
                        .map_err(to_broker_error)?;
                }
                Err(error) => return Err(to_broker_error(error)),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct IggyStreamConsumer {
    client: IggyClient,
    stream_id: Identifier,
    topic_id: Identifier,
    partition_id: u32,
    consumer: Consumer,
}

impl IggyStreamConsumer {
    pub fn new(client: IggyClient, cfg: &StreamConfig, partition_id: u32) -> Result<Self> {
        let consumer_id = Identifier::named(&cfg.consumer_group)
            .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            stream_id: Identifier::named(&cfg.consumer_group)
                .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?,
            topic_id: Identifier::named(&cfg.topic)
                .map_err(|e| BrokerError::InvalidConfig(e.to_string()))?,
            partition_id,
            consumer: Consumer::new(consumer_id),
            client,
        })
    }
}

#[async_trait]
impl StreamConsumer for IggyStreamConsumer {
    async fn poll(&self) -> Result<Vec<StreamRecord>> {
        let polled = self
            .client
            .poll_messages(
                &self.stream_id,
                &self.topic_id,
                Some(self.partition_id),
                &self.consumer,
                &PollingStrategy::next(),
                100,
                true,
            )
            .await
            .map_err(to_broker_error)?;

        Ok(polled
            .messages
            .into_iter()
            .map(|m| unframe(&m.payload))
            .collect())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
