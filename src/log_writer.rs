//! Log Writer Adapter (C5): the sink end of an arbitrary structured logger.
//! Accepts opaque byte buffers, assigns a monotonically increasing 8-byte
//! big-endian sequence key, copies the buffer (never retains the caller's),
//! and hands the pair off to a process-wide streaming producer singleton.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::error::{BrokerError, Result};
use crate::stream::{StreamProducer, StreamRecord};

/// Explicit Init/Get/Close lifecycle over the shared streaming producer, so
/// that "one live transport per process" is modeled without implicit global
/// mutable state.
pub struct StreamProducerHandle {
    cell: OnceCell<Arc<dyn StreamProducer>>,
}

impl StreamProducerHandle {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Creates the shared producer's connection resources, if not already
    /// created. Safe to call more than once; only the first call's factory
    /// runs.
    pub async fn init<F, Fut>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<dyn StreamProducer>>>,
    {
        self.cell
            .get_or_try_init(factory)
            .await
            .map(|_| ())
    }

    /// Fails if `init` has not yet run.
    pub fn get(&self) -> Result<Arc<dyn StreamProducer>> {
        self.cell
            .get()
            .cloned()
            .ok_or_else(|| BrokerError::InvalidConfig("stream producer not initialized".into()))
    }

    pub async fn close(&self, timeout: Duration) -> Result<()> {
        if let Some(producer) = self.cell.get() {
            let _ = tokio::time::timeout(timeout, producer.close()).await;
        }
        Ok(())
    }
}

impl Default for StreamProducerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements `io::Write`-shaped semantics for a structured logger: each call
/// to [`LogWriter::write`] is one log record.
pub struct LogWriter {
    producer: Arc<dyn StreamProducer>,
    sequence: AtomicU64,
    error_count: AtomicU64,
}

impl LogWriter {
    pub fn new(producer: Arc<dyn StreamProducer>) -> Self {
        Self {
            producer,
            sequence: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Copies `payload` into a fresh buffer (the caller's buffer is never
    /// retained, to avoid aliasing with concurrent writers that reuse a
    /// buffer), assigns the next sequence key, and hands both to the
    /// streaming producer. Returns the number of bytes accepted.
    pub async fn write(&self, payload: &[u8]) -> Result<usize> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let key = sequence.to_be_bytes();
        let value = payload.to_vec();

        let result = self
            .producer
            .produce(StreamRecord { key, value })
            .await;

        match result {
            Ok(()) => Ok(payload.len()),
            Err(error) => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    pub async fn close(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.producer.close())
            .await
            .map_err(|_| BrokerError::ShutdownTimeout)?
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingProducer {
        records: Mutex<Vec<StreamRecord>>,
    }

    #[async_trait]
    impl StreamProducer for RecordingProducer {
        async fn produce(&self, record: StreamRecord) -> Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sequence_keys_strictly_increase() {
        let producer = Arc::new(RecordingProducer {
            records: Mutex::new(Vec::new()),
        });
        let writer = LogWriter::new(producer.clone());

        for _ in 0..10 {
            writer.write(b"line").await.unwrap();
        }

        let records = producer.records.lock().unwrap();
        for window in records.windows(2) {
            assert!(window[0].key < window[1].key);
        }
    }

    #[tokio::test]
    async fn write_copies_caller_buffer() {
        let producer = Arc::new(RecordingProducer {
            records: Mutex::new(Vec::new()),
        });
        let writer = LogWriter::new(producer.clone());

        let mut buffer = b"first".to_vec();
        writer.write(&buffer).await.unwrap();
        buffer.copy_from_slice(b"SCND!"); // reuse the caller buffer in place

        let records = producer.records.lock().unwrap();
        assert_eq!(records[0].value, b"first");
    }
}
