//! Log Ingestion App (C6): brings up N partitioned consumers that drain the
//! log stream and write each record into the search index, with graceful,
//! bounded shutdown.
//!
//! Modeled on a logger app that allocates one consumer per partition, starts
//! them after an idempotent topic-create-and-wait, and stops them with a
//! per-consumer close budget bounded by an external deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{BrokerError, Result};
use crate::sink::IndexSink;
use crate::stream::{StreamConsumer, StreamRecord};

pub type SuccessCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&[u8], &BrokerError) + Send + Sync>;
pub type TopicSetup =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

pub struct LogIngestionApp {
    consumers: Vec<Arc<dyn StreamConsumer>>,
    sink: Arc<dyn IndexSink>,
    topic_setup: Option<TopicSetup>,
    consumer_close_budget: Duration,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl LogIngestionApp {
    /// Constructs but does not start; validates config and prepares N
    /// consumer instances (one per `cfg.stream.partitions`) bound to the
    /// same consumer-group and topic.
    pub fn new(
        cfg: &AppConfig,
        consumers: Vec<Arc<dyn StreamConsumer>>,
        sink: Arc<dyn IndexSink>,
        topic_setup: Option<TopicSetup>,
    ) -> Result<Self> {
        cfg.validate()?;
        if consumers.len() as u32 != cfg.stream.partitions {
            return Err(BrokerError::InvalidConfig(format!(
                "expected {} consumers (one per partition), got {}",
                cfg.stream.partitions,
                consumers.len()
            )));
        }

        Ok(Self {
            consumers,
            sink,
            topic_setup,
            consumer_close_budget: Duration::from_secs(cfg.consumer_close_budget_secs),
            on_success: None,
            on_error: None,
            shutdown: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn set_on_success(&mut self, callback: SuccessCallback) {
        self.on_success = Some(callback);
    }

    pub fn set_on_error(&mut self, callback: ErrorCallback) {
        self.on_error = Some(callback);
    }

    /// Creates the topic if absent, waits for visibility, then starts each
    /// consumer.
    pub async fn start(&self) -> Result<()> {
        if let Some(setup) = &self.topic_setup {
            setup().await?;
        }

        let mut tasks = self.tasks.lock().await;
        for consumer in &self.consumers {
            let consumer = consumer.clone();
            let sink = self.sink.clone();
            let shutdown = self.shutdown.clone();
            let on_success = self.on_success.clone();
            let on_error = self.on_error.clone();
            tasks.push(tokio::spawn(async move {
                run_consumer_loop(consumer, sink, shutdown, on_success, on_error).await;
            }));
        }

        info!(count = tasks.len(), "log ingestion consumers started");
        Ok(())
    }

    /// Signals each consumer to close with the configured per-consumer
    /// budget, then waits for all of them or for `external_deadline`,
    /// whichever comes first.
    pub async fn stop(&self, external_deadline: Duration) -> Result<()> {
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        let budget = self.consumer_close_budget;
        let joins = tasks
            .drain(..)
            .map(|handle| async move {
                let _ = tokio::time::timeout(budget, handle).await;
            })
            .collect::<Vec<_>>();

        match tokio::time::timeout(external_deadline, futures_util::future::join_all(joins)).await
        {
            Ok(_) => Ok(()),
            Err(_) => Err(BrokerError::ShutdownTimeout),
        }
    }
}

async fn run_consumer_loop(
    consumer: Arc<dyn StreamConsumer>,
    sink: Arc<dyn IndexSink>,
    shutdown: CancellationToken,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = consumer.close().await;
                return;
            }
            poll_result = consumer.poll() => {
                match poll_result {
                    Ok(records) => {
                        for record in records {
                            handle_record(&sink, &record, &on_success, &on_error).await;
                        }
                        if let Err(error) = consumer.commit().await {
                            warn!(%error, "failed to commit stream offset");
                        }
                    }
                    Err(error) => {
                        warn!(%error, "stream poll failed");
                    }
                }
            }
        }
    }
}

/// Per-message handler: parse as loose JSON, default `"project"`, re-encode,
/// submit an index-create keyed by project. Malformed JSON and sink write
/// failures both invoke the error callback; the message is still considered
/// committed regardless of the sink outcome.
async fn handle_record(
    sink: &Arc<dyn IndexSink>,
    record: &StreamRecord,
    on_success: &Option<SuccessCallback>,
    on_error: &Option<ErrorCallback>,
) {
    let mut document: Value = match serde_json::from_slice(&record.value) {
        Ok(value) => value,
        Err(error) => {
            if let Some(callback) = on_error {
                callback(&record.value, &BrokerError::PayloadDecode(error));
            }
            return;
        }
    };

    let project = document
        .get("project")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "default".to_string());

    if let Some(object) = document.as_object_mut() {
        object.insert("project".to_string(), Value::String(project.clone()));
    }

    match sink.index_create(&project, document).await {
        Ok(()) => {
            if let Some(callback) = on_success {
                callback(&record.value);
            }
        }
        Err(error) => {
            if let Some(callback) = on_error {
                callback(&record.value, &error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeSink {
        reject_all: bool,
        seen: StdMutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl IndexSink for FakeSink {
        async fn index_create(&self, project: &str, document: Value) -> Result<()> {
            if self.reject_all {
                return Err(BrokerError::SinkWrite("rejected".into()));
            }
            self.seen
                .lock()
                .unwrap()
                .push((project.to_string(), document));
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_project_defaults_to_default() {
        let fake = Arc::new(FakeSink {
            reject_all: false,
            seen: StdMutex::new(Vec::new()),
        });
        let sink: Arc<dyn IndexSink> = fake.clone();
        let record = StreamRecord {
            key: [0; 8],
            value: br#"{"message":"hello"}"#.to_vec(),
        };
        handle_record(&sink, &record, &None, &None).await;

        let seen = fake.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "default");
        assert_eq!(seen[0].1["project"], Value::String("default".into()));
    }

    #[tokio::test]
    async fn malformed_json_invokes_error_callback() {
        let sink: Arc<dyn IndexSink> = Arc::new(FakeSink {
            reject_all: false,
            seen: StdMutex::new(Vec::new()),
        });
        let record = StreamRecord {
            key: [0; 8],
            value: b"not json".to_vec(),
        };

        let seen_error = Arc::new(StdMutex::new(None));
        let seen_error_clone = seen_error.clone();
        let on_error: ErrorCallback = Arc::new(move |_payload, error| {
            *seen_error_clone.lock().unwrap() = Some(error.to_string());
        });

        handle_record(&sink, &record, &None, &Some(on_error)).await;
        assert!(seen_error.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn sink_failure_invokes_error_callback_not_success() {
        let sink: Arc<dyn IndexSink> = Arc::new(FakeSink {
            reject_all: true,
            seen: StdMutex::new(Vec::new()),
        });
        let record = StreamRecord {
            key: [0; 8],
            value: br#"{"project":"billing","message":"x"}"#.to_vec(),
        };

        let success_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let error_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let success_count_clone = success_count.clone();
        let error_count_clone = error_count.clone();

        let on_success: SuccessCallback = Arc::new(move |_| {
            success_count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let on_error: ErrorCallback = Arc::new(move |_, _| {
            error_count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        handle_record(&sink, &record, &Some(on_success), &Some(on_error)).await;

        assert_eq!(success_count.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(error_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
