//! Consumer (C3): pulls messages from a named queue, invokes a user handler,
//! acknowledges regardless of handler outcome, and survives channel loss by
//! resetting through the shared client base.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::client::{ClientBase, ClientStatus};
use crate::client_log;
use crate::error::{BrokerError, Result};
use crate::logging::LogCallback;
use crate::manager::ConnectionManager;

/// A per-message handler. Errors are logged, never propagated: the message
/// is ack'd regardless, per the documented ack-regardless design choice.
pub type Handler = Arc<
    dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>
        + Send
        + Sync,
>;

pub struct Consumer {
    base: Arc<ClientBase>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        manager: ConnectionManager,
    ) -> Self {
        Self {
            base: Arc::new(ClientBase::new(id, name, manager)),
            task: Mutex::new(None),
        }
    }

    /// Launches a single background task for this consumer instance and
    /// returns immediately.
    pub async fn consume(&self, queue_name: impl Into<String>, handler: Handler) -> Result<()> {
        let queue_name = queue_name.into();
        if queue_name.trim().is_empty() {
            return Err(BrokerError::InvalidArgument("queue name must not be empty"));
        }

        let base = self.base.clone();
        let handle = tokio::spawn(async move {
            run_consume_loop(base, queue_name, handler).await;
        });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    pub async fn restart(&self, queue_name: impl Into<String>, handler: Handler) -> Result<()> {
        self.base.restart().await?;
        self.consume(queue_name, handler).await
    }

    pub async fn close(&self) {
        self.base.close().await;
    }

    /// Installs (or clears) the callback that mirrors this consumer's
    /// operational log events to an embedding application.
    pub async fn set_log_callback(&self, callback: Option<LogCallback>) {
        self.base.set_log_callback(callback).await;
    }
}

enum ConsumeOutcome {
    Done,
    ChannelLost,
}

async fn run_consume_loop(base: Arc<ClientBase>, queue_name: String, handler: Handler) {
    loop {
        if let Err(error) = base.acquire_channel().await {
            warn!(%error, "consumer failed to acquire channel, closing");
            base.close().await;
            return;
        }

        let channel = match base.current_channel().await {
            Some(channel) => channel,
            None => {
                base.close().await;
                return;
            }
        };

        let consumer_tag = format!("{}-{}", base.name, base.id);
        let delivery_stream = channel
            .basic_consume(
                &queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await;

        let delivery_stream = match delivery_stream {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, queue = %queue_name, "failed to set up delivery stream, closing");
                base.close().await;
                return;
            }
        };

        match consume(&base, delivery_stream, &handler).await {
            ConsumeOutcome::Done => return,
            ConsumeOutcome::ChannelLost => {
                if base.reset_channel().await.is_err() {
                    base.close().await;
                    return;
                }
            }
        }
    }
}

async fn consume(
    base: &Arc<ClientBase>,
    mut delivery_stream: lapin::Consumer,
    handler: &Handler,
) -> ConsumeOutcome {
    base.set_status(ClientStatus::Running);

    let mut done_rx = base.done_rx().await;

    loop {
        tokio::select! {
            _ = done_rx.changed() => return ConsumeOutcome::Done,
            delivery = delivery_stream.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let body = delivery.data.clone();
                        if let Err(error) = (handler)(body).await {
                            let cb = base.log_callback().await;
                            client_log!(
                                error,
                                cb,
                                "consumer handler returned an error; acking anyway: {}",
                                error
                            );
                        }
                        if let Err(error) = delivery.ack(BasicAckOptions { multiple: false }).await {
                            warn!(%error, "failed to ack message");
                        }
                    }
                    Some(Err(error)) => {
                        let cb = base.log_callback().await;
                        client_log!(
                            warn,
                            cb,
                            "delivery stream error, treating as channel loss: {}",
                            error
                        );
                        return ConsumeOutcome::ChannelLost;
                    }
                    None => return ConsumeOutcome::ChannelLost,
                }
            }
        }
    }
}
