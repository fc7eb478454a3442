//! Log ingestion binary (C6): drains the configured stream topic into the
//! search index and exits cleanly on SIGINT/SIGTERM.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use broker_pipeline::{
    connect_stream, ensure_topic, init_logging, AppConfig, IggyStreamConsumer, IndexSinkHandle,
    LogIngestionApp, StreamConsumer, TopicSetup,
};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "log-ingest", about = "Drains the log stream into the search index")]
struct Args {
    /// Path to the TOML config file; also settable via APP_CONFIG.
    #[arg(long, env = "APP_CONFIG", default_value = "config.toml")]
    config: String,
}

static SINK: IndexSinkHandle = IndexSinkHandle::new();

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    std::env::set_var("APP_CONFIG", &args.config);

    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(error) => {
            error!(%error, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "log ingestion exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: AppConfig) -> broker_pipeline::Result<()> {
    SINK.init(&cfg.sink).await?;
    let sink = SINK.get()?;

    let stream_client = connect_stream(&cfg.stream).await?;

    let topic_setup: TopicSetup = {
        let client = stream_client.clone();
        let stream_cfg = cfg.stream.clone();
        Arc::new(move || {
            let client = client.clone();
            let stream_cfg = stream_cfg.clone();
            Box::pin(async move { ensure_topic(&client, &stream_cfg).await })
        })
    };

    let mut consumers: Vec<Arc<dyn StreamConsumer>> = Vec::with_capacity(cfg.stream.partitions as usize);
    for partition_id in 0..cfg.stream.partitions {
        let consumer = IggyStreamConsumer::new(stream_client.clone(), &cfg.stream, partition_id)?;
        consumers.push(Arc::new(consumer));
    }

    let app = LogIngestionApp::new(&cfg, consumers, sink, Some(topic_setup))?;
    app.start().await?;
    info!(partitions = cfg.stream.partitions, "log ingestion started");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining consumers");

    let deadline = Duration::from_secs(cfg.shutdown_ceiling_secs);
    app.stop(deadline).await?;
    info!("log ingestion stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
