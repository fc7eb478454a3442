use thiserror::Error;

/// Error taxonomy for the broker client and log ingestion pipeline.
///
/// Variant names follow the "kind" vocabulary of the owning component rather
/// than wrapping every upstream error type individually; conversions are
/// provided only at the boundaries that actually produce them.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("failed to dial broker: {0}")]
    TransportDial(#[source] lapin::Error),

    #[error("operation requires a live connection")]
    NotConnected,

    #[error("connection manager is closed")]
    ManagerClosed,

    #[error("broker refused channel open: {0}")]
    ChannelCreate(#[source] lapin::Error),

    #[error("channel is unusable")]
    ChannelClosed,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("request queue is full")]
    BackPressure,

    #[error("operation attempted after close")]
    Closed,

    #[error("initial publish send failed: {0}")]
    PublishSend(#[source] lapin::Error),

    #[error("broker nack'd the publish")]
    ConfirmNack,

    #[error("no publish confirmation within the timeout")]
    ConfirmTimeout,

    #[error("failed to parse log payload as JSON: {0}")]
    PayloadDecode(#[source] serde_json::Error),

    #[error("search-index sink write failed: {0}")]
    SinkWrite(String),

    #[error("shutdown deadline expired before all consumers closed")]
    ShutdownTimeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
