//! Structured logging, shared by every component.
//!
//! Initialization happens once per process; components otherwise just use
//! `tracing` macros directly. [`client_log!`] additionally mirrors an event to
//! a caller-supplied callback, so an embedding application can observe
//! operational events (reconnects, resets, back-pressure) without scraping
//! log output.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the global `tracing` subscriber. Safe to call more than once;
/// only the first call has any effect.
pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    });
}

/// A callback that receives a fully formatted log line, in addition to
/// whatever the global `tracing` subscriber does with the same event.
pub type LogCallback = std::sync::Arc<dyn Fn(&str) + Send + Sync>;

/// Emits a `tracing` event at the given level and, if `$cb` resolves to
/// `Some(callback)`, also invokes the callback with the formatted message.
#[macro_export]
macro_rules! client_log {
    ($level:ident, $cb:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::$level!("{}", message);
        if let Some(callback) = $cb {
            callback(message.as_str());
        }
    }};
}
