//! Error types shared across the gateway.

use std::time::Duration;

/// Errors raised by channel adapters (HTTP, terminal, chat platform).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A channel failed to start (missing config, port in use, etc).
    #[error("Channel '{name}' failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    /// A channel failed to deliver a response.
    #[error("Channel '{name}' failed to send: {reason}")]
    SendFailed { name: String, reason: String },

    /// A channel health check failed.
    #[error("Channel '{name}' health check failed")]
    HealthCheckFailed { name: String },

    /// I/O error underlying a channel operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the dispatch core, schedulers, and the gateway lock.
///
/// One enum covers every component in the dispatch lane rather than one
/// per module: a request's error can originate in the lock, a scheduler,
/// or the handler itself, and callers that route it back to a channel
/// (or into a `MessageResponse.error` field) want a single type to match
/// on regardless of where it came from. Callers that only care about a
/// subset, like the cron CLI which only ever sees `ScheduleParse`, just
/// ignore the other variants.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Another live process already holds the gateway lock.
    #[error("gateway already running (pid {pid}, started {created_at})")]
    LockHeld {
        pid: u32,
        created_at: String,
        http_port: Option<u16>,
    },

    /// The lock file could not be read, written, or removed.
    #[error("gateway lock error: {reason}")]
    LockIo { reason: String },

    /// A queued request was dropped by `clear()` before it ran.
    #[error("request {request_id} cancelled before execution")]
    CancelledByClear { request_id: String },

    /// A request exceeded its configured per-request deadline.
    #[error("request {request_id} timed out after {elapsed:?}")]
    Timeout {
        request_id: String,
        elapsed: Duration,
    },

    /// The agent handler returned an error, or panicked.
    #[error("handler failed for request {request_id}: {reason}")]
    HandlerFailure { request_id: String, reason: String },

    /// A cron schedule expression could not be parsed.
    #[error("invalid cron expression: {0}")]
    ScheduleParse(String),

    /// Cron or heartbeat persistence could not be read or written.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// Delivering a completed response back to its originating channel failed.
    #[error("delivery failed: {0}")]
    Delivery(#[from] ChannelError),

    /// A channel-facing error bubbled up through the dispatch boundary.
    #[error("channel error: {0}")]
    Channel(String),
}

impl GatewayError {
    /// A human-readable kind string, stable across variants, for logging
    /// and for turning a `GatewayError` into a `MessageResponse.error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LockHeld { .. } => "lock_held",
            Self::LockIo { .. } => "lock_io",
            Self::CancelledByClear { .. } => "cancelled",
            Self::Timeout { .. } => "timeout",
            Self::HandlerFailure { .. } => "handler_failure",
            Self::ScheduleParse(_) => "schedule_parse",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::Delivery(_) => "delivery",
            Self::Channel(_) => "channel",
        }
    }
}

/// Result type for gateway-core operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
