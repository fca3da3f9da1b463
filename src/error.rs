use thiserror::Error;

/// Errors raised while processing a single event. Each variant carries its own
/// acknowledgement policy, applied by the consumer loop (see `consumer.rs`):
/// most are logged and acknowledged so a single bad message cannot wedge a
/// consumer group; `CacheUnavailable` and `TransportError` are the exceptions
/// that must be retried.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("transport error: {0}")]
    TransportError(String),
}

impl EngineError {
    /// Whether the consumer should acknowledge the message despite this
    /// error. `false` means the message is left unacknowledged for redelivery.
    pub fn should_ack(&self) -> bool {
        !matches!(
            self,
            EngineError::CacheUnavailable(_) | EngineError::TransportError(_)
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::MalformedMessage(_) => "malformed_message",
            EngineError::UnknownEventType(_) => "unknown_event_type",
            EngineError::InvalidPayload(_) => "invalid_payload",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::CacheUnavailable(_) => "cache_unavailable",
            EngineError::TransportError(_) => "transport_error",
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_timeout() || err.is_io_error() {
            EngineError::TransportError(err.to_string())
        } else {
            EngineError::CacheUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedMessage(format!("JSON parsing failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
