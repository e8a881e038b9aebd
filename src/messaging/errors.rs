//! # Messaging Error Types
//!
//! Structured error handling for the stream messaging layer using thiserror
//! instead of `Box<dyn Error>` patterns.

use thiserror::Error;

use crate::resilience::CircuitBreakerError;

/// Comprehensive messaging error types
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Stream operation failed: {stream}: {operation}: {message}")]
    StreamOperation {
        stream: String,
        operation: String,
        message: String,
    },

    #[error("Consumer group operation failed: {group}@{stream}: {message}")]
    GroupOperation {
        stream: String,
        group: String,
        message: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Circuit breaker is open for component: {component}")]
    CircuitBreakerOpen { component: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a broker connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a stream operation error
    pub fn stream_operation(
        stream: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StreamOperation {
            stream: stream.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a consumer group error
    pub fn group_operation(
        stream: impl Into<String>,
        group: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::GroupOperation {
            stream: stream.into(),
            group: group.into(),
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create a circuit breaker open error
    pub fn circuit_breaker_open(component: impl Into<String>) -> Self {
        Self::CircuitBreakerOpen {
            component: component.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for transport-level failures worth an inline retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::StreamOperation { .. }
        )
    }
}

/// Conversion from redis::RedisError to MessagingError
impl From<redis::RedisError> for MessagingError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            MessagingError::timeout("redis", 0)
        } else if err.is_connection_refusal() || err.is_connection_dropped() {
            MessagingError::connection(err.to_string())
        } else {
            MessagingError::internal(err.to_string())
        }
    }
}

/// Conversion from serde_json::Error to MessagingError
impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

/// Conversion from circuit breaker errors
impl From<CircuitBreakerError<MessagingError>> for MessagingError {
    fn from(err: CircuitBreakerError<MessagingError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen { component } => {
                MessagingError::circuit_breaker_open(component)
            }
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
