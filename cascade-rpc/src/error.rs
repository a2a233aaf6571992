//! Endpoint-specific error types

use thiserror::Error;

/// Errors that can occur during endpoint operations
#[derive(Error, Debug, Clone)]
pub enum EndpointError {
    #[error("Duplicate endpoint name: {0}")]
    DuplicateName(String),

    #[error("Endpoint not found: {0}")]
    NotFound(String),

    #[error("Request for unknown endpoint id: {0}")]
    UnknownEndpoint(u64),

    #[error("Response for unknown request id: {0}")]
    UnknownRequest(u64),

    #[error("Handler failure: {0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Endpoint {0} has no remote participants")]
    NoParticipants(String),

    #[error("Proxy has been destroyed")]
    ProxyDestroyed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EndpointError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            EndpointError::DuplicateName(_) => "duplicate_name",
            EndpointError::NotFound(_) => "not_found",
            EndpointError::UnknownEndpoint(_) => "unknown_endpoint",
            EndpointError::UnknownRequest(_) => "unknown_request",
            EndpointError::Handler(_) => "handler",
            EndpointError::Serialization(_) => "serialization",
            EndpointError::Transport(_) => "transport",
            EndpointError::NoParticipants(_) => "no_participants",
            EndpointError::ProxyDestroyed => "proxy_destroyed",
            EndpointError::Config(_) => "config",
        }
    }
}

impl From<std::io::Error> for EndpointError {
    fn from(err: std::io::Error) -> Self {
        EndpointError::Transport(err.to_string())
    }
}

impl From<bincode::Error> for EndpointError {
    fn from(err: bincode::Error) -> Self {
        EndpointError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EndpointError>;
