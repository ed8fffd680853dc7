use crate::types::TransportKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BayScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Description error: {0}")]
    Describe(#[from] DescribeError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl BayScanError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by scanner transports. A read timeout is not an error and is
/// reported as `Ok(None)` by `read_chunk`.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Access to {kind} scanner denied")]
    PermissionDenied { kind: TransportKind },

    #[error("No {kind} scanner device found")]
    NotFound { kind: TransportKind },

    #[error("Failed to open {kind} scanner: {details}")]
    Open {
        kind: TransportKind,
        details: String,
    },

    #[error("Scanner read failed: {details}")]
    Read { details: String },

    #[error("Scanner disconnected")]
    Disconnected,
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum DescribeError {
    #[error("Description service unavailable: {details}")]
    Unavailable { details: String },

    #[error("Description request failed: {details}")]
    Request { details: String },
}

pub type Result<T> = std::result::Result<T, BayScanError>;
