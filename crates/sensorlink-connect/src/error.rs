//! Error types for the sensorlink-connect crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid collector address: {0}")]
    InvalidAddress(String),

    #[error("Connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {address} timed out")]
    Timeout { address: String },

    #[error("Send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Connection was disconnected locally")]
    Disconnected,
}

impl ConnectError {
    /// Whether the failure came from the network rather than local teardown
    pub fn is_transient(&self) -> bool {
        use std::io::ErrorKind::*;
        match self {
            ConnectError::Timeout { .. } | ConnectError::Closed => true,
            ConnectError::Connect { source, .. }
            | ConnectError::Send(source)
            | ConnectError::Receive(source) => matches!(
                source.kind(),
                ConnectionRefused
                    | ConnectionReset
                    | ConnectionAborted
                    | NotConnected
                    | BrokenPipe
                    | TimedOut
                    | Interrupted
            ),
            ConnectError::InvalidAddress(_) | ConnectError::Disconnected => false,
        }
    }
}
