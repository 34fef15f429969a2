/*!
 * Error types for sensorlink
 */

use sensorlink_connect::ConnectError;
use sensorlink_core_interface::{ProducerError, ReadingKind};
use std::fmt;
use thiserror::Error;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Protocol stage at which a session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Connect,
    Handshake,
    Acknowledge,
    Location,
    Motion,
    Ranging,
    Imagery,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::Handshake => "handshake",
            Stage::Acknowledge => "acknowledge",
            Stage::Location => "location",
            Stage::Motion => "motion",
            Stage::Ranging => "ranging",
            Stage::Imagery => "imagery",
        }
    }

    /// Whether any sensor frame could have reached the collector before this stage
    pub fn is_relay(&self) -> bool {
        matches!(
            self,
            Stage::Location | Stage::Motion | Stage::Ranging | Stage::Imagery
        )
    }
}

impl From<ReadingKind> for Stage {
    fn from(kind: ReadingKind) -> Self {
        match kind {
            ReadingKind::Location => Stage::Location,
            ReadingKind::Motion => Stage::Motion,
            ReadingKind::Ranging => Stage::Ranging,
            ReadingKind::Imagery => Stage::Imagery,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error of a streaming session, delivered once through `on_complete`
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("A streaming session is already in progress")]
    AlreadyStreaming,

    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] ConnectError),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(#[source] ConnectError),

    #[error("Acknowledgment receive failed: {0}")]
    ReceiveFailed(#[source] ConnectError),

    #[error("Location unavailable: {0}")]
    LocationUnavailable(#[source] ProducerError),

    #[error("{stage} producer failed: {source}")]
    ProducerFailed {
        stage: Stage,
        #[source]
        source: ProducerError,
    },

    #[error("Sending {stage} frame failed: {source}")]
    SendFailed {
        stage: Stage,
        #[source]
        source: ConnectError,
    },

    #[error("Streaming session stopped before completing")]
    Cancelled,

    #[error("Stream orchestrator has shut down")]
    OrchestratorClosed,
}

impl StreamError {
    /// Map a producer failure to the error for its relay stage
    pub fn from_producer(kind: ReadingKind, source: ProducerError) -> Self {
        match kind {
            ReadingKind::Location => StreamError::LocationUnavailable(source),
            other => StreamError::ProducerFailed {
                stage: Stage::from(other),
                source,
            },
        }
    }

    /// Stage that produced this error (None for rejections outside a session)
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StreamError::AlreadyStreaming
            | StreamError::Cancelled
            | StreamError::OrchestratorClosed => None,
            StreamError::ConnectionFailed(_) => Some(Stage::Connect),
            StreamError::HandshakeFailed(_) => Some(Stage::Handshake),
            StreamError::ReceiveFailed(_) => Some(Stage::Acknowledge),
            StreamError::LocationUnavailable(_) => Some(Stage::Location),
            StreamError::ProducerFailed { stage, .. } | StreamError::SendFailed { stage, .. } => {
                Some(*stage)
            }
        }
    }

    /// True when the user must grant a sensor permission before retrying
    pub fn is_authorization_denied(&self) -> bool {
        matches!(
            self,
            StreamError::LocationUnavailable(ProducerError::AuthorizationDenied(_))
                | StreamError::ProducerFailed {
                    source: ProducerError::AuthorizationDenied(_),
                    ..
                }
        )
    }

    /// Check if this error is transient (re-invoking `start` may succeed)
    pub fn is_transient(&self) -> bool {
        match self {
            StreamError::AlreadyStreaming => true,
            StreamError::ConnectionFailed(e)
            | StreamError::HandshakeFailed(e)
            | StreamError::ReceiveFailed(e)
            | StreamError::SendFailed { source: e, .. } => e.is_transient(),
            StreamError::LocationUnavailable(e) | StreamError::ProducerFailed { source: e, .. } => {
                matches!(e, ProducerError::NoData(_))
            }
            StreamError::Cancelled | StreamError::OrchestratorClosed => false,
        }
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::AlreadyStreaming
            | StreamError::Cancelled
            | StreamError::OrchestratorClosed => ErrorCategory::Lifecycle,
            StreamError::ConnectionFailed(_)
            | StreamError::HandshakeFailed(_)
            | StreamError::ReceiveFailed(_)
            | StreamError::SendFailed { .. } => ErrorCategory::Network,
            _ if self.is_authorization_denied() => ErrorCategory::Permission,
            StreamError::LocationUnavailable(_) | StreamError::ProducerFailed { .. } => {
                ErrorCategory::Sensor
            }
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.stage() {
            Some(stage) if stage.is_relay() => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Start/stop misuse or a torn-down orchestrator
    Lifecycle,
    /// Transport failures
    Network,
    /// Sensor authorization missing
    Permission,
    /// Sensor unavailable or produced bad data
    Sensor,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Lifecycle => write!(f, "lifecycle"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Sensor => write!(f, "sensor"),
        }
    }
}
