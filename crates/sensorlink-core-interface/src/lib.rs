//! Sensorlink Core Interface: producer and reading abstractions
//!
//! This crate defines the `Producer` trait and the `Reading` value that flows
//! from sensor acquisition into the relay pipeline, plus the
//! `ReadingBroadcaster` seam used to mirror readings to display observers.
//!
//! # Architecture
//!
//! - **Reading**: one serialized sample of a given `ReadingKind`. The payload
//!   format belongs to the producer; the relay never interprets it.
//! - **Producer**: an asynchronously-updating source that can be started and
//!   stopped repeatedly and delivers readings or failures through a callback.
//! - **ReadingBroadcaster**: a publish point injected into the orchestrator.
//!
//! # Example
//!
//! ```rust,no_run
//! use sensorlink_core_interface::{Producer, Reading, ReadingCallback};
//! use std::sync::Arc;
//!
//! async fn first_reading<P: Producer>(producer: &P) {
//!     let on_reading: ReadingCallback = Arc::new(|result| match result {
//!         Ok(reading) => println!("{} bytes of {}", reading.len(), reading.kind()),
//!         Err(e) => eprintln!("producer failed: {}", e),
//!     });
//!     if let Err(e) = producer.start(on_reading).await {
//!         eprintln!("could not start: {}", e);
//!     }
//! }
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// The kinds of reading a producer can yield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReadingKind {
    /// Accelerometer + gyroscope sample
    Motion,
    /// Geographic position fix
    Location,
    /// Depth map from the ranging sensor
    Ranging,
    /// Encoded camera frame
    Imagery,
}

impl ReadingKind {
    /// All kinds, in declaration order
    pub const ALL: [ReadingKind; 4] = [
        ReadingKind::Motion,
        ReadingKind::Location,
        ReadingKind::Ranging,
        ReadingKind::Imagery,
    ];

    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingKind::Motion => "motion",
            ReadingKind::Location => "location",
            ReadingKind::Ranging => "ranging",
            ReadingKind::Imagery => "imagery",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a producer, either from `start` or through its callback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error("Authorization denied for {0} sensor")]
    AuthorizationDenied(ReadingKind),

    #[error("{0} sensor unavailable on this device")]
    Unavailable(ReadingKind),

    #[error("No {0} data captured yet")]
    NoData(ReadingKind),

    #[error("Empty {0} payload")]
    EmptyPayload(ReadingKind),

    #[error("Invalid sensor data: {0}")]
    InvalidData(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Producer error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for ProducerError {
    fn from(err: serde_json::Error) -> Self {
        ProducerError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProducerError>;

/// One serialized sample produced by a sensor
///
/// The payload is immutable and never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    kind: ReadingKind,
    payload: Bytes,
    captured_at: SystemTime,
}

impl Reading {
    /// Wrap a serialized payload, stamping it with the current time
    pub fn new(kind: ReadingKind, payload: impl Into<Bytes>) -> Result<Self> {
        Self::captured_at(kind, payload, SystemTime::now())
    }

    /// Wrap a serialized payload captured at a known instant
    pub fn captured_at(
        kind: ReadingKind,
        payload: impl Into<Bytes>,
        captured_at: SystemTime,
    ) -> Result<Self> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ProducerError::EmptyPayload(kind));
        }
        Ok(Self {
            kind,
            payload,
            captured_at,
        })
    }

    pub fn kind(&self) -> ReadingKind {
        self.kind
    }

    /// The serialized bytes (cheap to clone)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn captured(&self) -> SystemTime {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Callback a producer invokes for every reading or failure after `start`
pub type ReadingCallback = Arc<dyn Fn(Result<Reading>) + Send + Sync>;

/// An asynchronously-updating sensor source
///
/// Implementations are long-lived: constructed once, then started and stopped
/// any number of times.
///
/// # Contract
///
/// - `start` registers `on_reading` and begins delivery. Calling it while
///   already running replaces the previous subscription.
/// - An `Err` from `start` means nothing will be delivered for this start.
/// - After `stop` returns, `on_reading` is never invoked again.
/// - `stop` on a producer that is not running is a no-op.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    /// Kind of reading this producer yields
    fn kind(&self) -> ReadingKind;

    /// Begin delivering readings to `on_reading`
    async fn start(&self, on_reading: ReadingCallback) -> Result<()>;

    /// Stop delivery
    async fn stop(&self);
}

/// Publish point mirroring the latest reading of each kind to observers
///
/// The relay pushes into it but never depends on it for correctness.
pub trait ReadingBroadcaster: Send + Sync {
    fn publish(&self, reading: &Reading);
}

/// Broadcaster that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcaster;

impl ReadingBroadcaster for NullBroadcaster {
    fn publish(&self, _reading: &Reading) {}
}
