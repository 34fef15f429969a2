/*!
 * Sensorlink - sensor stream relay
 *
 * Streams device sensor readings to a remote collector over one TCP
 * connection:
 * - Greeting handshake with optional collector acknowledgment
 * - Location, motion, and ranging frames relayed in a fixed order
 * - Clean start/stop without leaking sensor subscriptions or sockets
 * - Latest readings mirrored to display observers
 */

pub mod broadcast;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod producer;
pub mod protocol;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use broadcast::{LatestReadings, ReadingUpdate};
pub use collector::{Collected, Collector, CollectorOptions};
pub use config::{AckPolicy, LogLevel, RelayConfig, TerminalPolicy};
pub use error::{ErrorCategory, Stage, StreamError};
pub use orchestrator::{ProducerSet, StreamOrchestrator};
pub use producer::{
    Access, DepthMap, ImageFrame, LocationFix, MotionSample, RangingProducer, SimulatedSensors,
};
pub use session::{Completion, SessionState};

pub use sensorlink_connect::{ConnectError, ConnectOptions, Connection, Framing};
pub use sensorlink_core_interface::{
    NullBroadcaster, Producer, ProducerError, Reading, ReadingBroadcaster, ReadingCallback,
    ReadingKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
