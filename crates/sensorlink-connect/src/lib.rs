//! Sensorlink Connect: client-side TCP connectivity to the remote collector
//!
//! This crate owns the socket half of the relay: establishing the connection,
//! writing whole frames, reading the collector's replies and tearing the
//! socket down again. It carries no knowledge of the relay protocol itself.
//!
//! # Architecture
//!
//! - **Connection**: one TCP socket split into read/write halves, each behind
//!   its own lock, with a cancellation token that `disconnect` fires so no
//!   pending operation outlives the socket
//! - **Framing**: raw payloads (wire-compatible default) or a 4-byte length
//!   prefix per frame
//!
//! # Example
//!
//! ```rust,no_run
//! use sensorlink_connect::{ConnectOptions, Connection, Framing};
//!
//! async fn example() -> Result<(), sensorlink_connect::ConnectError> {
//!     let options = ConnectOptions {
//!         framing: Framing::LengthPrefixed,
//!         ..Default::default()
//!     };
//!     let conn = Connection::connect("10.0.0.5", 9000, &options).await?;
//!     conn.send(b"Hello Server").await?;
//!     conn.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;

pub use connection::{length_prefix_codec, ConnectOptions, Connection, Framing};
pub use error::ConnectError;
