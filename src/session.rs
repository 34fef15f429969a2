//! Session: the orchestrator's per-attempt state
//!
//! One `Session` exists per orchestrator. It is created Idle, walked through
//! the protocol states by the dispatch task, and reset to Idle (never
//! destroyed) after `stop` or a terminal result.
//!
//! # Session States
//!
//! ```text
//!                    ┌─────────────┐
//!       start() ───> │ Connecting  │
//!                    └──────┬──────┘
//!                           │ connected
//!                    ┌──────▼──────┐
//!                    │ Handshaking │ ← greeting (+ optional ack)
//!                    └──────┬──────┘
//!                           │ greeting sent
//!                    ┌──────▼──────┐
//!                    │  Streaming  │ ← one relay step per producer
//!                    └──────┬──────┘
//!                           │ done / failed / stop()
//!                    ┌──────▼──────┐
//!                    │    Idle     │
//!                    └─────────────┘
//! ```
//!
//! `stop()` passes through `Stopping` from any state before landing on Idle.
//!
//! Every `begin` and `reset` bumps the generation. Work spawned for one
//! generation reports back tagged with it, so results that arrive after the
//! session moved on are recognised as stale.

use crate::error::StreamError;
use sensorlink_connect::Connection;
use sensorlink_core_interface::ReadingKind;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Externally visible state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session in progress
    Idle,

    /// Opening the collector connection
    Connecting,

    /// Sending the greeting (and awaiting the ack when required)
    Handshaking,

    /// Relaying producer readings
    Streaming,

    /// Tearing down after `stop()`
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        }
    }

    /// States in which the session must own a connection
    fn requires_connection(&self) -> bool {
        matches!(self, SessionState::Handshaking | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot completion for a `start` call
pub type Completion = Box<dyn FnOnce(Result<(), StreamError>) + Send + 'static>;

/// Mutable session state, owned exclusively by the dispatch task
pub(crate) struct Session {
    state: SessionState,
    generation: u64,
    connection: Option<Arc<Connection>>,
    active_producers: Vec<ReadingKind>,
    pending_completion: Option<Completion>,
    plan: VecDeque<ReadingKind>,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    pub(crate) fn new(state_tx: watch::Sender<SessionState>) -> Self {
        state_tx.send_replace(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            generation: 0,
            connection: None,
            active_producers: Vec::new(),
            pending_completion: None,
            plan: VecDeque::new(),
            state_tx,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub(crate) fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    pub(crate) fn transition(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        debug_assert!(
            !to.requires_connection() || self.connection.is_some(),
            "{} without a connection",
            to
        );
        debug!(
            from = self.state.as_str(),
            to = to.as_str(),
            generation = self.generation,
            "Session transition"
        );
        self.state = to;
        self.state_tx.send_replace(to);
    }

    /// Open a new attempt: Idle → Connecting. Returns the new generation.
    pub(crate) fn begin(&mut self, completion: Completion, plan: VecDeque<ReadingKind>) -> u64 {
        self.generation += 1;
        self.pending_completion = Some(completion);
        self.plan = plan;
        self.transition(SessionState::Connecting);
        self.generation
    }

    pub(crate) fn attach_connection(&mut self, connection: Arc<Connection>) {
        self.connection = Some(connection);
    }

    /// Next producer to relay, if any remain
    pub(crate) fn next_stage(&mut self) -> Option<ReadingKind> {
        self.plan.pop_front()
    }

    pub(crate) fn mark_started(&mut self, kind: ReadingKind) {
        if !self.active_producers.contains(&kind) {
            self.active_producers.push(kind);
        }
    }

    pub(crate) fn take_completion(&mut self) -> Option<Completion> {
        self.pending_completion.take()
    }

    /// Hand over the connection and started producers for teardown
    pub(crate) fn take_resources(&mut self) -> (Option<Arc<Connection>>, Vec<ReadingKind>) {
        (
            self.connection.take(),
            std::mem::take(&mut self.active_producers),
        )
    }

    pub(crate) fn has_resources(&self) -> bool {
        self.connection.is_some() || !self.active_producers.is_empty()
    }

    /// Return to Idle, abandoning any pending completion and remaining plan
    ///
    /// The connection and started producers are left in place; callers take
    /// them first when they are to be torn down.
    pub(crate) fn reset(&mut self) {
        self.generation += 1;
        self.plan.clear();
        if self.pending_completion.take().is_some() {
            debug!(
                generation = self.generation,
                "Pending completion abandoned"
            );
        }
        self.transition(SessionState::Idle);
    }
}
