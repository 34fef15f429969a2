//! Relay protocol constants
//!
//! A session writes the greeting, then one frame per producer in a fixed
//! order. The collector relies on that order to tell frames apart.

use sensorlink_core_interface::ReadingKind;
use std::collections::VecDeque;

/// First frame of every session, sent as soon as the socket is up
pub const GREETING: &[u8] = b"Hello Server";

/// Producers relayed in every session, in wire order
pub const RELAY_ORDER: [ReadingKind; 3] = [
    ReadingKind::Location,
    ReadingKind::Motion,
    ReadingKind::Ranging,
];

/// Stages a session walks through after the handshake
pub fn relay_plan(include_imagery: bool) -> VecDeque<ReadingKind> {
    let mut plan: VecDeque<ReadingKind> = RELAY_ORDER.iter().copied().collect();
    if include_imagery {
        plan.push_back(ReadingKind::Imagery);
    }
    plan
}
