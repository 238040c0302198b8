// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ghs-net: the transport collaborator for the GHS state machine.
//!
//! Three concerns, one module each: [`wire`] frames messages and suppresses
//! duplicates so the core sees at-most-once delivery; [`metrics`] turns
//! throughput measurements into the symmetric, globally unique edge weights
//! the algorithm's tie-breaking demands; [`transport`] moves frames between
//! nodes over TCP and reports peers that are gone for good.
#![forbid(unsafe_code)]

pub mod metrics;
pub mod transport;
pub mod wire;

pub use metrics::{kbps_from, sym_metric};
pub use transport::{Transport, TransportError, TransportEvent};
pub use wire::{DupFilter, Frame, FramePayload, Sequencer, WireError, MAX_FRAME_SIZE};
