// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Length-prefixed frames, per-sender sequencing, duplicate suppression.
//!
//! The network layer promises eventual delivery, not unique delivery, and
//! the state machine is sensitive to duplicated messages. Every outgoing
//! frame therefore carries a per-destination monotonic sequence number, and
//! the receiving side drops anything it has already seen.
//!
//! Stream layout per frame: `len:u32` (big-endian, body length) followed by
//! the body `from:u16 | seq:u64 | kind:u8 | payload`.

use ghs_core::{AgentId, Msg, MAX_WIRE_SIZE};
use std::collections::HashMap;
use thiserror::Error;

/// Hard cap on a frame body; anything longer is dropped on sight.
pub const MAX_FRAME_SIZE: usize = 1024;

const BODY_HEADER: usize = 2 + 8 + 1;

const K_GHS: u8 = 0;
const K_PING: u8 = 1;
const K_METRICS: u8 = 2;

/// Ways a frame can fail to parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes buffered yet for a whole frame.
    #[error("incomplete frame")]
    Incomplete,
    /// The length prefix exceeds [`MAX_FRAME_SIZE`].
    #[error("frame body of {0} bytes exceeds the cap")]
    Oversize(usize),
    /// Unknown frame kind byte.
    #[error("unrecognized frame kind {0}")]
    BadKind(u8),
    /// The embedded algorithm message failed to decode.
    #[error(transparent)]
    Codec(#[from] ghs_core::Error),
}

/// What a frame carries: algorithm traffic, or the transport's own
/// benchmarking chatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePayload {
    /// A GHS message, opaque to the transport.
    Ghs(Msg),
    /// Throughput probe carrying `n` bytes of padding and nothing else.
    Ping(u16),
    /// The sender's measured throughput toward the receiver, in kbit/s.
    /// Exchanged so both ends of a link agree on its weight.
    Metrics(u64),
}

/// One transport frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Sending agent.
    pub from: AgentId,
    /// Per-destination monotonic sequence number.
    pub seq: u64,
    /// Carried content.
    pub payload: FramePayload,
}

impl Frame {
    /// Encodes this frame, length prefix included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(BODY_HEADER + MAX_WIRE_SIZE);
        body.extend_from_slice(&self.from.0.to_be_bytes());
        body.extend_from_slice(&self.seq.to_be_bytes());
        match self.payload {
            FramePayload::Ghs(msg) => {
                body.push(K_GHS);
                let mut buf = [0_u8; MAX_WIRE_SIZE];
                // a Msg always fits MAX_WIRE_SIZE, so encode cannot fail here
                if let Ok(n) = msg.encode(&mut buf) {
                    body.extend_from_slice(&buf[..n]);
                }
            }
            FramePayload::Ping(pad) => {
                body.push(K_PING);
                body.extend_from_slice(&pad.to_be_bytes());
                body.resize(body.len() + usize::from(pad), 0);
            }
            FramePayload::Metrics(kbps) => {
                body.push(K_METRICS);
                body.extend_from_slice(&kbps.to_be_bytes());
            }
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&u32::try_from(body.len()).unwrap_or(0).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decodes one frame from the front of `stream`, returning it and the
    /// number of bytes consumed.
    pub fn decode(stream: &[u8]) -> Result<(Self, usize), WireError> {
        if stream.len() < 4 {
            return Err(WireError::Incomplete);
        }
        let len = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(WireError::Oversize(len));
        }
        if stream.len() < 4 + len {
            return Err(WireError::Incomplete);
        }
        let frame = Self::decode_body(&stream[4..4 + len])?;
        Ok((frame, 4 + len))
    }

    /// Decodes a frame body (everything after the length prefix).
    pub fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        if body.len() < BODY_HEADER {
            return Err(WireError::Incomplete);
        }
        let from = AgentId(u16::from_be_bytes([body[0], body[1]]));
        let mut seq_word = [0_u8; 8];
        seq_word.copy_from_slice(&body[2..10]);
        let seq = u64::from_be_bytes(seq_word);
        let payload = match body[10] {
            K_GHS => FramePayload::Ghs(Msg::decode(&body[BODY_HEADER..])?),
            K_PING => {
                if body.len() < BODY_HEADER + 2 {
                    return Err(WireError::Incomplete);
                }
                FramePayload::Ping(u16::from_be_bytes([body[11], body[12]]))
            }
            K_METRICS => {
                if body.len() < BODY_HEADER + 8 {
                    return Err(WireError::Incomplete);
                }
                let mut word = [0_u8; 8];
                word.copy_from_slice(&body[11..19]);
                FramePayload::Metrics(u64::from_be_bytes(word))
            }
            other => return Err(WireError::BadKind(other)),
        };
        Ok(Self { from, seq, payload })
    }
}

/// Stamps outgoing frames with a per-destination monotonic sequence.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: HashMap<AgentId, u64>,
}

impl Sequencer {
    /// The next sequence number for frames bound for `to`.
    pub fn next_for(&mut self, to: AgentId) -> u64 {
        let counter = self.next.entry(to).or_insert(0);
        let seq = *counter;
        *counter += 1;
        seq
    }
}

/// Records the highest sequence seen per sender and rejects replays.
#[derive(Debug, Default)]
pub struct DupFilter {
    last: HashMap<AgentId, u64>,
}

impl DupFilter {
    /// True when the frame is fresh; false when it repeats (or precedes)
    /// something already accepted from that sender.
    pub fn accept(&mut self, from: AgentId, seq: u64) -> bool {
        match self.last.get_mut(&from) {
            Some(last) if seq <= *last => false,
            Some(last) => {
                *last = seq;
                true
            }
            None => {
                self.last.insert(from, seq);
                true
            }
        }
    }
}
