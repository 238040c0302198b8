// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Message envelope, the seven payload kinds, and the stable byte codec.
//!
//! The wire layout is fixed so that independently built nodes interoperate:
//! a 4-byte envelope (`to`, `from` as big-endian `u16`), one discriminator
//! byte, then the payload fields in declaration order, big-endian. Framing,
//! sequencing, and compression live a layer down in the transport.

use crate::agent::AgentId;
use crate::edge::Metric;
use crate::error::{Error, Result};
use crate::level::Level;
use std::fmt;

/// Requests a search of the MST subtree rooted at the receiver for the
/// minimum-weight outgoing edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SrchPayload {
    /// The sender's partition leader, adopted by the receiver.
    pub leader: AgentId,
    /// The sender's partition level, adopted by the receiver.
    pub level: Level,
}

/// Convergecast reply carrying the best outgoing edge found in a subtree.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SrchRetPayload {
    /// Far end of the candidate edge.
    pub peer: AgentId,
    /// Near end of the candidate edge (the node that owns it).
    pub root: AgentId,
    /// Weight of the candidate edge; [`Metric::WORST`] means "none found".
    pub metric: Metric,
}

/// "Are you in my partition?" probe sent along edges of unknown status.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct InPartPayload {
    /// The prober's partition leader.
    pub leader: AgentId,
    /// The prober's partition level.
    pub level: Level,
}

/// Directs absorption or merge along a specific edge.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct JoinUsPayload {
    /// The endpoint of the chosen edge in the *other* partition.
    pub join_peer: AgentId,
    /// The endpoint of the chosen edge in the *initiating* partition.
    pub join_root: AgentId,
    /// Leader of the initiating partition, as declared during the search.
    pub proposed_leader: AgentId,
    /// Level of the initiating partition, as declared during the search.
    pub proposed_level: Level,
}

/// The seven message kinds exchanged between agents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Payload {
    /// Convergence announcement, broadcast down the tree by the leader.
    Noop,
    /// Begin a subtree search.
    Srch(SrchPayload),
    /// Subtree search result.
    SrchRet(SrchRetPayload),
    /// Partition membership probe.
    InPart(InPartPayload),
    /// "Yes, same partition."
    AckPart,
    /// "No, different partition."
    NackPart,
    /// Merge-or-absorb directive.
    JoinUs(JoinUsPayload),
}

impl Payload {
    /// Short name of the kind, for logs.
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Srch(_) => "SRCH",
            Self::SrchRet(_) => "SRCH_RET",
            Self::InPart(_) => "IN_PART",
            Self::AckPart => "ACK_PART",
            Self::NackPart => "NACK_PART",
            Self::JoinUs(_) => "JOIN_US",
        }
    }
}

/// A routed message: envelope plus payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Msg {
    /// Destination agent.
    pub to: AgentId,
    /// Originating agent.
    pub from: AgentId,
    /// What the message says.
    pub payload: Payload,
}

/// Largest encoded size of any message, in bytes.
pub const MAX_WIRE_SIZE: usize = ENVELOPE_SIZE + 12;

const ENVELOPE_SIZE: usize = 5;

const D_NOOP: u8 = 0;
const D_SRCH: u8 = 1;
const D_SRCH_RET: u8 = 2;
const D_IN_PART: u8 = 3;
const D_ACK_PART: u8 = 4;
const D_NACK_PART: u8 = 5;
const D_JOIN_US: u8 = 6;

fn get_u16(b: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([b[at], b[at + 1]])
}

fn get_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn get_u64(b: &[u8], at: usize) -> u64 {
    let mut word = [0_u8; 8];
    word.copy_from_slice(&b[at..at + 8]);
    u64::from_be_bytes(word)
}

impl Msg {
    /// Builds a message addressed `to` from `from`.
    #[must_use]
    pub fn new(to: AgentId, from: AgentId, payload: Payload) -> Self {
        Self { to, from, payload }
    }

    /// Encoded size of this message, in bytes.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        ENVELOPE_SIZE
            + match self.payload {
                Payload::Noop | Payload::AckPart | Payload::NackPart => 0,
                Payload::Srch(_) | Payload::InPart(_) => 6,
                Payload::JoinUs(_) => 10,
                Payload::SrchRet(_) => 12,
            }
    }

    /// Encodes into the front of `buf`, returning the byte count written.
    ///
    /// Fails with [`Error::BadIdx`] when `buf` is too small.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let need = self.wire_size();
        if buf.len() < need {
            return Err(Error::BadIdx);
        }
        buf[0..2].copy_from_slice(&self.to.0.to_be_bytes());
        buf[2..4].copy_from_slice(&self.from.0.to_be_bytes());
        match self.payload {
            Payload::Noop => buf[4] = D_NOOP,
            Payload::AckPart => buf[4] = D_ACK_PART,
            Payload::NackPart => buf[4] = D_NACK_PART,
            Payload::Srch(p) => {
                buf[4] = D_SRCH;
                buf[5..7].copy_from_slice(&p.leader.0.to_be_bytes());
                buf[7..11].copy_from_slice(&p.level.to_be_bytes());
            }
            Payload::InPart(p) => {
                buf[4] = D_IN_PART;
                buf[5..7].copy_from_slice(&p.leader.0.to_be_bytes());
                buf[7..11].copy_from_slice(&p.level.to_be_bytes());
            }
            Payload::SrchRet(p) => {
                buf[4] = D_SRCH_RET;
                buf[5..7].copy_from_slice(&p.peer.0.to_be_bytes());
                buf[7..9].copy_from_slice(&p.root.0.to_be_bytes());
                buf[9..17].copy_from_slice(&p.metric.0.to_be_bytes());
            }
            Payload::JoinUs(p) => {
                buf[4] = D_JOIN_US;
                buf[5..7].copy_from_slice(&p.join_peer.0.to_be_bytes());
                buf[7..9].copy_from_slice(&p.join_root.0.to_be_bytes());
                buf[9..11].copy_from_slice(&p.proposed_leader.0.to_be_bytes());
                buf[11..15].copy_from_slice(&p.proposed_level.to_be_bytes());
            }
        }
        Ok(need)
    }

    /// Decodes one message from the front of `buf`.
    ///
    /// Fails with [`Error::BadMsg`] on truncated input and
    /// [`Error::ProcessInvalidType`] on an unknown discriminator.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENVELOPE_SIZE {
            return Err(Error::BadMsg);
        }
        let to = AgentId(get_u16(buf, 0));
        let from = AgentId(get_u16(buf, 2));
        let need = |n: usize| {
            if buf.len() < ENVELOPE_SIZE + n {
                Err(Error::BadMsg)
            } else {
                Ok(())
            }
        };
        let payload = match buf[4] {
            D_NOOP => Payload::Noop,
            D_ACK_PART => Payload::AckPart,
            D_NACK_PART => Payload::NackPart,
            D_SRCH => {
                need(6)?;
                Payload::Srch(SrchPayload {
                    leader: AgentId(get_u16(buf, 5)),
                    level: get_u32(buf, 7),
                })
            }
            D_IN_PART => {
                need(6)?;
                Payload::InPart(InPartPayload {
                    leader: AgentId(get_u16(buf, 5)),
                    level: get_u32(buf, 7),
                })
            }
            D_SRCH_RET => {
                need(12)?;
                Payload::SrchRet(SrchRetPayload {
                    peer: AgentId(get_u16(buf, 5)),
                    root: AgentId(get_u16(buf, 7)),
                    metric: Metric(get_u64(buf, 9)),
                })
            }
            D_JOIN_US => {
                need(10)?;
                Payload::JoinUs(JoinUsPayload {
                    join_peer: AgentId(get_u16(buf, 5)),
                    join_root: AgentId(get_u16(buf, 7)),
                    proposed_leader: AgentId(get_u16(buf, 9)),
                    proposed_level: get_u32(buf, 11),
                })
            }
            _ => return Err(Error::ProcessInvalidType),
        };
        Ok(Self { to, from, payload })
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}->{}", self.payload.kind_str(), self.from, self.to)?;
        match self.payload {
            Payload::Noop | Payload::AckPart | Payload::NackPart => Ok(()),
            Payload::Srch(SrchPayload { leader, level })
            | Payload::InPart(InPartPayload { leader, level }) => {
                write!(f, " {{leader {leader}, level {level}}}")
            }
            Payload::SrchRet(p) => {
                write!(f, " {{peer {}, root {}, metric {}}}", p.peer, p.root, p.metric.0)
            }
            Payload::JoinUs(p) => write!(
                f,
                " {{peer {}, root {}, leader {}, level {}}}",
                p.join_peer, p.join_root, p.proposed_leader, p.proposed_level
            ),
        }
    }
}
