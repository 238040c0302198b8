// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The closed failure taxonomy shared by every fallible operation.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a core operation can fail.
///
/// Input-validation and phase-mismatch errors leave the state machine
/// untouched; join-protocol violations abort the handler mid-flight and the
/// caller may [`reset`](crate::state::GhsState::reset) and restart;
/// [`Error::Impl`] means an invariant was broken and the caller should abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A message arrived carrying our own id in its `from` field.
    #[error("cannot process a message from ourselves")]
    ProcessSelfMsg,
    /// A message arrived that is addressed to somebody else.
    #[error("cannot process a message not addressed to us")]
    ProcessNotMe,
    /// The wire discriminator did not match any known message kind.
    #[error("unrecognized message discriminator")]
    ProcessInvalidType,
    /// The message kind is only meaningful over an MST link, and this one
    /// did not come over an MST link.
    #[error("message required an MST edge")]
    ProcessReqMst,
    /// No stored edge leads to the sending agent.
    #[error("no edge to the sending agent")]
    ProcessNoEdgeFound,
    /// A search request arrived from a sender we have no reason to hear from.
    #[error("search from an unexpected sender")]
    SrchInvalidSender,
    /// A search request arrived while the previous search is still running.
    #[error("search arrived while still waiting on the last one")]
    SrchStillWaiting,
    /// A search reply arrived outside an active search, or from a peer we
    /// were not waiting on.
    #[error("unexpected search reply")]
    UnexpectedSrchRet,
    /// A partition acknowledgement arrived while we were not waiting for one.
    #[error("ack arrived while not waiting on that peer")]
    AckNotWaiting,
    /// The message is malformed.
    #[error("malformed message")]
    BadMsg,
    /// A join relay named a leader that is not ours, yet we are not on a
    /// partition boundary.
    #[error("join relay with a foreign leader")]
    JoinBadLeader,
    /// A join relay named a level that does not match ours.
    #[error("join relay with a mismatched level")]
    JoinBadLevel,
    /// Told to initiate a join toward another partition, but the named
    /// leader is unrecognized.
    #[error("join initiation with an unrecognized leader")]
    JoinInitBadLeader,
    /// Told to initiate a join toward another partition, but the named level
    /// does not match ours.
    #[error("join initiation with a mismatched level")]
    JoinInitBadLevel,
    /// The other partition proposed that we join our own partition.
    #[error("asked to join our own partition")]
    JoinMyLeader,
    /// A higher-level partition replied to us before it should have known
    /// the answer.
    #[error("join reply from a level that should not have answered yet")]
    JoinUnexpectedReply,
    /// A cast operation found an edge not rooted at this node.
    #[error("edge table contains an edge not rooted here")]
    CastInvalidEdge,
    /// The edge being stored is not rooted at this node.
    #[error("edge is not rooted at this agent")]
    SetInvalidEdge,
    /// The proposed parent is not a neighbor.
    #[error("no edge to the proposed parent")]
    ParentUnrecognized,
    /// The proposed parent is a neighbor, but not over an MST link.
    #[error("parent link must be an MST edge")]
    ParentReqMst,
    /// No slot matches the given agent id.
    #[error("no such peer")]
    NoSuchPeer,
    /// Our own id was used where a peer id is required.
    #[error("own id used as a peer")]
    ImplReqPeerMyId,
    /// The fixed-capacity peer table is full.
    #[error("too many agents for static storage")]
    TooManyAgents,
    /// `push` on a queue that is at capacity.
    #[error("queue is full")]
    QueueFull,
    /// `pop`/`front` on an empty queue.
    #[error("queue is empty")]
    QueueEmpty,
    /// Indexed access beyond the queue's static capacity.
    #[error("index beyond queue capacity")]
    BadIdx,
    /// Indexed access beyond the queue's current size.
    #[error("no element at that index")]
    NoSuchElement,
    /// Reached a branch the invariants forbid; indicates a bug.
    #[error("implementation error: unreachable branch taken")]
    Impl,
}
