// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The GHS state machine.
//!
//! One [`GhsState`] runs per node. The owning loop feeds it one incoming
//! message at a time through [`GhsState::process`]; the machine mutates its
//! local view of the partition and stages a bounded batch of outgoing
//! messages in the caller's queue. Bootstrap happens through
//! [`GhsState::start_round`], which only the current leader acts on. When
//! the leader's final broadcast has flooded the tree,
//! [`GhsState::is_converged`] reports true on every node, every node agrees
//! on the leader, and every edge is classified MST or discarded.
//!
//! The machine performs no I/O, never blocks, and never allocates after
//! construction: all per-peer bookkeeping lives in `N` fixed slots.

use crate::agent::AgentId;
use crate::edge::{Edge, EdgeStatus, Metric};
use crate::error::{Error, Result};
use crate::level::{Level, LEVEL_START};
use crate::msg::{InPartPayload, JoinUsPayload, Msg, Payload, SrchPayload, SrchRetPayload};
use crate::queue::StaticQueue;
use std::fmt;
use std::fmt::Write as _;

/// Per-neighbor bookkeeping, one record per slot.
#[derive(Clone, Copy, Debug, Default)]
struct PeerSlot {
    /// The stored edge; `edge.peer` identifies the slot.
    edge: Edge,
    /// We sent this peer an `InPart` and have not heard back.
    waiting: bool,
    /// This peer sent us an `InPart` from a higher level; answer pending.
    deferred: bool,
    /// The probe we deferred, replayed once our level catches up.
    prompt: InPartPayload,
}

/// Message-driven state machine executing the GHS minimum-spanning-tree and
/// leader-election algorithm for a single node.
///
/// `N` caps the number of neighbors; `Q` is the staging capacity for
/// outgoing messages and must match the queue the caller drains.
///
/// Describe the communication graph with [`GhsState::set_edge`] (or via the
/// constructor), call [`GhsState::start_round`] on every node, then feed
/// every delivered message into [`GhsState::process`] and send whatever it
/// stages until [`GhsState::is_converged`] reports true.
pub struct GhsState<const N: usize, const Q: usize> {
    my_id: AgentId,
    my_leader: AgentId,
    parent: AgentId,
    my_level: Level,
    best_edge: Edge,
    converged: bool,
    n_peers: usize,
    slots: [PeerSlot; N],
}

impl<const N: usize, const Q: usize> GhsState<N, Q> {
    /// Creates a node with the given id and the valid subset of
    /// `initial_edges`.
    ///
    /// Edges are filtered, not rejected: anything invalid (sentinel
    /// endpoints, self-loops, reserved metrics), not rooted at `my_id`, or
    /// beyond the `N`-slot capacity is silently dropped.
    #[must_use]
    pub fn new(my_id: AgentId, initial_edges: &[Edge]) -> Self {
        let mut state = Self {
            my_id,
            my_leader: my_id,
            parent: my_id,
            my_level: LEVEL_START,
            best_edge: Edge::worst(),
            converged: false,
            n_peers: 0,
            slots: std::array::from_fn(|_| PeerSlot::default()),
        };
        for e in initial_edges {
            if e.is_valid() {
                let _ = state.set_edge(*e);
            }
        }
        state
    }

    /// Restores post-construction defaults, preserving `my_id` and the edge
    /// table (peers, statuses, metrics). All waiting/deferred bookkeeping is
    /// abandoned; late replies to abandoned probes will be rejected.
    pub fn reset(&mut self) {
        self.my_leader = self.my_id;
        self.my_level = LEVEL_START;
        self.parent = self.my_id;
        self.best_edge = Edge::worst();
        self.converged = false;
        for slot in &mut self.slots[..self.n_peers] {
            slot.waiting = false;
            slot.deferred = false;
            slot.prompt = InPartPayload::default();
        }
    }

    // ── edge table ──────────────────────────────────────────────────

    /// Slot index for `peer`, scanning the fixed table.
    pub fn index_of(&self, peer: AgentId) -> Result<usize> {
        if peer == self.my_id {
            return Err(Error::ImplReqPeerMyId);
        }
        self.slots[..self.n_peers]
            .iter()
            .position(|s| s.edge.peer == peer)
            .ok_or(Error::NoSuchPeer)
    }

    /// True when an edge to `peer` is stored.
    #[must_use]
    pub fn has_edge(&self, peer: AgentId) -> bool {
        self.index_of(peer).is_ok()
    }

    /// Copy of the stored edge to `peer`.
    pub fn get_edge(&self, peer: AgentId) -> Result<Edge> {
        Ok(self.slots[self.index_of(peer)?].edge)
    }

    /// Stores `e`, updating the slot whose peer matches or inserting a new
    /// one. Slot identity is by peer only; `e.root` must be this node.
    pub fn set_edge(&mut self, e: Edge) -> Result<()> {
        if e.root != self.my_id {
            return Err(Error::SetInvalidEdge);
        }
        match self.index_of(e.peer) {
            Ok(idx) => {
                self.slots[idx].edge.status = e.status;
                self.slots[idx].edge.metric = e.metric;
                Ok(())
            }
            Err(Error::NoSuchPeer) => {
                if self.n_peers >= N {
                    return Err(Error::TooManyAgents);
                }
                self.slots[self.n_peers].edge = e;
                self.n_peers += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Reclassifies the stored edge to `peer`.
    pub fn set_edge_status(&mut self, peer: AgentId, status: EdgeStatus) -> Result<()> {
        let idx = self.index_of(peer)?;
        self.slots[idx].edge.status = status;
        Ok(())
    }

    /// Reweights the stored edge to `peer`.
    pub fn set_edge_metric(&mut self, peer: AgentId, metric: Metric) -> Result<()> {
        let idx = self.index_of(peer)?;
        self.slots[idx].edge.metric = metric;
        Ok(())
    }

    // ── steering (used by the transport on hang-up, and by tests) ───

    /// Overrides the believed leader.
    pub fn set_leader(&mut self, leader: AgentId) {
        self.my_leader = leader;
    }

    /// Overrides the partition level.
    pub fn set_level(&mut self, level: Level) {
        self.my_level = level;
    }

    /// Sets the MST parent link. The target must be ourselves or an MST
    /// neighbor.
    pub fn set_parent(&mut self, id: AgentId) -> Result<()> {
        if id == self.my_id {
            self.parent = id;
            return Ok(());
        }
        if !self.has_edge(id) {
            return Err(Error::ParentUnrecognized);
        }
        if self.get_edge(id)?.status != EdgeStatus::Mst {
            return Err(Error::ParentReqMst);
        }
        self.parent = id;
        Ok(())
    }

    /// Flags (or clears) "we are waiting on an `InPart` answer from `peer`".
    pub fn set_waiting(&mut self, peer: AgentId, waiting: bool) -> Result<()> {
        let idx = self.index_of(peer)?;
        self.slots[idx].waiting = waiting;
        Ok(())
    }

    /// True when an `InPart` answer from `peer` is outstanding.
    pub fn is_waiting(&self, peer: AgentId) -> Result<bool> {
        Ok(self.slots[self.index_of(peer)?].waiting)
    }

    /// Flags (or clears) "we owe `peer` a deferred `InPart` answer".
    pub fn set_deferred(&mut self, peer: AgentId, deferred: bool) -> Result<()> {
        let idx = self.index_of(peer)?;
        self.slots[idx].deferred = deferred;
        Ok(())
    }

    /// True when we owe `peer` a deferred `InPart` answer.
    pub fn is_deferred(&self, peer: AgentId) -> Result<bool> {
        Ok(self.slots[self.index_of(peer)?].deferred)
    }

    // ── accessors ───────────────────────────────────────────────────

    /// This node's id.
    #[must_use]
    pub fn id(&self) -> AgentId {
        self.my_id
    }

    /// Who we currently believe leads our partition.
    #[must_use]
    pub fn leader_id(&self) -> AgentId {
        self.my_leader
    }

    /// Our partition's level.
    #[must_use]
    pub fn level(&self) -> Level {
        self.my_level
    }

    /// The neighbor a search reached us through, or ourselves at the root.
    #[must_use]
    pub fn parent_id(&self) -> AgentId {
        self.parent
    }

    /// The best candidate outgoing edge known in this subtree this round.
    /// `metric == WORST` means no candidate yet.
    #[must_use]
    pub fn mwoe(&self) -> Edge {
        self.best_edge
    }

    /// Number of stored neighbors.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.n_peers
    }

    /// How many peers we have probed and not yet heard back from.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.slots[..self.n_peers].iter().filter(|s| s.waiting).count()
    }

    /// How many probes we have deferred and not yet answered.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.slots[..self.n_peers].iter().filter(|s| s.deferred).count()
    }

    /// True once the leader's convergence broadcast has reached this node.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    // ── casts ───────────────────────────────────────────────────────

    /// Stages `payload` to every neighbor whose edge has `status`.
    pub fn typecast(
        &self,
        status: EdgeStatus,
        payload: Payload,
        out: &mut StaticQueue<Msg, Q>,
    ) -> Result<usize> {
        let mut sent = 0;
        for slot in &self.slots[..self.n_peers] {
            let e = &slot.edge;
            if e.root != self.my_id {
                return Err(Error::CastInvalidEdge);
            }
            if e.status == status {
                out.push(Msg::new(e.peer, self.my_id, payload))?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Stages `payload` down the tree: every MST neighbor except the parent.
    pub fn mst_broadcast(&self, payload: Payload, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        let mut sent = 0;
        for slot in &self.slots[..self.n_peers] {
            let e = &slot.edge;
            if e.root != self.my_id {
                return Err(Error::CastInvalidEdge);
            }
            if e.status == EdgeStatus::Mst && e.peer != self.parent {
                out.push(Msg::new(e.peer, self.my_id, payload))?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Stages `payload` up the tree: the MST parent only. At the root this
    /// stages nothing.
    pub fn mst_convergecast(
        &self,
        payload: Payload,
        out: &mut StaticQueue<Msg, Q>,
    ) -> Result<usize> {
        let mut sent = 0;
        for slot in &self.slots[..self.n_peers] {
            let e = &slot.edge;
            if e.root != self.my_id {
                return Err(Error::CastInvalidEdge);
            }
            if e.status == EdgeStatus::Mst && e.peer == self.parent {
                out.push(Msg::new(e.peer, self.my_id, payload))?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    // ── entry points ────────────────────────────────────────────────

    /// Seeds the first batch of messages, but only when this node is its
    /// own leader. Everyone else waits for a `Srch` from upstream.
    ///
    /// Returns the number of messages staged in `out`.
    pub fn start_round(&mut self, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        if self.my_leader == self.my_id {
            let seed = SrchPayload {
                leader: self.my_leader,
                level: self.my_level,
            };
            return self.process_srch(self.my_id, seed, out);
        }
        Ok(0)
    }

    /// Consumes one delivered message, staging any responses in `out`.
    ///
    /// Returns the number of messages staged. Validation failures
    /// (`ProcessSelfMsg`, `ProcessNotMe`, `ProcessNoEdgeFound`) leave the
    /// state untouched.
    pub fn process(&mut self, msg: &Msg, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        if msg.from == self.my_id {
            return Err(Error::ProcessSelfMsg);
        }
        if msg.to != self.my_id {
            return Err(Error::ProcessNotMe);
        }
        if !self.has_edge(msg.from) {
            return Err(Error::ProcessNoEdgeFound);
        }
        match msg.payload {
            Payload::Srch(p) => self.process_srch(msg.from, p, out),
            Payload::SrchRet(p) => self.process_srch_ret(msg.from, p, out),
            Payload::InPart(p) => self.process_in_part(msg.from, p, out),
            Payload::AckPart => self.process_ack_part(msg.from, out),
            Payload::NackPart => self.process_nack_part(msg.from, out),
            Payload::JoinUs(p) => self.process_join_us(msg.from, p, out),
            Payload::Noop => self.process_noop(out),
        }
    }

    // ── handlers ────────────────────────────────────────────────────

    /// Starts a subtree search. Triggered externally by the leader's `Srch`,
    /// or internally with `from == my_id` from `start_round` and the merge
    /// path; the internal call is the only one allowed to bypass the
    /// self-message check.
    fn process_srch(
        &mut self,
        from: AgentId,
        data: SrchPayload,
        out: &mut StaticQueue<Msg, Q>,
    ) -> Result<usize> {
        if from != self.my_id {
            // externally triggered searches only arrive over the tree
            let to_them = self.get_edge(from)?;
            if to_them.status != EdgeStatus::Mst {
                return Err(Error::ProcessReqMst);
            }
        }
        if self.waiting_count() != 0 {
            return Err(Error::SrchStillWaiting);
        }

        // only one node per partition sends srch, so this is authoritative
        self.my_leader = data.leader;
        self.my_level = data.level;
        self.parent = from;

        self.best_edge = Edge {
            root: self.my_id,
            ..Edge::worst()
        };

        // stage into a scratch queue so we can note each recipient before
        // handing the batch to the caller
        let mut scratch: StaticQueue<Msg, Q> = StaticQueue::new();

        let srch = Payload::Srch(SrchPayload {
            leader: self.my_leader,
            level: self.my_level,
        });
        let srch_sent = self.mst_broadcast(srch, &mut scratch)?;

        let probe = Payload::InPart(InPartPayload {
            leader: self.my_leader,
            level: self.my_level,
        });
        let probe_sent = self.typecast(EdgeStatus::Unknown, probe, &mut scratch)?;

        // nothing to ask and nobody owed an answer: report "no MWOE here"
        if scratch.is_empty() && self.deferred_count() == 0 {
            return self.respond_no_mwoe(out);
        }

        while let Ok(m) = scratch.pop() {
            self.set_waiting(m.to, true)?;
            out.push(m)?;
        }

        // our level may just have risen; deferred probes may now be payable
        let deferred_sent = self.check_new_level(out)?;
        Ok(srch_sent + probe_sent + deferred_sent)
    }

    /// Convergecasts "no MWOE in this subtree".
    fn respond_no_mwoe(&self, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        let pld = Payload::SrchRet(SrchRetPayload {
            peer: AgentId::NONE,
            root: AgentId::NONE,
            metric: Metric::WORST,
        });
        self.mst_convergecast(pld, out)
    }

    /// Folds a child's search result into ours.
    fn process_srch_ret(
        &mut self,
        from: AgentId,
        data: SrchRetPayload,
        out: &mut StaticQueue<Msg, Q>,
    ) -> Result<usize> {
        if self.waiting_count() == 0 {
            return Err(Error::UnexpectedSrchRet);
        }
        if !self.is_waiting(from)? {
            return Err(Error::UnexpectedSrchRet);
        }
        self.set_waiting(from, false)?;

        if data.metric < self.best_edge.metric {
            self.best_edge = Edge::new(data.peer, data.root, EdgeStatus::Unknown, data.metric);
        }
        self.check_search_status(out)
    }

    /// Answers (or defers) a partition-membership probe.
    ///
    /// Replying `AckPart` does not touch the stored edge: classification of
    /// the link is owned by whoever asked.
    fn process_in_part(
        &mut self,
        from: AgentId,
        data: InPartPayload,
        out: &mut StaticQueue<Msg, Q>,
    ) -> Result<usize> {
        if data.level > self.my_level {
            // they are ahead of us; we genuinely do not know the answer yet
            self.respond_later(from, data)?;
            return Ok(0);
        }
        let reply = if data.leader == self.my_leader {
            Payload::AckPart
        } else {
            Payload::NackPart
        };
        out.push(Msg::new(from, self.my_id, reply))?;
        Ok(1)
    }

    /// Records a probe we cannot answer until our level catches up.
    fn respond_later(&mut self, from: AgentId, data: InPartPayload) -> Result<()> {
        let idx = self.index_of(from)?;
        self.slots[idx].deferred = true;
        self.slots[idx].prompt = data;
        Ok(())
    }

    /// The probed peer is in our partition: the link cannot be an MWOE.
    fn process_ack_part(&mut self, from: AgentId, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        if !self.is_waiting(from)? {
            return Err(Error::AckNotWaiting);
        }
        self.set_edge_status(from, EdgeStatus::Deleted)?;
        self.set_waiting(from, false)?;
        self.check_search_status(out)
    }

    /// The probed peer is in another partition: the link is a candidate.
    fn process_nack_part(&mut self, from: AgentId, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        if !self.is_waiting(from)? {
            return Err(Error::AckNotWaiting);
        }
        let their_edge = self.get_edge(from)?;
        if self.best_edge.metric > their_edge.metric {
            self.best_edge = their_edge;
        }
        self.set_waiting(from, false)?;
        self.check_search_status(out)
    }

    /// Once every outstanding answer is in, either convergecast our best
    /// edge upward or, at the leader, act on the partition-wide result.
    fn check_search_status(&mut self, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        if self.waiting_count() != 0 {
            return Ok(0);
        }

        let e = self.mwoe();
        let am_leader = self.my_leader == self.my_id;
        let found = e.metric < Metric::WORST;
        let mine = e.root == self.my_id;

        if !am_leader {
            // pass the result up, however bad
            let pld = Payload::SrchRet(SrchRetPayload {
                peer: e.peer,
                root: e.root,
                metric: e.metric,
            });
            return self.mst_convergecast(pld, out);
        }

        if !found {
            // no outgoing edge anywhere: the component is complete
            return self.process_noop(out);
        }

        if mine {
            if e.peer == e.root {
                return Err(Error::BadMsg);
            }
            // the winning edge is ours; skip the broadcast and join directly
            let join = JoinUsPayload {
                join_peer: e.peer,
                join_root: e.root,
                proposed_leader: self.my_leader,
                proposed_level: self.my_level,
            };
            return self.process_join_us(self.my_id, join, out);
        }

        // the winning edge hangs off another node; tell the tree
        let join = Payload::JoinUs(JoinUsPayload {
            join_peer: e.peer,
            join_root: e.root,
            proposed_leader: self.my_leader,
            proposed_level: self.my_level,
        });
        self.mst_broadcast(join, out)
    }

    /// Replays deferred probes whose requester level our level now covers.
    fn check_new_level(&mut self, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        let mut sent = 0;
        let mut idx = 0;
        while idx < self.n_peers {
            let slot = self.slots[idx];
            if slot.deferred && slot.prompt.level <= self.my_level {
                sent += self.process_in_part(slot.edge.peer, slot.prompt, out)?;
                self.slots[idx].deferred = false;
            }
            idx += 1;
        }
        Ok(sent)
    }

    /// Restructures partitions across the named edge. Three roles: a relay
    /// inside the initiating partition, the initiating endpoint
    /// (`join_root`), or the targeted endpoint (`join_peer`).
    fn process_join_us(
        &mut self,
        _from: AgentId,
        data: JoinUsPayload,
        out: &mut StaticQueue<Msg, Q>,
    ) -> Result<usize> {
        let join_peer = data.join_peer;
        let join_root = data.join_root;
        let join_lead = data.proposed_leader;
        let join_level = data.proposed_level;

        let not_involved = join_root != self.my_id && join_peer != self.my_id;
        let in_initiating_partition = join_root == self.my_id;

        if not_involved {
            if join_lead != self.my_leader {
                return Err(Error::JoinBadLeader);
            }
            if join_level != self.my_level {
                return Err(Error::JoinBadLevel);
            }
            return self.mst_broadcast(Payload::JoinUs(data), out);
        }

        let edge_to_other_part = if in_initiating_partition {
            let join_peer_edge = self.get_edge(join_peer)?;
            // the leader can differ here, but only over an established link
            if join_lead != self.my_leader && join_peer_edge.status != EdgeStatus::Mst {
                return Err(Error::JoinInitBadLeader);
            }
            if join_level != self.my_level {
                return Err(Error::JoinInitBadLevel);
            }
            join_peer_edge
        } else {
            if join_lead == self.my_leader {
                return Err(Error::JoinMyLeader);
            }
            // lower or equal levels may ask; higher ones cannot have heard
            // our answer yet
            if join_level > self.my_level {
                return Err(Error::JoinUnexpectedReply);
            }
            self.get_edge(join_root)?
        };

        match edge_to_other_part.status {
            EdgeStatus::Mst => {
                // both sides proposed this edge: merge. The higher endpoint
                // id becomes leader on both sides without any further
                // exchange, and exactly one of us starts the next round.
                let leader = join_peer.max(join_root);
                self.my_leader = leader;
                self.my_level += 1;
                if leader == self.my_id {
                    self.start_round(out)
                } else {
                    Ok(0)
                }
            }
            EdgeStatus::Unknown => {
                if in_initiating_partition {
                    // propose: their level >= ours or they would not have
                    // answered our probe, so marking MST now is safe
                    self.set_edge_status(join_peer, EdgeStatus::Mst)?;
                    out.push(Msg::new(join_peer, self.my_id, Payload::JoinUs(data)))?;
                    Ok(1)
                } else {
                    // absorb: they chose us as their MWOE; adopt the link
                    // and wait for the next search to flow over it
                    if self.my_level < join_level {
                        return Err(Error::JoinUnexpectedReply);
                    }
                    self.set_edge_status(join_root, EdgeStatus::Mst)?;
                    Ok(0)
                }
            }
            EdgeStatus::Deleted => Err(Error::Impl),
        }
    }

    /// Marks convergence and floods the announcement down the tree.
    fn process_noop(&mut self, out: &mut StaticQueue<Msg, Q>) -> Result<usize> {
        self.converged = true;
        self.mst_broadcast(Payload::Noop, out)
    }

    // ── introspection ───────────────────────────────────────────────

    /// Renders the peer table for logs: one `root-->peer STATUS flags metric`
    /// entry per stored edge, parent and MWOE annotated.
    #[must_use]
    pub fn dump_edges(&self) -> String {
        let mwoe = self.mwoe();
        let mut s = format!("( m:{} mw:{}", mwoe.peer, mwoe.metric.0);
        for slot in &self.slots[..self.n_peers] {
            let e = &slot.edge;
            let status = match e.status {
                EdgeStatus::Unknown => "UNK",
                EdgeStatus::Mst => "MST",
                EdgeStatus::Deleted => "DEL",
            };
            let role = if e.peer == self.parent {
                "+P"
            } else if e.status == EdgeStatus::Mst {
                "+C"
            } else {
                " _"
            };
            let best = if e.peer == mwoe.peer { "m" } else { "_" };
            let _ = write!(s, " {}-->{} {status}{role}{best} {};", e.root, e.peer, e.metric.0);
        }
        s.push(')');
        s
    }
}

impl<const N: usize, const Q: usize> fmt::Display for GhsState<N, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id:{} leader:{} level:{} waiting:{} deferred:{} converged:{} {}}}",
            self.my_id,
            self.my_leader,
            self.my_level,
            self.waiting_count(),
            self.deferred_count(),
            self.converged,
            self.dump_edges()
        )
    }
}
