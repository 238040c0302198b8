// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-handler contracts of the GHS state machine.
//!
//! Covers the edge table, the cast helpers, and every message handler's
//! validation and bookkeeping: who gets probed, what gets deferred, which
//! arrivals are rejected, and that rejections leave state untouched.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ghs_core::{
    AgentId, Edge, EdgeStatus, Error, GhsState, InPartPayload, JoinUsPayload, Metric, Msg, Payload,
    SrchPayload, SrchRetPayload, StaticQueue,
};

type State = GhsState<8, 32>;
type Queue = StaticQueue<Msg, 32>;

fn id(raw: u16) -> AgentId {
    AgentId(raw)
}

/// Metric scheme used throughout: `10 + peer`, valid and unique per test.
fn edge_to(peer: u16, root: u16, status: EdgeStatus) -> Edge {
    Edge::new(id(peer), id(root), status, Metric(10 + u64::from(peer)))
}

fn drain(q: &mut Queue) -> Vec<Msg> {
    let mut v = Vec::new();
    while let Ok(m) = q.pop() {
        v.push(m);
    }
    v
}

// ── edge table ──────────────────────────────────────────────────────

#[test]
fn set_edge_is_idempotent() {
    let mut s = State::new(id(0), &[]);
    s.set_edge(edge_to(1, 0, EdgeStatus::Unknown)).unwrap();
    s.set_edge(edge_to(1, 0, EdgeStatus::Unknown)).unwrap();
    assert_eq!(s.peer_count(), 1);
    let e = s.get_edge(id(1)).unwrap();
    assert_eq!(e.peer, id(1));
    assert_eq!(e.root, id(0));
    assert_eq!(e.status, EdgeStatus::Unknown);
    assert_eq!(e.metric, Metric(11));
}

#[test]
fn set_edge_updates_existing_slot() {
    let mut s = State::new(id(0), &[]);
    s.set_edge(edge_to(1, 0, EdgeStatus::Deleted)).unwrap();
    s.set_edge(edge_to(1, 0, EdgeStatus::Unknown)).unwrap();
    assert_eq!(s.peer_count(), 1);
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Unknown);

    s.set_edge_status(id(1), EdgeStatus::Mst).unwrap();
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Mst);
    assert!(!s.has_edge(id(2)));
}

#[test]
fn set_edge_rejects_foreign_root_and_self_peer() {
    let mut s = State::new(id(0), &[]);
    assert_eq!(
        s.set_edge(edge_to(2, 1, EdgeStatus::Unknown)),
        Err(Error::SetInvalidEdge)
    );
    assert_eq!(
        s.set_edge(edge_to(0, 0, EdgeStatus::Unknown)),
        Err(Error::ImplReqPeerMyId)
    );
    assert_eq!(s.peer_count(), 0);
}

#[test]
fn set_edge_past_capacity_fails_without_side_effects() {
    let mut s: GhsState<2, 32> = GhsState::new(id(0), &[]);
    s.set_edge(edge_to(1, 0, EdgeStatus::Unknown)).unwrap();
    s.set_edge(edge_to(2, 0, EdgeStatus::Unknown)).unwrap();
    assert_eq!(
        s.set_edge(edge_to(3, 0, EdgeStatus::Unknown)),
        Err(Error::TooManyAgents)
    );
    assert_eq!(s.peer_count(), 2);
    assert!(!s.has_edge(id(3)));
    // updating a stored peer still works at capacity
    s.set_edge(edge_to(1, 0, EdgeStatus::Mst)).unwrap();
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Mst);
}

#[test]
fn constructor_filters_invalid_edges_silently() {
    let s = State::new(
        id(0),
        &[
            edge_to(1, 0, EdgeStatus::Unknown),
            edge_to(2, 1, EdgeStatus::Unknown), // foreign root
            Edge::new(id(3), id(0), EdgeStatus::Unknown, Metric::NOT_SET),
            Edge::new(id(4), id(0), EdgeStatus::Unknown, Metric::WORST),
            edge_to(0, 0, EdgeStatus::Unknown), // self loop
            edge_to(5, 0, EdgeStatus::Unknown),
        ],
    );
    assert_eq!(s.peer_count(), 2);
    assert!(s.has_edge(id(1)));
    assert!(s.has_edge(id(5)));
}

#[test]
fn reset_preserves_id_and_edge_table() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst), edge_to(2, 0, EdgeStatus::Unknown)]);
    s.set_leader(id(7));
    s.set_level(3);
    s.set_waiting(id(2), true).unwrap();
    s.set_deferred(id(2), true).unwrap();

    s.reset();
    assert_eq!(s.id(), id(0));
    assert_eq!(s.leader_id(), id(0));
    assert_eq!(s.level(), 0);
    assert_eq!(s.parent_id(), id(0));
    assert_eq!(s.waiting_count(), 0);
    assert_eq!(s.deferred_count(), 0);
    assert!(!s.is_converged());
    assert_eq!(s.peer_count(), 2);
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Mst);

    // idempotent: a second reset changes nothing observable
    s.reset();
    assert_eq!(s.leader_id(), id(0));
    assert_eq!(s.peer_count(), 2);
    assert_eq!(s.mwoe().metric, Metric::WORST);
}

#[test]
fn set_parent_requires_a_known_mst_link() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown), edge_to(2, 0, EdgeStatus::Mst)]);
    assert_eq!(s.set_parent(id(9)), Err(Error::ParentUnrecognized));
    assert_eq!(s.set_parent(id(1)), Err(Error::ParentReqMst));
    s.set_parent(id(2)).unwrap();
    assert_eq!(s.parent_id(), id(2));
    // self-loop is always accepted
    s.set_parent(id(0)).unwrap();
    assert_eq!(s.parent_id(), id(0));
}

// ── casts ───────────────────────────────────────────────────────────

#[test]
fn typecast_hits_only_matching_status() {
    let mut s = State::new(id(0), &[]);
    let mut buf = Queue::new();
    let payload = Payload::Srch(SrchPayload::default());

    assert_eq!(s.typecast(EdgeStatus::Unknown, payload, &mut buf).unwrap(), 0);

    s.set_edge(edge_to(1, 0, EdgeStatus::Unknown)).unwrap();
    s.set_edge(edge_to(2, 0, EdgeStatus::Mst)).unwrap();
    s.set_parent(id(2)).unwrap();
    assert_eq!(s.typecast(EdgeStatus::Unknown, payload, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, id(1));
    assert_eq!(sent[0].from, id(0));
}

#[test]
fn mst_broadcast_skips_the_parent() {
    let mut s = State::new(id(0), &[]);
    let mut buf = Queue::new();
    let payload = Payload::Srch(SrchPayload::default());

    s.set_edge(edge_to(1, 0, EdgeStatus::Unknown)).unwrap();
    assert_eq!(s.mst_broadcast(payload, &mut buf).unwrap(), 0);

    s.set_edge(edge_to(2, 0, EdgeStatus::Mst)).unwrap();
    s.set_parent(id(2)).unwrap();
    assert_eq!(s.mst_broadcast(payload, &mut buf).unwrap(), 0);

    s.set_edge(edge_to(3, 0, EdgeStatus::Mst)).unwrap();
    assert_eq!(s.mst_broadcast(payload, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert_eq!(sent[0].to, id(3));
}

#[test]
fn mst_convergecast_hits_only_the_parent() {
    let mut s = State::new(id(0), &[]);
    let mut buf = Queue::new();
    let payload = Payload::SrchRet(SrchRetPayload::default());

    s.set_edge(edge_to(2, 0, EdgeStatus::Mst)).unwrap();
    assert_eq!(s.mst_convergecast(payload, &mut buf).unwrap(), 0);

    s.set_edge(edge_to(3, 0, EdgeStatus::Mst)).unwrap();
    s.set_parent(id(3)).unwrap();
    assert_eq!(s.mst_convergecast(payload, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert_eq!(sent[0].to, id(3));
}

// ── start_round ─────────────────────────────────────────────────────

#[test]
fn start_round_probes_unknown_edges() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown), edge_to(2, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    assert_eq!(s.start_round(&mut buf).unwrap(), 2);
    for m in drain(&mut buf) {
        assert!(matches!(m.payload, Payload::InPart(_)), "got {m}");
    }
    assert_eq!(s.waiting_count(), 2);
}

#[test]
fn start_round_searches_mst_children() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst), edge_to(2, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    assert_eq!(s.start_round(&mut buf).unwrap(), 2);
    for m in drain(&mut buf) {
        assert!(matches!(m.payload, Payload::Srch(_)), "got {m}");
    }
}

#[test]
fn start_round_ignores_deleted_edges() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Deleted), edge_to(2, 0, EdgeStatus::Deleted)]);
    let mut buf = Queue::new();
    // no children, no parent: nothing to say and nobody to tell
    assert_eq!(s.start_round(&mut buf).unwrap(), 0);
    assert!(buf.is_empty());
}

#[test]
fn start_round_is_a_noop_for_followers() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst)]);
    s.set_leader(id(1));
    s.set_parent(id(1)).unwrap();
    let mut buf = Queue::new();
    assert_eq!(s.start_round(&mut buf).unwrap(), 0);
    assert!(buf.is_empty());
}

// ── process validation ──────────────────────────────────────────────

#[test]
fn process_rejects_self_addressed_and_unknown_senders() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();

    let from_self = Msg::new(id(0), id(0), Payload::Noop);
    assert_eq!(s.process(&from_self, &mut buf), Err(Error::ProcessSelfMsg));

    let not_me = Msg::new(id(3), id(1), Payload::Noop);
    assert_eq!(s.process(&not_me, &mut buf), Err(Error::ProcessNotMe));

    let stranger = Msg::new(id(0), id(5), Payload::Noop);
    assert_eq!(s.process(&stranger, &mut buf), Err(Error::ProcessNoEdgeFound));

    assert!(buf.is_empty());
    assert!(!s.is_converged());
    assert_eq!(s.leader_id(), id(0));
}

// ── srch ────────────────────────────────────────────────────────────

#[test]
fn srch_requires_an_mst_link() {
    let mut s = State::new(id(0), &[edge_to(2, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    let msg = Msg::new(id(0), id(2), Payload::Srch(SrchPayload { leader: id(2), level: 0 }));
    assert_eq!(s.process(&msg, &mut buf), Err(Error::ProcessReqMst));
    // rejected search changed nothing
    assert_eq!(s.leader_id(), id(0));
    assert_eq!(s.level(), 0);
    assert_eq!(s.parent_id(), id(0));
    assert!(buf.is_empty());
}

#[test]
fn srch_mid_search_is_rejected() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown), edge_to(2, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    assert!(s.waiting_count() > 0);
    let msg = Msg::new(id(0), id(2), Payload::Srch(SrchPayload { leader: id(2), level: 1 }));
    assert_eq!(s.process(&msg, &mut buf), Err(Error::SrchStillWaiting));
}

#[test]
fn srch_adopts_the_senders_partition_and_fans_out() {
    let mut s = State::new(
        id(0),
        &[
            edge_to(1, 0, EdgeStatus::Mst),     // upstream
            edge_to(2, 0, EdgeStatus::Mst),     // child
            edge_to(3, 0, EdgeStatus::Unknown), // to probe
        ],
    );
    let mut buf = Queue::new();
    let msg = Msg::new(id(0), id(1), Payload::Srch(SrchPayload { leader: id(1), level: 2 }));
    assert_eq!(s.process(&msg, &mut buf).unwrap(), 2);

    assert_eq!(s.leader_id(), id(1));
    assert_eq!(s.level(), 2);
    assert_eq!(s.parent_id(), id(1));
    assert_eq!(s.waiting_count(), 2);
    assert!(s.is_waiting(id(2)).unwrap());
    assert!(s.is_waiting(id(3)).unwrap());

    let sent = drain(&mut buf);
    assert!(sent
        .iter()
        .any(|m| m.to == id(2) && matches!(m.payload, Payload::Srch(p) if p.leader == id(1) && p.level == 2)));
    assert!(sent
        .iter()
        .any(|m| m.to == id(3) && matches!(m.payload, Payload::InPart(p) if p.leader == id(1) && p.level == 2)));
}

#[test]
fn leaf_reports_no_mwoe_immediately() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    let msg = Msg::new(id(0), id(1), Payload::Srch(SrchPayload { leader: id(1), level: 0 }));
    assert_eq!(s.process(&msg, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, id(1));
    match sent[0].payload {
        Payload::SrchRet(p) => assert_eq!(p.metric, Metric::WORST),
        ref other => panic!("expected SrchRet, got {}", other.kind_str()),
    }
}

// ── srch_ret ────────────────────────────────────────────────────────

#[test]
fn srch_ret_outside_a_search_is_rejected() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    let msg = Msg::new(id(0), id(1), Payload::SrchRet(SrchRetPayload::default()));
    assert_eq!(s.process(&msg, &mut buf), Err(Error::UnexpectedSrchRet));
}

#[test]
fn srch_ret_from_a_peer_not_waited_on_is_rejected() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst), edge_to(2, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    buf.clear();
    s.set_waiting(id(2), false).unwrap();
    let msg = Msg::new(id(0), id(2), Payload::SrchRet(SrchRetPayload::default()));
    assert_eq!(s.process(&msg, &mut buf), Err(Error::UnexpectedSrchRet));
    assert!(s.is_waiting(id(1)).unwrap());
}

#[test]
fn leader_broadcasts_join_for_a_remote_mwoe() {
    // the winning edge hangs off node 1's subtree, not ours
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    buf.clear();

    let ret = Msg::new(
        id(0),
        id(1),
        Payload::SrchRet(SrchRetPayload {
            peer: id(2),
            root: id(1),
            metric: Metric(7),
        }),
    );
    assert_eq!(s.process(&ret, &mut buf).unwrap(), 1);
    assert_eq!(s.mwoe().root, id(1));
    assert_eq!(s.mwoe().peer, id(2));
    let sent = drain(&mut buf);
    assert_eq!(sent[0].to, id(1));
    assert!(
        matches!(sent[0].payload, Payload::JoinUs(p) if p.join_peer == id(2) && p.join_root == id(1) && p.proposed_leader == id(0) && p.proposed_level == 0)
    );
}

#[test]
fn leader_with_no_edge_anywhere_declares_convergence() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    buf.clear();

    // child reports nothing outgoing in its whole subtree
    let ret = Msg::new(
        id(0),
        id(1),
        Payload::SrchRet(SrchRetPayload {
            peer: AgentId::NONE,
            root: AgentId::NONE,
            metric: Metric::WORST,
        }),
    );
    s.process(&ret, &mut buf).unwrap();
    assert_eq!(s.mwoe().metric, Metric::WORST);
    assert!(s.is_converged());
    let sent = drain(&mut buf);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, id(1));
    assert!(matches!(sent[0].payload, Payload::Noop));
}

// ── in_part ─────────────────────────────────────────────────────────

#[test]
fn in_part_at_or_below_our_level_is_answered() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();

    // same leader: ack, and the stored edge is left alone
    let ours = Msg::new(id(0), id(1), Payload::InPart(InPartPayload { leader: id(0), level: 0 }));
    assert_eq!(s.process(&ours, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert!(matches!(sent[0].payload, Payload::AckPart));
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Unknown);

    // different leader: nack
    let theirs = Msg::new(id(0), id(1), Payload::InPart(InPartPayload { leader: id(5), level: 0 }));
    assert_eq!(s.process(&theirs, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert!(matches!(sent[0].payload, Payload::NackPart));
}

#[test]
fn in_part_above_our_level_is_deferred() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    let probe = Msg::new(id(0), id(1), Payload::InPart(InPartPayload { leader: id(5), level: 1 }));
    assert_eq!(s.process(&probe, &mut buf).unwrap(), 0);
    assert!(buf.is_empty());
    assert_eq!(s.deferred_count(), 1);
    assert!(s.is_deferred(id(1)).unwrap());
}

#[test]
fn deferred_in_part_is_answered_after_the_level_rises() {
    // a probe from a level we haven't reached parks until a merge catches
    // us up, then the very next search flushes the answer
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown), edge_to(2, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();

    let probe = Msg::new(id(0), id(1), Payload::InPart(InPartPayload { leader: id(5), level: 1 }));
    assert_eq!(s.process(&probe, &mut buf).unwrap(), 0);
    assert_eq!(s.deferred_count(), 1);

    // partner proposes over our shared MST link: merge, level 0 -> 1
    let join = Msg::new(
        id(0),
        id(2),
        Payload::JoinUs(JoinUsPayload {
            join_peer: id(0),
            join_root: id(2),
            proposed_leader: id(2),
            proposed_level: 0,
        }),
    );
    assert_eq!(s.process(&join, &mut buf).unwrap(), 0);
    assert_eq!(s.level(), 1);
    assert_eq!(s.leader_id(), id(2));

    // new leader's search reaches us; the deferred answer rides along
    let srch = Msg::new(id(0), id(2), Payload::Srch(SrchPayload { leader: id(2), level: 1 }));
    s.process(&srch, &mut buf).unwrap();
    let sent = drain(&mut buf);
    assert!(
        sent.iter()
            .any(|m| m.to == id(1) && matches!(m.payload, Payload::NackPart)),
        "deferred NackPart missing: {sent:?}"
    );
    assert_eq!(s.deferred_count(), 0);
}

// ── ack / nack ──────────────────────────────────────────────────────

#[test]
fn ack_part_when_not_waiting_is_rejected() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    let msg = Msg::new(id(0), id(1), Payload::AckPart);
    assert_eq!(s.process(&msg, &mut buf), Err(Error::AckNotWaiting));
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Unknown);
}

#[test]
fn ack_part_deletes_the_edge_and_completes_the_search() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    buf.clear();

    let msg = Msg::new(id(0), id(1), Payload::AckPart);
    s.process(&msg, &mut buf).unwrap();
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Deleted);
    assert_eq!(s.waiting_count(), 0);
    // leader with nothing outgoing left: declare convergence
    assert!(s.is_converged());
}

#[test]
fn nack_part_promotes_the_edge_and_triggers_a_join() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    buf.clear();

    let msg = Msg::new(id(0), id(1), Payload::NackPart);
    assert_eq!(s.process(&msg, &mut buf).unwrap(), 1);
    // the nacked edge is our MWOE; we propose across it right away
    assert_eq!(s.mwoe().peer, id(1));
    assert_eq!(s.mwoe().metric, Metric(11));
    assert_eq!(s.get_edge(id(1)).unwrap().status, EdgeStatus::Mst);
    let sent = drain(&mut buf);
    assert!(
        matches!(sent[0].payload, Payload::JoinUs(p) if p.join_peer == id(1) && p.join_root == id(0))
    );
}

#[test]
fn nack_part_keeps_the_lighter_candidate() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Unknown), edge_to(2, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    s.start_round(&mut buf).unwrap();
    buf.clear();

    // heavier peer answers first
    s.process(&Msg::new(id(0), id(2), Payload::NackPart), &mut buf).unwrap();
    assert_eq!(s.mwoe().peer, id(2));
    s.process(&Msg::new(id(0), id(1), Payload::NackPart), &mut buf).unwrap();
    assert_eq!(s.mwoe().peer, id(1), "metric 11 beats metric 12");
}

// ── join_us ─────────────────────────────────────────────────────────

#[test]
fn join_relay_validates_leader_and_level() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();

    let bad_leader = Msg::new(
        id(0),
        id(1),
        Payload::JoinUs(JoinUsPayload {
            join_peer: id(5),
            join_root: id(6),
            proposed_leader: id(9),
            proposed_level: 0,
        }),
    );
    assert_eq!(s.process(&bad_leader, &mut buf), Err(Error::JoinBadLeader));

    let bad_level = Msg::new(
        id(0),
        id(1),
        Payload::JoinUs(JoinUsPayload {
            join_peer: id(5),
            join_root: id(6),
            proposed_leader: id(0),
            proposed_level: 3,
        }),
    );
    assert_eq!(s.process(&bad_level, &mut buf), Err(Error::JoinBadLevel));
}

#[test]
fn join_relay_forwards_down_the_tree() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst), edge_to(2, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    s.set_parent(id(1)).unwrap();

    let join = JoinUsPayload {
        join_peer: id(5),
        join_root: id(6),
        proposed_leader: id(0),
        proposed_level: 0,
    };
    let msg = Msg::new(id(0), id(1), Payload::JoinUs(join));
    assert_eq!(s.process(&msg, &mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert_eq!(sent[0].to, id(2));
    assert!(matches!(sent[0].payload, Payload::JoinUs(p) if p == join));
}

#[test]
fn join_from_our_own_partition_is_rejected() {
    let mut s = State::new(id(0), &[edge_to(2, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    let msg = Msg::new(
        id(0),
        id(2),
        Payload::JoinUs(JoinUsPayload {
            join_peer: id(0),
            join_root: id(2),
            proposed_leader: id(0),
            proposed_level: 0,
        }),
    );
    assert_eq!(s.process(&msg, &mut buf), Err(Error::JoinMyLeader));
}

#[test]
fn join_from_a_level_above_ours_is_rejected() {
    let mut s = State::new(id(0), &[edge_to(2, 0, EdgeStatus::Unknown)]);
    let mut buf = Queue::new();
    let msg = Msg::new(
        id(0),
        id(2),
        Payload::JoinUs(JoinUsPayload {
            join_peer: id(0),
            join_root: id(2),
            proposed_leader: id(2),
            proposed_level: 4,
        }),
    );
    assert_eq!(s.process(&msg, &mut buf), Err(Error::JoinUnexpectedReply));
}

#[test]
fn absorb_adopts_the_link_and_stays_quiet() {
    // we are ahead: a lower-level partition chose us as its best way out
    let mut s = State::new(id(1), &[edge_to(0, 1, EdgeStatus::Unknown)]);
    s.set_level(1);
    let mut buf = Queue::new();

    let msg = Msg::new(
        id(1),
        id(0),
        Payload::JoinUs(JoinUsPayload {
            join_peer: id(1),
            join_root: id(0),
            proposed_leader: id(0),
            proposed_level: 0,
        }),
    );
    assert_eq!(s.process(&msg, &mut buf).unwrap(), 0);
    assert!(buf.is_empty());
    assert_eq!(s.get_edge(id(0)).unwrap().status, EdgeStatus::Mst);
    // our next search now flows over the adopted link
    assert_eq!(s.start_round(&mut buf).unwrap(), 1);
    let sent = drain(&mut buf);
    assert_eq!(sent[0].to, id(0));
    assert!(matches!(sent[0].payload, Payload::Srch(_)));
}

// ── noop ────────────────────────────────────────────────────────────

#[test]
fn noop_floods_and_marks_convergence() {
    let mut s = State::new(id(0), &[edge_to(1, 0, EdgeStatus::Mst), edge_to(2, 0, EdgeStatus::Mst)]);
    let mut buf = Queue::new();
    s.set_leader(id(1));
    s.set_parent(id(1)).unwrap();

    let msg = Msg::new(id(0), id(1), Payload::Noop);
    assert_eq!(s.process(&msg, &mut buf).unwrap(), 1);
    assert!(s.is_converged());
    let sent = drain(&mut buf);
    assert_eq!(sent[0].to, id(2));
    assert!(matches!(sent[0].payload, Payload::Noop));
}
