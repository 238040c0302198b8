// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Multi-process GHS leader election over TCP.
//!
//! Every node runs this binary with the same config and a unique `--id`.
//! The loop: bind the transport, benchmark each link and exchange the
//! measurements so both ends agree on edge weights, build the state
//! machine, seed it on the `--start` node, then shuttle messages between
//! the transport and [`GhsState::process`] until the whole component
//! converges on one leader.

use anyhow::{Context, Result};
use clap::Parser;
use ghs_core::{AgentId, Edge, EdgeStatus, GhsState, Msg, StaticQueue};
use ghs_net::{sym_metric, Transport, TransportEvent};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

mod config;
use config::Config;

/// Peer capacity of the demo state machine.
const MAX_AGENTS: usize = 8;
/// Outgoing staging capacity.
const MSG_Q: usize = 256;
/// Probe frames per link benchmark.
const BENCH_BURSTS: usize = 32;

type State = GhsState<MAX_AGENTS, MSG_Q>;
type OutQueue = StaticQueue<Msg, MSG_Q>;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// This node's agent id (must be in the config roster).
    #[clap(long)]
    id: u16,

    /// Seed the first search round from this node.
    #[clap(long)]
    start: bool,

    /// Seconds to wait before the first send (overrides the config).
    #[clap(long)]
    wait: Option<u64>,

    /// Benchmark the links, print per-peer throughput, and exit.
    #[clap(long)]
    test: bool,

    /// Path to the JSON config.
    #[clap(long, default_value = "ghs.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let cfg = Config::from_path(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    cfg.validate(args.id)?;

    let my_id = AgentId(args.id);
    let listen = cfg
        .endpoint_of(args.id)
        .context("validated config lost our endpoint")?;
    let peers = cfg.peers_of(args.id);

    let mut transport = Transport::bind(my_id, listen, cfg.runtime.retry_connections)
        .await
        .with_context(|| format!("binding {listen}"))?;
    for peer in &peers {
        transport.connect_peer(AgentId(peer.id), peer.endpoint);
    }
    info!(id = args.id, %listen, peers = peers.len(), "transport up");

    let wait_s = args.wait.unwrap_or(cfg.runtime.wait_s);
    if wait_s > 0 {
        info!(wait_s, "waiting before first send");
        sleep(Duration::from_secs(wait_s)).await;
    }

    // measure our side of every link and tell the peer what we saw
    let mut local_kbps = HashMap::new();
    for peer in &peers {
        let kbps = match transport.bench_link(AgentId(peer.id), BENCH_BURSTS).await {
            Ok(kbps) => kbps,
            Err(err) => {
                warn!(peer = peer.id, error = %err, "benchmark failed, weighting as dead");
                0
            }
        };
        local_kbps.insert(peer.id, kbps);
        transport.send_metrics(AgentId(peer.id), kbps).await?;
    }

    // wait for everyone else's view; algorithm traffic may already be
    // arriving from faster nodes, so park it instead of dropping it
    let mut remote_kbps: HashMap<u16, u64> = HashMap::new();
    let mut parked: Vec<Msg> = Vec::new();
    while remote_kbps.len() < peers.len() {
        match transport.recv().await {
            Some(TransportEvent::Metrics { from, kbps }) => {
                debug!(from = %from, kbps, "peer metrics");
                remote_kbps.insert(from.0, kbps);
            }
            Some(TransportEvent::Ghs(msg)) => parked.push(msg),
            Some(TransportEvent::Hangup(peer)) => {
                warn!(peer = %peer, "peer gone during metric exchange");
                remote_kbps.insert(peer.0, 0);
            }
            None => anyhow::bail!("transport closed during metric exchange"),
        }
    }

    if args.test {
        for peer in &peers {
            info!(
                peer = peer.id,
                local_kbps = local_kbps.get(&peer.id).copied().unwrap_or(0),
                remote_kbps = remote_kbps.get(&peer.id).copied().unwrap_or(0),
                "link throughput"
            );
        }
        return Ok(());
    }

    // both ends must derive the identical weight, so combine the two
    // measurements the same way on both sides: take the smaller
    let edges: Vec<Edge> = peers
        .iter()
        .map(|peer| {
            let ours = local_kbps.get(&peer.id).copied().unwrap_or(0);
            let theirs = remote_kbps.get(&peer.id).copied().unwrap_or(0);
            let agreed = ours.min(theirs);
            Edge::new(
                AgentId(peer.id),
                my_id,
                EdgeStatus::Unknown,
                sym_metric(my_id, AgentId(peer.id), agreed),
            )
        })
        .collect();

    let mut state = State::new(my_id, &edges);
    let dropped = peers.len() - state.peer_count();
    if dropped > 0 {
        warn!(dropped, "initial edges rejected by the state machine");
    }
    info!("initialized {state}");

    let mut out = OutQueue::new();
    if args.start {
        let n = state.start_round(&mut out)?;
        info!(n, "seeded first round");
        drain_and_send(&mut out, &mut transport).await?;
    }
    for msg in parked {
        step(&mut state, &msg, &mut out, &mut transport).await?;
    }

    while !state.is_converged() {
        let Some(event) = transport.recv().await else {
            anyhow::bail!("transport closed before convergence");
        };
        match event {
            TransportEvent::Ghs(msg) => step(&mut state, &msg, &mut out, &mut transport).await?,
            TransportEvent::Metrics { from, .. } => {
                debug!(from = %from, "late metrics ignored");
            }
            TransportEvent::Hangup(peer) => kill_edge(&mut state, peer),
        }
    }

    info!(leader = %state.leader_id(), level = state.level(), "converged");
    info!("{}", state.dump_edges());
    Ok(())
}

/// Feeds one message through the state machine and sends whatever it
/// staged. Algorithm-level rejections are logged and survived; the
/// exchange continues on the other edges.
async fn step(
    state: &mut State,
    msg: &Msg,
    out: &mut OutQueue,
    transport: &mut Transport,
) -> Result<()> {
    debug!(%msg, "recv");
    match state.process(msg, out) {
        Ok(n) => debug!(n, "processed"),
        Err(err) => warn!(error = %err, %msg, "message rejected"),
    }
    drain_and_send(out, transport).await
}

async fn drain_and_send(out: &mut OutQueue, transport: &mut Transport) -> Result<()> {
    while let Ok(msg) = out.pop() {
        debug!(%msg, "send");
        transport.send_msg(msg).await?;
    }
    Ok(())
}

/// A peer is gone: delete the edge and abandon anything we were waiting on
/// from it, so the search can complete over the remaining links.
fn kill_edge(state: &mut State, peer: AgentId) {
    warn!(peer = %peer, "peer lost; deleting edge");
    if let Err(err) = state.set_edge_status(peer, EdgeStatus::Deleted) {
        warn!(peer = %peer, error = %err, "no edge to delete");
        return;
    }
    let _ = state.set_waiting(peer, false);
    let _ = state.set_deferred(peer, false);
}
