// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Framed TCP links between agents.
//!
//! One [`Transport`] per node: a listener task accepts inbound connections
//! and feeds decoded, de-duplicated frames into a single event channel (the
//! algorithm loop is the sole consumer); one writer task per peer owns the
//! outbound connection, dialing lazily and retrying within a bound. A peer
//! that stays unreachable surfaces as [`TransportEvent::Hangup`] so the
//! driver can mark the edge deleted and clear its bookkeeping.

use crate::metrics::kbps_from;
use crate::wire::{DupFilter, Frame, FramePayload, Sequencer, WireError, MAX_FRAME_SIZE};
use ghs_core::{AgentId, Msg};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

/// Outbound queue depth per peer.
const OUT_DEPTH: usize = 256;
/// Depth of the single inbound event channel.
const EVENT_DEPTH: usize = 256;
/// Dial/write attempts before a peer is declared gone.
const MAX_ATTEMPTS: u32 = 5;
/// Pause between attempts.
const RETRY_DELAY: Duration = Duration::from_millis(200);
/// Padding bytes per benchmark probe.
const BENCH_PAD: u16 = 512;

/// What the transport hands to the algorithm loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Algorithm traffic addressed to this node.
    Ghs(Msg),
    /// A peer reported its measured throughput toward us, in kbit/s.
    Metrics {
        /// The reporting peer.
        from: AgentId,
        /// Its measurement.
        kbps: u64,
    },
    /// The link to a peer is gone for good; the driver should mark the
    /// edge deleted and clear any waiting/deferred state for it.
    Hangup(AgentId),
}

/// Ways the transport can fail the caller directly.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// No registered endpoint for that agent.
    #[error("no endpoint registered for agent {0}")]
    UnknownPeer(AgentId),
    /// The writer for that peer has shut down (it hung up).
    #[error("writer for agent {0} is gone")]
    WriterGone(AgentId),
    /// A frame failed to parse.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// A node's endpoint: accepts frames from everyone, writes frames per peer.
pub struct Transport {
    my_id: AgentId,
    local: SocketAddr,
    retry: bool,
    seq: Sequencer,
    events_tx: mpsc::Sender<TransportEvent>,
    events: mpsc::Receiver<TransportEvent>,
    peers: HashMap<AgentId, SocketAddr>,
    outbound: HashMap<AgentId, mpsc::Sender<Frame>>,
}

impl Transport {
    /// Binds the listener and starts accepting inbound connections.
    /// Register peers afterwards with [`Transport::connect_peer`].
    ///
    /// `retry` controls outbound behavior on failure: retry within the
    /// attempt bound, or hang up on the first refusal.
    pub async fn bind(
        my_id: AgentId,
        listen: SocketAddr,
        retry: bool,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(listen).await?;
        let local = listener.local_addr()?;
        let (events_tx, events) = mpsc::channel(EVENT_DEPTH);
        let dups = Arc::new(Mutex::new(DupFilter::default()));
        tokio::spawn(accept_loop(listener, events_tx.clone(), dups, my_id));
        Ok(Self {
            my_id,
            local,
            retry,
            seq: Sequencer::default(),
            events_tx,
            events,
            peers: HashMap::new(),
            outbound: HashMap::new(),
        })
    }

    /// The address the listener actually bound (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Registers a peer endpoint and starts its writer. The connection is
    /// dialed lazily on first send.
    pub fn connect_peer(&mut self, peer: AgentId, addr: SocketAddr) {
        let (tx, rx) = mpsc::channel(OUT_DEPTH);
        tokio::spawn(writer_task(
            peer,
            addr,
            rx,
            self.events_tx.clone(),
            self.retry,
        ));
        self.peers.insert(peer, addr);
        self.outbound.insert(peer, tx);
    }

    /// Queues an algorithm message for delivery to `msg.to`.
    pub async fn send_msg(&mut self, msg: Msg) -> Result<(), TransportError> {
        let frame = Frame {
            from: self.my_id,
            seq: self.seq.next_for(msg.to),
            payload: FramePayload::Ghs(msg),
        };
        self.send_frame(msg.to, frame).await
    }

    /// Tells `to` what throughput we measured toward it.
    pub async fn send_metrics(&mut self, to: AgentId, kbps: u64) -> Result<(), TransportError> {
        let frame = Frame {
            from: self.my_id,
            seq: self.seq.next_for(to),
            payload: FramePayload::Metrics(kbps),
        };
        self.send_frame(to, frame).await
    }

    async fn send_frame(&mut self, to: AgentId, frame: Frame) -> Result<(), TransportError> {
        let tx = self
            .outbound
            .get(&to)
            .ok_or(TransportError::UnknownPeer(to))?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::WriterGone(to))
    }

    /// The next inbound event. `None` only once every producer is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Measures raw write throughput toward `peer` by timing a burst of
    /// padding frames over a dedicated connection.
    ///
    /// The result is this side's view only; exchange it via
    /// [`Transport::send_metrics`] and combine with the peer's view before
    /// deriving an edge weight.
    pub async fn bench_link(
        &mut self,
        peer: AgentId,
        bursts: usize,
    ) -> Result<u64, TransportError> {
        let addr = *self
            .peers
            .get(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let mut stream = TcpStream::connect(addr).await?;
        let started = Instant::now();
        let mut sent = 0_usize;
        for _ in 0..bursts {
            let frame = Frame {
                from: self.my_id,
                seq: self.seq.next_for(peer),
                payload: FramePayload::Ping(BENCH_PAD),
            };
            let bytes = frame.encode();
            stream.write_all(&bytes).await?;
            sent += bytes.len();
        }
        stream.flush().await?;
        stream.shutdown().await?;
        let kbps = kbps_from(sent, started.elapsed());
        debug!(peer = %peer, kbps, "benchmarked link");
        Ok(kbps)
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<TransportEvent>,
    dups: Arc<Mutex<DupFilter>>,
    my_id: AgentId,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "inbound connection");
                tokio::spawn(reader_task(stream, events.clone(), dups.clone(), my_id));
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
            }
        }
    }
}

/// Reads frames off one inbound connection until it closes. Malformed or
/// duplicated frames are dropped silently; the connection survives them.
async fn reader_task(
    mut stream: TcpStream,
    events: mpsc::Sender<TransportEvent>,
    dups: Arc<Mutex<DupFilter>>,
    my_id: AgentId,
) {
    let mut len_buf = [0_u8; 4];
    loop {
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            warn!(len, "oversized frame, closing connection");
            return;
        }
        let mut body = vec![0_u8; len];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
        let frame = match Frame::decode_body(&body) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                continue;
            }
        };
        if !dups.lock().await.accept(frame.from, frame.seq) {
            debug!(from = %frame.from, seq = frame.seq, "dropping duplicate frame");
            continue;
        }
        let event = match frame.payload {
            FramePayload::Ghs(msg) => {
                if msg.to != my_id {
                    warn!(%msg, "dropping misrouted message");
                    continue;
                }
                TransportEvent::Ghs(msg)
            }
            FramePayload::Metrics(kbps) => TransportEvent::Metrics {
                from: frame.from,
                kbps,
            },
            // probe padding: the bytes themselves were the point
            FramePayload::Ping(_) => continue,
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
}

/// Owns the outbound connection to one peer. Dials lazily, retries within
/// the attempt bound, and reports a hangup when the peer stays unreachable.
async fn writer_task(
    peer: AgentId,
    addr: SocketAddr,
    mut rx: mpsc::Receiver<Frame>,
    events: mpsc::Sender<TransportEvent>,
    retry: bool,
) {
    let mut stream: Option<TcpStream> = None;
    while let Some(frame) = rx.recv().await {
        let bytes = frame.encode();
        let mut attempts = 0_u32;
        loop {
            if stream.is_none() {
                match TcpStream::connect(addr).await {
                    Ok(conn) => stream = Some(conn),
                    Err(err) => {
                        attempts += 1;
                        if !retry || attempts >= MAX_ATTEMPTS {
                            warn!(peer = %peer, error = %err, "peer unreachable, hanging up");
                            let _ = events.send(TransportEvent::Hangup(peer)).await;
                            return;
                        }
                        sleep(RETRY_DELAY).await;
                        continue;
                    }
                }
            }
            let Some(conn) = stream.as_mut() else {
                continue;
            };
            match conn.write_all(&bytes).await {
                Ok(()) => break,
                Err(err) => {
                    debug!(peer = %peer, error = %err, "write failed, redialing");
                    stream = None;
                    attempts += 1;
                    if !retry || attempts >= MAX_ATTEMPTS {
                        warn!(peer = %peer, "giving up on peer, hanging up");
                        let _ = events.send(TransportEvent::Hangup(peer)).await;
                        return;
                    }
                    sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}
