//! Non-blocking scheduler driving the set of live sessions: accepts inbound
//! connections, dials outbound ones for peers with queued payloads, advances
//! every session by one `tick()` per pass, and reaps anything that has
//! closed or gone idle too long.
//!
//! Modeled on the teacher's `neutronium::net::endpoint::Endpoint::sync()`,
//! simplified to a single `mio::Poll` registry (see `SPEC_FULL.md` §4.2 for
//! why the teacher's three-`Poll` handshake/live split isn't needed here).
//!
//! The live-session set is an `IndexMap`, not a `HashMap`, the same way the
//! teacher's `Endpoint` keeps its live channel set in an `IndexSet`: spec.md
//! §5 requires `pump()` to advance sessions "in a deterministic stable order
//! (insertion order of the session list)", which a `HashMap`'s
//! randomized-per-instance iteration order cannot provide.

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

use indexmap::IndexMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use driftwatch_proto::crypto::KEY_SIZE;
use driftwatch_proto::error::{ErrorKind as ProtoErrorKind, ProtoError, ProtoResult};
use driftwatch_proto::logging::{debug, o, warn, Logger};

use crate::session::{Role, Session, SessionEvent};

/// How long a session may sit idle (no tick-visible activity) before the
/// manager reaps it, mirroring the teacher's `INGRESS_TIMEOUT`.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on how long a single `pump()` call may block waiting for I/O
/// readiness, per the cooperative single-threaded scheduling model.
pub const POLL_BUDGET: Duration = Duration::from_millis(1);

const LISTENER_TOKEN: Token = Token(0);

/// A live session together with the bookkeeping the manager needs to reap
/// it: its poll token, and — for outbound sessions only — which peer it was
/// dialed to, so the per-peer "one outbound session at a time" invariant can
/// be maintained.
struct Live {
    session: Session<TcpStream>,
    token: Token,
    outbound_peer: Option<u32>,
}

/// A payload that arrived from some peer, ready for the replication layer
/// to consume.
pub struct Inbound {
    pub peer_node_id: u32,
    pub payload: Vec<u8>,
}

pub struct QueueManager {
    listener: Option<TcpListener>,
    poll: Poll,
    next_token: usize,
    /// Live sessions in insertion order — iterated that way by `pump()`,
    /// per spec.md §5 (see the module doc comment).
    sessions: IndexMap<Token, Live>,
    /// Statically known peers this node replicates to, loaded once at
    /// startup (spec.md §6: "the peer list is static at startup").
    peers: HashMap<u32, SocketAddr>,
    /// Payloads queued for a peer but not yet handed to a live outbound
    /// session. `broadcast` pushes to the back, sessions drain the front —
    /// this is what gives `broadcast(A)` before `broadcast(B)` "A before B
    /// on the same session" ordering (spec.md §4.2).
    pending: HashMap<u32, VecDeque<Vec<u8>>>,
    /// Token of the current live outbound session per peer, if any. Only
    /// one at a time per peer; a fresh one is dialed once the previous
    /// one-shot session has been reaped.
    outbound_by_peer: HashMap<u32, Token>,
    inbox: VecDeque<Inbound>,
    node_id: u32,
    key: [u8; KEY_SIZE],
    log: Logger,
}

impl QueueManager {
    pub fn new(node_id: u32, key: [u8; KEY_SIZE], log: Logger) -> io::Result<Self> {
        Ok(QueueManager {
            listener: None,
            poll: Poll::new()?,
            next_token: 1,
            sessions: IndexMap::new(),
            peers: HashMap::new(),
            pending: HashMap::new(),
            outbound_by_peer: HashMap::new(),
            inbox: VecDeque::new(),
            node_id,
            key,
            log,
        })
    }

    /// Registers a peer this node should replicate to. Called once per
    /// entry in the static peer-list file at startup.
    pub fn add_peer(&mut self, peer_node_id: u32, addr: SocketAddr) {
        self.peers.insert(peer_node_id, addr);
    }

    /// Binds and registers a listening socket for inbound connections.
    pub fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut listener = TcpListener::bind(addr)?;
        self.poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        self.listener = Some(listener);
        Ok(())
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Dials an outbound connection to `peer_node_id` and begins its
    /// handshake as the initiator.
    fn connect(&mut self, peer_node_id: u32, addr: SocketAddr) -> ProtoResult<()> {
        let mut stream = TcpStream::connect(addr)?;
        let token = self.allocate_token();
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        let session = Session::new(stream, Role::Initiator, self.node_id, self.key, self.log.clone());
        self.sessions.insert(
            token,
            Live {
                session,
                token,
                outbound_peer: Some(peer_node_id),
            },
        );
        self.outbound_by_peer.insert(peer_node_id, token);
        Ok(())
    }

    /// Queues `payload` for delivery to every known peer, returning how many
    /// peers it was queued for. A peer that is unreachable keeps nothing —
    /// per spec.md §4.2 this is best-effort; the next periodic push resends
    /// whatever is still flagged `NEW`.
    pub fn broadcast(&mut self, payload: &[u8]) -> usize {
        for peer_node_id in self.peers.keys().copied().collect::<Vec<_>>() {
            self.pending
                .entry(peer_node_id)
                .or_default()
                .push_back(payload.to_vec());
        }
        self.peers.len()
    }

    /// Pops the next received payload, if any, in completion order.
    pub fn pop(&mut self) -> Option<Inbound> {
        self.inbox.pop_front()
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The single driver entry: accept pending inbound connections, dial
    /// outbound ones for peers with queued work and no existing outbound
    /// session, advance every live session by one `tick()`, then reap dead
    /// or timed-out sessions.
    pub fn pump(&mut self) -> ProtoResult<()> {
        let mut events = Events::with_capacity(128);
        match self.poll.poll(&mut events, Some(POLL_BUDGET)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }

        if self.listener.is_some() {
            self.accept_pending()?;
        }

        self.dial_pending_peers();
        self.fill_outbound_boxes();

        let mut dead = Vec::new();
        for (token, live) in self.sessions.iter_mut() {
            match live.session.tick() {
                Ok(SessionEvent::Data(payload)) => {
                    if let Some(peer_node_id) = live.session.peer_node_id() {
                        self.inbox.push_back(Inbound { peer_node_id, payload });
                    }
                }
                Ok(SessionEvent::Closed) | Err(_) => dead.push(*token),
                Ok(_) => {}
            }

            if live.session.last_activity().elapsed() > IDLE_TIMEOUT {
                dead.push(*token);
            }
        }

        dead.sort_unstable();
        dead.dedup();
        for token in dead {
            // `shift_remove`, not `remove` (which is a `swap_remove` alias on
            // `IndexMap`): a swap_remove would pull the last session into the
            // reaped slot and break the insertion-order guarantee this map
            // exists to provide.
            if let Some(mut live) = self.sessions.shift_remove(&token) {
                debug!(self.log, "reaping session"; "token" => format!("{:?}", live.token));
                let _ = self.poll.registry().deregister(live.session.stream_mut());
                if let Some(peer_node_id) = live.outbound_peer {
                    if self.outbound_by_peer.get(&peer_node_id) == Some(&token) {
                        self.outbound_by_peer.remove(&peer_node_id);
                    }
                }
            }
        }

        Ok(())
    }

    /// For every peer with queued payloads and no live outbound session,
    /// starts one. A peer that can't be dialed doesn't retain its queued
    /// payload — per spec.md §4.2 an unreachable peer is best-effort, not
    /// retried against the same stale payload; whatever is still flagged
    /// `NEW` gets resent on the next periodic push instead.
    fn dial_pending_peers(&mut self) {
        let candidates: Vec<(u32, SocketAddr)> = self
            .pending
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .filter_map(|(peer_node_id, _)| {
                if self.outbound_by_peer.contains_key(peer_node_id) {
                    return None;
                }
                self.peers.get(peer_node_id).map(|addr| (*peer_node_id, *addr))
            })
            .collect();

        for (peer_node_id, addr) in candidates {
            if let Err(e) = self.connect(peer_node_id, addr) {
                warn!(self.log, "failed to dial peer, dropping queued payload"; "peer" => peer_node_id, "error" => %e);
                self.pending.remove(&peer_node_id);
            }
        }
    }

    /// Hands the front of each peer's pending queue to its live outbound
    /// session, once that session has authenticated and is idle.
    fn fill_outbound_boxes(&mut self) {
        for (peer_node_id, token) in self.outbound_by_peer.iter() {
            let Some(queue) = self.pending.get_mut(peer_node_id) else {
                continue;
            };
            let Some(live) = self.sessions.get_mut(token) else {
                continue;
            };
            if let Some(payload) = queue.front().cloned() {
                if live.session.push(payload) {
                    queue.pop_front();
                }
            }
        }
    }

    fn accept_pending(&mut self) -> ProtoResult<()> {
        loop {
            let listener = self.listener.as_ref().expect("checked by caller");
            match listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let token = self.allocate_token();
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                    {
                        warn!(self.log, "failed to register accepted stream"; "peer" => %peer_addr, "error" => %e);
                        continue;
                    }
                    let session =
                        Session::new(stream, Role::Responder, self.node_id, self.key, self.log.clone());
                    self.sessions.insert(
                        token,
                        Live {
                            session,
                            token,
                            outbound_peer: None,
                        },
                    );
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(ProtoError::Fatal(ProtoErrorKind::Io(e.kind()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_with_no_peers_queues_nothing() {
        let log = driftwatch_proto::logging::discard();
        let mut mgr = QueueManager::new(1, [0u8; KEY_SIZE], log).unwrap();
        let sent = mgr.broadcast(b"payload");
        assert_eq!(sent, 0);
        assert!(mgr.pending.is_empty());
    }

    #[test]
    fn broadcast_queues_payload_for_every_known_peer() {
        let log = driftwatch_proto::logging::discard();
        let mut mgr = QueueManager::new(1, [0u8; KEY_SIZE], log).unwrap();
        mgr.add_peer(2, "127.0.0.1:1".parse().unwrap());
        mgr.add_peer(3, "127.0.0.1:2".parse().unwrap());
        let sent = mgr.broadcast(b"payload-a");
        assert_eq!(sent, 2);
        assert_eq!(mgr.pending[&2].len(), 1);
        assert_eq!(mgr.pending[&3].len(), 1);

        mgr.broadcast(b"payload-b");
        assert_eq!(mgr.pending[&2].len(), 2);
        assert_eq!(mgr.pending[&2][0], b"payload-a");
        assert_eq!(mgr.pending[&2][1], b"payload-b");
    }
}
