//! Packet transport over UDP.
//!
//! Sessions only see the [`Transport`] trait: send a packet reliably or
//! unreliably, poll for connect, disconnect and packet events, and query a
//! peer's round trip time. [`UdpTransport`] implements it on a tokio socket
//! whose receive task forwards decoded datagrams through a channel, so the
//! game loop never blocks on I/O. [`MemoryTransport`] records traffic in
//! memory for tests and tools.

use crate::error::TransportError;
use bincode::{deserialize, serialize};
use billiards_shared::{Datagram, Packet};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub type PeerId = u32;

pub const RESEND_INTERVAL: Duration = Duration::from_millis(200);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest a deferred disconnect waits for outstanding reliable packets.
pub const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetFlag {
    Reliable,
    Unreliable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetEventKind {
    Connected,
    Disconnected,
    Packet(Packet),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetEvent {
    pub peer: PeerId,
    pub kind: NetEventKind,
}

pub trait Transport {
    fn send(&mut self, peer: PeerId, packet: &Packet, flag: NetFlag);

    fn broadcast(&mut self, peers: &[PeerId], packet: &Packet, flag: NetFlag) {
        for &peer in peers {
            self.send(peer, packet, flag);
        }
    }

    fn poll_event(&mut self) -> Option<NetEvent>;
    /// Smoothed round trip time in milliseconds.
    fn rtt(&self, peer: PeerId) -> u16;
    fn disconnect(&mut self, peer: PeerId);
    /// Disconnects once queued reliable packets are delivered.
    fn disconnect_later(&mut self, peer: PeerId);
    /// Resends, keepalives and timeouts.
    fn service(&mut self, now: Instant);
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    established: bool,
    next_seq: u32,
    unacked: BTreeMap<u32, (Packet, Instant)>,
    next_expected: u32,
    held: BTreeMap<u32, Packet>,
    rtt_ms: f32,
    last_seen: Instant,
    last_ping: Instant,
    closing: Option<Instant>,
}

impl Peer {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            established: false,
            next_seq: 0,
            unacked: BTreeMap::new(),
            next_expected: 0,
            held: BTreeMap::new(),
            rtt_ms: 0.0,
            last_seen: now,
            last_ping: now,
            closing: None,
        }
    }
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    incoming: mpsc::UnboundedReceiver<(SocketAddr, Datagram)>,
    peers: HashMap<PeerId, Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_peer: PeerId,
    events: VecDeque<NetEvent>,
    epoch: Instant,
    accept: bool,
}

impl UdpTransport {
    /// Listens on `addr` and accepts peers that greet it.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Listening on {}", socket.local_addr()?);
        Ok(Self::from_socket(socket, true))
    }

    /// Opens a connection to a listening transport and waits for its greeting.
    pub async fn connect(server: SocketAddr) -> Result<(Self, PeerId), TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let mut transport = Self::from_socket(socket, false);
        let now = Instant::now();
        let peer = transport.add_peer(server, now);

        let deadline = now + CONNECT_TIMEOUT;
        while Instant::now() < deadline {
            transport.transmit(server, &Datagram::Hello);
            let reply = tokio::time::timeout(RESEND_INTERVAL, transport.incoming.recv()).await;
            match reply {
                Ok(Some((addr, datagram))) => {
                    transport.handle_datagram(addr, datagram, Instant::now());
                    if transport.peers.get(&peer).map(|p| p.established) == Some(true) {
                        info!("Connected to {}", server);
                        return Ok((transport, peer));
                    }
                }
                Ok(None) => break,
                Err(_) => debug!("No greeting from {} yet", server),
            }
        }
        Err(TransportError::ConnectTimeout(server))
    }

    fn from_socket(socket: UdpSocket, accept: bool) -> Self {
        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_receiver(Arc::clone(&socket), tx);

        Self {
            socket,
            incoming: rx,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_peer: 1,
            events: VecDeque::new(),
            epoch: Instant::now(),
            accept,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn add_peer(&mut self, addr: SocketAddr, now: Instant) -> PeerId {
        let id = self.next_peer;
        self.next_peer += 1;
        self.peers.insert(id, Peer::new(addr, now));
        self.by_addr.insert(addr, id);
        id
    }

    fn drop_peer(&mut self, id: PeerId) {
        if let Some(peer) = self.peers.remove(&id) {
            self.by_addr.remove(&peer.addr);
            if peer.established {
                self.events.push_back(NetEvent {
                    peer: id,
                    kind: NetEventKind::Disconnected,
                });
            }
        }
    }

    fn millis(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch).as_millis() as u64
    }

    fn transmit(&self, addr: SocketAddr, datagram: &Datagram) {
        if let Err(e) = send_datagram(&self.socket, addr, datagram) {
            warn!("Failed to send to {}: {}", addr, e);
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, datagram: Datagram, now: Instant) {
        let id = match self.by_addr.get(&addr).copied() {
            Some(id) => id,
            None if self.accept && datagram == Datagram::Hello => self.add_peer(addr, now),
            None => {
                debug!("Ignoring datagram from unknown address {}", addr);
                return;
            }
        };

        let mut replies = Vec::new();
        let mut delivered = Vec::new();
        let mut goodbye = false;
        let millis = self.millis(now);

        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        peer.last_seen = now;

        match datagram {
            Datagram::Hello => {
                if !peer.established {
                    peer.established = true;
                    delivered.push(NetEventKind::Connected);
                }
                if self.accept {
                    replies.push(Datagram::Hello);
                }
            }
            Datagram::Goodbye => goodbye = true,
            Datagram::Unreliable(packet) => delivered.push(NetEventKind::Packet(packet)),
            Datagram::Reliable { seq, packet } => {
                replies.push(Datagram::Ack { seq });
                if seq >= peer.next_expected {
                    peer.held.insert(seq, packet);
                }
                while let Some(packet) = peer.held.remove(&peer.next_expected) {
                    delivered.push(NetEventKind::Packet(packet));
                    peer.next_expected += 1;
                }
            }
            Datagram::Ack { seq } => {
                peer.unacked.remove(&seq);
            }
            Datagram::Ping { sent_ms } => replies.push(Datagram::Pong { sent_ms }),
            Datagram::Pong { sent_ms } => {
                let sample = millis.saturating_sub(sent_ms) as f32;
                peer.rtt_ms = if peer.rtt_ms == 0.0 {
                    sample
                } else {
                    peer.rtt_ms * 0.875 + sample * 0.125
                };
            }
        }

        for reply in &replies {
            self.transmit(addr, reply);
        }
        for kind in delivered {
            self.events.push_back(NetEvent { peer: id, kind });
        }
        if goodbye {
            info!("Peer {} at {} said goodbye", id, addr);
            self.drop_peer(id);
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, peer: PeerId, packet: &Packet, flag: NetFlag) {
        let now = Instant::now();
        let Some(state) = self.peers.get_mut(&peer) else {
            debug!("{}", TransportError::UnknownPeer(peer));
            return;
        };

        let datagram = match flag {
            NetFlag::Reliable => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.unacked.insert(seq, (packet.clone(), now));
                Datagram::Reliable {
                    seq,
                    packet: packet.clone(),
                }
            }
            NetFlag::Unreliable => Datagram::Unreliable(packet.clone()),
        };
        let addr = state.addr;
        self.transmit(addr, &datagram);
    }

    fn poll_event(&mut self) -> Option<NetEvent> {
        while let Ok((addr, datagram)) = self.incoming.try_recv() {
            self.handle_datagram(addr, datagram, Instant::now());
        }
        self.events.pop_front()
    }

    fn rtt(&self, peer: PeerId) -> u16 {
        self.peers
            .get(&peer)
            .map(|p| p.rtt_ms.round().min(u16::MAX as f32) as u16)
            .unwrap_or(0)
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some(addr) = self.peers.get(&peer).map(|p| p.addr) {
            self.transmit(addr, &Datagram::Goodbye);
            self.drop_peer(peer);
        }
    }

    fn disconnect_later(&mut self, peer: PeerId) {
        if let Some(state) = self.peers.get_mut(&peer) {
            if state.closing.is_none() {
                state.closing = Some(Instant::now() + LINGER_TIMEOUT);
            }
        }
    }

    fn service(&mut self, now: Instant) {
        let millis = self.millis(now);
        let mut outgoing = Vec::new();
        let mut expired = Vec::new();
        let mut closed = Vec::new();

        for (&id, peer) in self.peers.iter_mut() {
            if now.duration_since(peer.last_seen) > PEER_TIMEOUT {
                warn!("Peer {} at {} timed out", id, peer.addr);
                expired.push(id);
                continue;
            }
            if let Some(deadline) = peer.closing {
                if peer.unacked.is_empty() || now >= deadline {
                    closed.push(id);
                    continue;
                }
            }

            for (&seq, (packet, sent)) in peer.unacked.iter_mut() {
                if now.duration_since(*sent) >= RESEND_INTERVAL {
                    *sent = now;
                    outgoing.push((
                        peer.addr,
                        Datagram::Reliable {
                            seq,
                            packet: packet.clone(),
                        },
                    ));
                }
            }
            if peer.established && now.duration_since(peer.last_ping) >= KEEPALIVE_INTERVAL {
                peer.last_ping = now;
                outgoing.push((peer.addr, Datagram::Ping { sent_ms: millis }));
            }
        }

        for (addr, datagram) in &outgoing {
            self.transmit(*addr, datagram);
        }
        for id in expired {
            self.drop_peer(id);
        }
        for id in closed {
            self.disconnect(id);
        }
    }
}

/// Forwards decoded datagrams from the socket until the transport is dropped.
fn spawn_receiver(socket: Arc<UdpSocket>, tx: mpsc::UnboundedSender<(SocketAddr, Datagram)>) {
    tokio::spawn(async move {
        let mut buffer = [0u8; 2048];

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => match deserialize::<Datagram>(&buffer[0..len]) {
                    Ok(datagram) => {
                        if tx.send((addr, datagram)).is_err() {
                            debug!("Transport dropped, stopping receiver");
                            break;
                        }
                    }
                    Err(_) => warn!("Failed to deserialize datagram from {}", addr),
                },
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    });
}

fn send_datagram(
    socket: &UdpSocket,
    addr: SocketAddr,
    datagram: &Datagram,
) -> Result<(), TransportError> {
    let data = serialize(datagram)?;
    socket.try_send_to(&data, addr)?;
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryState {
    outbox: Vec<(PeerId, Packet, NetFlag)>,
    inbox: VecDeque<NetEvent>,
    connected: BTreeSet<PeerId>,
    closing: BTreeSet<PeerId>,
    rtt: HashMap<PeerId, u16>,
}

/// In-process transport. Clones share the same state, so a test can keep one
/// handle to inject events while the server owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, peer: PeerId) {
        let mut state = self.state.borrow_mut();
        state.connected.insert(peer);
        state.inbox.push_back(NetEvent {
            peer,
            kind: NetEventKind::Connected,
        });
    }

    pub fn deliver(&self, peer: PeerId, packet: Packet) {
        self.state.borrow_mut().inbox.push_back(NetEvent {
            peer,
            kind: NetEventKind::Packet(packet),
        });
    }

    /// Simulates the remote end going away.
    pub fn drop_peer(&self, peer: PeerId) {
        let mut state = self.state.borrow_mut();
        if state.connected.remove(&peer) {
            state.inbox.push_back(NetEvent {
                peer,
                kind: NetEventKind::Disconnected,
            });
        }
    }

    pub fn set_rtt(&self, peer: PeerId, rtt_ms: u16) {
        self.state.borrow_mut().rtt.insert(peer, rtt_ms);
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.state.borrow().connected.contains(&peer)
    }

    pub fn take_outbox(&self) -> Vec<(PeerId, Packet, NetFlag)> {
        std::mem::take(&mut self.state.borrow_mut().outbox)
    }

    /// Packets sent to `peer` so far, without clearing the outbox.
    pub fn sent_to(&self, peer: PeerId) -> Vec<Packet> {
        self.state
            .borrow()
            .outbox
            .iter()
            .filter(|(p, _, _)| *p == peer)
            .map(|(_, packet, _)| packet.clone())
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, peer: PeerId, packet: &Packet, flag: NetFlag) {
        let mut state = self.state.borrow_mut();
        if state.connected.contains(&peer) {
            state.outbox.push((peer, packet.clone(), flag));
        }
    }

    fn poll_event(&mut self) -> Option<NetEvent> {
        self.state.borrow_mut().inbox.pop_front()
    }

    fn rtt(&self, peer: PeerId) -> u16 {
        self.state.borrow().rtt.get(&peer).copied().unwrap_or(0)
    }

    fn disconnect(&mut self, peer: PeerId) {
        self.drop_peer(peer);
    }

    fn disconnect_later(&mut self, peer: PeerId) {
        let mut state = self.state.borrow_mut();
        if state.connected.contains(&peer) {
            state.closing.insert(peer);
        }
    }

    fn service(&mut self, _now: Instant) {
        let closing = std::mem::take(&mut self.state.borrow_mut().closing);
        for peer in closing {
            self.drop_peer(peer);
        }
    }
}
