//! The server process: admission, session switching and the fixed cadences,
//! all on one worker thread.

use crate::config::ServerConfig;
use crate::error::LaunchError;
use crate::network::{NetEvent, NetEventKind, NetFlag, PeerId, Transport, UdpTransport};
use crate::session::{create_session, ConnectionEvent, LobbyState, SessionState, SharedData};
use billiards_shared::{Packet, RejectReason, StateId, MAX_PLAYERS_PER_CLIENT, PROTOCOL_VERSION};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Longest wall clock gap fed to the accumulators in one update.
const MAX_FRAME_TIME: Duration = Duration::from_millis(250);
const LOOP_SLEEP: Duration = Duration::from_millis(1);

/// One iteration of the server loop, independent of any socket.
pub struct ServerCore {
    shared: SharedData,
    session: Box<dyn SessionState>,
    config: ServerConfig,
    last_update: Option<Instant>,
    tick_acc: Duration,
    broadcast_acc: Duration,
    ping_acc: Duration,
}

impl ServerCore {
    pub fn new(transport: Box<dyn Transport>, config: ServerConfig) -> Self {
        let mut shared = SharedData::new(transport, &config);
        let session = Box::new(LobbyState::new(&mut shared));
        Self {
            shared,
            session,
            config,
            last_update: None,
            tick_acc: Duration::ZERO,
            broadcast_acc: Duration::ZERO,
            ping_acc: Duration::ZERO,
        }
    }

    pub fn state_id(&self) -> StateId {
        self.session.state_id()
    }

    pub fn shared(&self) -> &SharedData {
        &self.shared
    }

    pub fn shared_mut(&mut self) -> &mut SharedData {
        &mut self.shared
    }

    pub fn update(&mut self, now: Instant) {
        self.shared.check_thread();

        let mut elapsed = self
            .last_update
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_update = Some(now);
        if elapsed > MAX_FRAME_TIME {
            warn!(
                "Large frame time detected ({:.3}s), capping to {:.3}s",
                elapsed.as_secs_f32(),
                MAX_FRAME_TIME.as_secs_f32()
            );
            elapsed = MAX_FRAME_TIME;
        }

        while let Some(event) = self.shared.connection_events.pop_front() {
            self.session.handle_connection(&mut self.shared, event);
        }

        while let Some(event) = self.shared.transport.poll_event() {
            self.handle_net_event(event, now);
        }

        self.broadcast_acc += elapsed;
        self.tick_acc += elapsed;
        self.ping_acc += elapsed;

        while self.broadcast_acc > self.config.broadcast_interval {
            self.broadcast_acc -= self.config.broadcast_interval;
            self.session.net_broadcast(&mut self.shared);
        }

        let dt = self.config.tick_interval.as_secs_f32();
        while self.tick_acc > self.config.tick_interval {
            self.tick_acc -= self.config.tick_interval;
            let next = self.session.process(&mut self.shared, dt);
            if next != self.session.state_id() {
                self.switch_session(next);
            }
        }

        while self.ping_acc > self.config.ping_interval {
            self.ping_acc -= self.config.ping_interval;
            self.broadcast_ping();
        }

        let stale = self
            .shared
            .clients
            .evict_stale(now, self.config.handshake_timeout);
        for peer in stale {
            warn!("Peer {} did not finish the handshake in time", peer);
            self.shared.transport.disconnect(peer);
        }

        self.shared.transport.service(now);
    }

    /// Disconnects every peer. Called once when the loop stops.
    pub fn shutdown(&mut self) {
        for peer in self.shared.clients.peers() {
            self.shared.transport.disconnect(peer);
        }
        self.shared.transport.service(Instant::now());
    }

    fn handle_net_event(&mut self, event: NetEvent, now: Instant) {
        let peer = event.peer;
        match event.kind {
            NetEventKind::Connected => {
                if self.session.state_id() != StateId::Lobby {
                    info!("Refusing peer {}, a match is in progress", peer);
                    self.refuse(peer, RejectReason::NotInLobby);
                } else {
                    debug!("Peer {} connected, awaiting handshake", peer);
                    self.shared.clients.add_pending(peer, now);
                }
            }
            NetEventKind::Disconnected => self.handle_disconnect(peer),
            NetEventKind::Packet(packet) => {
                if self.shared.clients.find_client_by_peer(peer).is_some() {
                    self.session.net_event(&mut self.shared, peer, packet);
                } else {
                    self.handshake(peer, packet);
                }
            }
        }
    }

    fn handshake(&mut self, peer: PeerId, packet: Packet) {
        let Some(version_ok) = self.shared.clients.pending_mut(peer).map(|p| p.version_ok) else {
            debug!("Dropping {:?} from unknown peer {}", packet, peer);
            return;
        };

        match packet {
            Packet::ClientVersion(version) if version == PROTOCOL_VERSION => {
                if let Some(pending) = self.shared.clients.pending_mut(peer) {
                    pending.version_ok = true;
                }
            }
            Packet::ClientVersion(version) => {
                warn!(
                    "Peer {} speaks protocol {}, expected {}",
                    peer, version, PROTOCOL_VERSION
                );
                self.refuse(peer, RejectReason::VersionMismatch);
            }
            Packet::ClientPlayerCount(count) if version_ok => self.admit(peer, count),
            other => debug!("Unexpected {:?} during handshake of peer {}", other, peer),
        }
    }

    fn admit(&mut self, peer: PeerId, player_count: u8) {
        if self.session.state_id() != StateId::Lobby {
            info!("Refusing peer {}, a match started during its handshake", peer);
            self.refuse(peer, RejectReason::NotInLobby);
            return;
        }
        if !(1..=MAX_PLAYERS_PER_CLIENT).contains(&player_count) {
            warn!("Peer {} asked for {} players", peer, player_count);
            self.refuse(peer, RejectReason::BadData);
            return;
        }
        let Some(slot) = self.shared.clients.add_client(peer, player_count) else {
            info!("Server full, refusing peer {}", peer);
            self.refuse(peer, RejectReason::ServerFull);
            return;
        };
        self.shared.clients.remove_pending(peer);

        self.shared
            .send_peer(peer, &Packet::ConnectionAccepted(slot), NetFlag::Reliable);
        self.shared
            .broadcast(&Packet::ClientConnected(slot), NetFlag::Reliable);
        if slot == 0 && self.shared.host.is_none() {
            info!("Client {} is the host", slot);
            self.shared.host = Some(peer);
        }
        self.shared
            .connection_events
            .push_back(ConnectionEvent::Connected(slot));
    }

    fn refuse(&mut self, peer: PeerId, reason: RejectReason) {
        self.shared.clients.remove_pending(peer);
        self.shared
            .send_peer(peer, &Packet::ConnectionRefused(reason), NetFlag::Reliable);
        self.shared.transport.disconnect_later(peer);
    }

    fn handle_disconnect(&mut self, peer: PeerId) {
        if self.shared.clients.remove_pending(peer).is_some() {
            debug!("Pending peer {} went away", peer);
            return;
        }
        let Some(slot) = self.shared.clients.remove_client(peer) else {
            return;
        };

        info!("Client {} disconnected", slot);
        self.shared
            .broadcast(&Packet::ClientDisconnected(slot), NetFlag::Reliable);
        if self.shared.is_host(peer) {
            info!("The host left");
            self.shared.host = None;
        }
        self.shared
            .connection_events
            .push_back(ConnectionEvent::Disconnected(slot));
    }

    fn broadcast_ping(&mut self) {
        let clients: Vec<(u8, PeerId)> = self
            .shared
            .clients
            .connected()
            .map(|(slot, c)| (slot, c.peer))
            .collect();
        for (client, peer) in clients {
            let rtt_ms = self.shared.transport.rtt(peer);
            self.shared
                .broadcast(&Packet::PingTime { client, rtt_ms }, NetFlag::Unreliable);
        }
    }

    fn switch_session(&mut self, next: StateId) {
        let from = self.session.state_id();
        self.session = match create_session(next, &mut self.shared) {
            Some(session) => session,
            None => {
                warn!("No session for {:?}, returning to the lobby", next);
                Box::new(LobbyState::new(&mut self.shared))
            }
        };

        let to = self.session.state_id();
        info!("Session {:?} -> {:?}", from, to);
        self.shared
            .broadcast(&Packet::StateChange(to), NetFlag::Reliable);
        self.broadcast_acc = Duration::ZERO;
    }
}

/// Owns the worker thread running [`ServerCore`] over UDP.
pub struct Server {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            local_addr: None,
        }
    }

    /// Starts serving on `config.listen_addr`, stopping any previous run
    /// first. Returns once the socket is bound.
    pub fn launch(&mut self, config: ServerConfig) -> Result<SocketAddr, LaunchError> {
        self.stop();
        config.validate()?;

        let (ready_tx, ready_rx) = mpsc::channel();
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let spawned = std::thread::Builder::new()
            .name("billiards-server".to_string())
            .spawn(move || run_worker(config, running, ready_tx));
        match spawned {
            Ok(handle) => self.thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        match ready_rx.recv() {
            Ok(Ok(addr)) => {
                self.local_addr = Some(addr);
                Ok(addr)
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(LaunchError::Startup)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Server thread panicked");
            }
            info!("Server stopped");
        }
        self.local_addr = None;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    config: ServerConfig,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<SocketAddr, LaunchError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    runtime.block_on(async {
        let bound = UdpTransport::bind(&config.listen_addr)
            .await
            .and_then(|transport| transport.local_addr().map(|addr| (transport, addr)));
        let (transport, addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!("Failed to bind {}: {}", config.listen_addr, e);
                running.store(false, Ordering::SeqCst);
                let _ = ready.send(Err(e.into()));
                return;
            }
        };
        let _ = ready.send(Ok(addr));
        info!("Server running on {}", addr);

        let mut core = ServerCore::new(Box::new(transport), config);
        while running.load(Ordering::SeqCst) {
            core.update(Instant::now());
            tokio::time::sleep(LOOP_SLEEP).await;
        }
        core.shutdown();
    });

    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryTransport;

    fn core() -> (ServerCore, MemoryTransport) {
        let transport = MemoryTransport::new();
        let core = ServerCore::new(Box::new(transport.clone()), ServerConfig::default());
        (core, transport)
    }

    fn handshake(core: &mut ServerCore, transport: &MemoryTransport, peer: PeerId, now: Instant) {
        transport.connect(peer);
        transport.deliver(peer, Packet::ClientVersion(PROTOCOL_VERSION));
        transport.deliver(peer, Packet::ClientPlayerCount(1));
        core.update(now);
    }

    #[test]
    fn test_admission_assigns_slot_and_host() {
        let (mut core, transport) = core();
        let now = Instant::now();

        handshake(&mut core, &transport, 7, now);
        assert_eq!(core.shared().clients.find_client_by_peer(7), Some(0));
        assert!(core.shared().is_host(7));
        assert_eq!(
            transport.sent_to(7),
            vec![Packet::ConnectionAccepted(0), Packet::ClientConnected(0)]
        );

        handshake(&mut core, &transport, 8, now);
        assert_eq!(core.shared().clients.find_client_by_peer(8), Some(1));
        assert!(core.shared().is_host(7));
    }

    #[test]
    fn test_player_count_before_version_ignored() {
        let (mut core, transport) = core();
        transport.connect(3);
        transport.deliver(3, Packet::ClientPlayerCount(1));
        core.update(Instant::now());

        assert!(core.shared().clients.is_empty());
        assert_eq!(core.shared().clients.pending_len(), 1);
        assert!(transport.take_outbox().is_empty());
    }

    #[test]
    fn test_version_mismatch_refused() {
        let (mut core, transport) = core();
        transport.connect(3);
        transport.deliver(3, Packet::ClientVersion(PROTOCOL_VERSION + 1));
        core.update(Instant::now());

        assert_eq!(
            transport.sent_to(3),
            vec![Packet::ConnectionRefused(RejectReason::VersionMismatch)]
        );
        assert!(!transport.is_connected(3));
        assert_eq!(core.shared().clients.pending_len(), 0);
    }

    #[test]
    fn test_bad_player_count_refused() {
        let (mut core, transport) = core();
        transport.connect(3);
        transport.deliver(3, Packet::ClientVersion(PROTOCOL_VERSION));
        transport.deliver(3, Packet::ClientPlayerCount(MAX_PLAYERS_PER_CLIENT + 1));
        core.update(Instant::now());

        assert_eq!(
            transport.sent_to(3),
            vec![Packet::ConnectionRefused(RejectReason::BadData)]
        );
        assert!(core.shared().clients.is_empty());
    }

    #[test]
    fn test_stale_handshake_evicted() {
        let (mut core, transport) = core();
        let start = Instant::now();
        transport.connect(3);
        core.update(start);
        assert_eq!(core.shared().clients.pending_len(), 1);

        core.update(start + Duration::from_secs(16));
        assert_eq!(core.shared().clients.pending_len(), 0);
        assert!(!transport.is_connected(3));
    }

    #[test]
    fn test_host_cleared_on_disconnect() {
        let (mut core, transport) = core();
        let now = Instant::now();
        handshake(&mut core, &transport, 1, now);
        handshake(&mut core, &transport, 2, now);
        core.update(now);
        transport.take_outbox();

        transport.drop_peer(1);
        core.update(now);
        assert_eq!(core.shared().host, None);
        assert_eq!(core.shared().clients.len(), 1);
        assert_eq!(transport.sent_to(2), vec![Packet::ClientDisconnected(0)]);
    }

    #[test]
    fn test_ping_reports_rtt() {
        let (mut core, transport) = core();
        let start = Instant::now();
        handshake(&mut core, &transport, 1, start);
        transport.set_rtt(1, 42);
        transport.take_outbox();

        // Frame time is capped, so step in small increments
        let mut now = start;
        for _ in 0..6 {
            now += Duration::from_millis(200);
            core.update(now);
        }
        let pings: Vec<_> = transport
            .sent_to(1)
            .into_iter()
            .filter(|p| matches!(p, Packet::PingTime { .. }))
            .collect();
        assert_eq!(pings, vec![Packet::PingTime { client: 0, rtt_ms: 42 }]);
    }

    #[test]
    fn test_launch_and_join_over_udp() {
        let mut server = Server::new();
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let addr = server.launch(config).unwrap();
        assert!(server.is_running());
        assert_eq!(server.local_addr(), Some(addr));

        let accepted = tokio_test::block_on(async {
            let (mut client, peer) = UdpTransport::connect(addr).await.unwrap();
            client.send(peer, &Packet::ClientVersion(PROTOCOL_VERSION), NetFlag::Reliable);
            client.send(peer, &Packet::ClientPlayerCount(2), NetFlag::Reliable);

            for _ in 0..400 {
                while let Some(event) = client.poll_event() {
                    if let NetEventKind::Packet(Packet::ConnectionAccepted(slot)) = event.kind {
                        return Some(slot);
                    }
                }
                client.service(Instant::now());
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            None
        });
        assert_eq!(accepted, Some(0));

        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_launch_rejects_bad_config() {
        let mut server = Server::new();
        let config = ServerConfig {
            listen_addr: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            server.launch(config),
            Err(LaunchError::Config(crate::error::ConfigError::ListenAddr(_)))
        ));
        assert!(!server.is_running());
    }
}
