//! Server sessions. Exactly one is active at a time and the server core
//! switches between them on the id returned by [`SessionState::process`].

mod billiards;
mod lobby;

pub use billiards::{
    BilliardsState, ERROR_RETURN_DELAY, MAX_IMPULSE, SUMMARY_DURATION, TURN_READY_TIMEOUT,
    TURN_TIME,
};
pub use lobby::LobbyState;

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::network::{NetFlag, PeerId, Transport};
use billiards_shared::{Packet, StateId};
use log::debug;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(u8),
    Disconnected(u8),
}

/// State shared by the server core and whichever session is active.
///
/// Created once per server run and only touched from the thread that
/// created it.
pub struct SharedData {
    pub transport: Box<dyn Transport>,
    pub clients: ClientManager,
    pub host: Option<PeerId>,
    pub asset_dir: PathBuf,
    /// Table the next match loads.
    pub table: String,
    /// Overrides the random choice of who breaks.
    pub first_player: Option<usize>,
    pub connection_events: VecDeque<ConnectionEvent>,
    owner: ThreadId,
}

impl SharedData {
    pub fn new(transport: Box<dyn Transport>, config: &ServerConfig) -> Self {
        Self {
            transport,
            clients: ClientManager::new(),
            host: None,
            asset_dir: config.asset_dir.clone(),
            table: config.table.clone(),
            first_player: None,
            connection_events: VecDeque::new(),
            owner: std::thread::current().id(),
        }
    }

    pub fn check_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owner,
            "shared data used off its owning thread"
        );
    }

    pub fn is_host(&self, peer: PeerId) -> bool {
        self.host == Some(peer)
    }

    pub fn send_peer(&mut self, peer: PeerId, packet: &Packet, flag: NetFlag) {
        self.transport.send(peer, packet, flag);
    }

    /// Sends to the client in `slot`, if connected.
    pub fn send(&mut self, slot: u8, packet: &Packet, flag: NetFlag) {
        match self.clients.get(slot).map(|c| c.peer) {
            Some(peer) => self.transport.send(peer, packet, flag),
            None => debug!("Dropping {:?} for empty slot {}", packet, slot),
        }
    }

    /// Sends to every connected client.
    pub fn broadcast(&mut self, packet: &Packet, flag: NetFlag) {
        let peers = self.clients.peers();
        self.transport.broadcast(&peers, packet, flag);
    }
}

pub trait SessionState {
    fn state_id(&self) -> StateId;
    fn handle_connection(&mut self, shared: &mut SharedData, event: ConnectionEvent);
    fn net_event(&mut self, shared: &mut SharedData, peer: PeerId, packet: Packet);
    /// Runs on the broadcast cadence.
    fn net_broadcast(&mut self, shared: &mut SharedData);
    /// Runs on the fixed step. Returning another id switches session.
    fn process(&mut self, shared: &mut SharedData, dt: f32) -> StateId;
}

/// Builds the session for `id`, or `None` if this server does not run it.
pub fn create_session(id: StateId, shared: &mut SharedData) -> Option<Box<dyn SessionState>> {
    match id {
        StateId::Lobby => Some(Box::new(LobbyState::new(shared))),
        StateId::Billiards => Some(Box::new(BilliardsState::new(shared))),
        StateId::Golf => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::network::MemoryTransport;

    pub fn asset_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
    }

    /// Shared data with `clients` admitted as peers `1..=clients`, one player each.
    pub fn shared_with_clients(clients: u32) -> (SharedData, MemoryTransport) {
        let transport = MemoryTransport::new();
        let config = ServerConfig {
            asset_dir: asset_dir(),
            ..Default::default()
        };
        let mut shared = SharedData::new(Box::new(transport.clone()), &config);
        for peer in 1..=clients {
            transport.connect(peer);
            shared.clients.add_client(peer, 1);
        }
        shared.host = if clients > 0 { Some(1) } else { None };
        while shared.transport.poll_event().is_some() {}
        (shared, transport)
    }
}
