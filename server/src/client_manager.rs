//! Client slot management for the billiards server
//!
//! This module handles the server-side bookkeeping of connections, including:
//! - Pending connections that have not yet completed the handshake
//! - A fixed table of numbered client slots, each bringing one or more players
//! - Per-session flags (ready, map loaded, turn ready, ready to quit)
//!
//! A peer only occupies a slot after it has confirmed the protocol version and
//! reported how many local players it brings. Slots are what every session
//! sees; transport peers never leak past this module and the server core.

use crate::network::PeerId;
use billiards_shared::MAX_CLIENTS;
use log::info;
use std::time::{Duration, Instant};

/// A transport peer that has connected but not yet been given a slot
#[derive(Debug, Clone)]
pub struct PendingConnection {
    pub peer: PeerId,
    /// When the transport reported the connection
    pub since: Instant,
    /// Set once `ClientVersion` matched
    pub version_ok: bool,
}

impl PendingConnection {
    pub fn new(peer: PeerId, now: Instant) -> Self {
        Self {
            peer,
            since: now,
            version_ok: false,
        }
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.since) > timeout
    }
}

/// One client slot
///
/// Flags are reset whenever a session starts so each session can gate its
/// own transitions on them.
#[derive(Debug, Clone, Default)]
pub struct ClientConnection {
    pub connected: bool,
    pub peer: PeerId,
    pub player_count: u8,
    pub ready: bool,
    pub map_loaded: bool,
    pub turn_ready: bool,
    pub ready_quit: bool,
    /// Lobby ready flag as last reported by the client
    pub lobby_ready: bool,
}

/// Manages pending connections and the client slot table
///
/// Slots are numbered `0..MAX_CLIENTS`. A freed slot is reused by the next
/// admitted client, so slot numbers stay small enough to be used as bit
/// indices in ready masks.
pub struct ClientManager {
    pending: Vec<PendingConnection>,
    clients: [ClientConnection; MAX_CLIENTS],
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            clients: Default::default(),
        }
    }

    pub fn add_pending(&mut self, peer: PeerId, now: Instant) {
        if self.pending.iter().all(|p| p.peer != peer) {
            self.pending.push(PendingConnection::new(peer, now));
        }
    }

    pub fn pending_mut(&mut self, peer: PeerId) -> Option<&mut PendingConnection> {
        self.pending.iter_mut().find(|p| p.peer == peer)
    }

    pub fn remove_pending(&mut self, peer: PeerId) -> Option<PendingConnection> {
        let index = self.pending.iter().position(|p| p.peer == peer)?;
        Some(self.pending.remove(index))
    }

    /// Drops pending connections older than `timeout`
    ///
    /// Returns the evicted peers so the caller can close them at the
    /// transport.
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let (stale, fresh): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|p| p.is_stale(now, timeout));
        self.pending = fresh;
        stale.into_iter().map(|p| p.peer).collect()
    }

    /// Assigns the lowest free slot to `peer`
    ///
    /// Returns None when every slot is taken.
    pub fn add_client(&mut self, peer: PeerId, player_count: u8) -> Option<u8> {
        let slot = self.clients.iter().position(|c| !c.connected)?;
        self.clients[slot] = ClientConnection {
            connected: true,
            peer,
            player_count,
            ..Default::default()
        };
        info!(
            "Peer {} admitted to slot {} with {} players",
            peer, slot, player_count
        );
        Some(slot as u8)
    }

    /// Frees the slot held by `peer`, returning its number
    pub fn remove_client(&mut self, peer: PeerId) -> Option<u8> {
        let slot = self.find_client_by_peer(peer)?;
        self.clients[slot as usize] = ClientConnection::default();
        info!("Slot {} freed", slot);
        Some(slot)
    }

    pub fn find_client_by_peer(&self, peer: PeerId) -> Option<u8> {
        self.clients
            .iter()
            .position(|c| c.connected && c.peer == peer)
            .map(|slot| slot as u8)
    }

    pub fn get(&self, slot: u8) -> Option<&ClientConnection> {
        self.clients.get(slot as usize).filter(|c| c.connected)
    }

    pub fn get_mut(&mut self, slot: u8) -> Option<&mut ClientConnection> {
        self.clients.get_mut(slot as usize).filter(|c| c.connected)
    }

    /// Connected slots in slot order
    pub fn connected(&self) -> impl Iterator<Item = (u8, &ClientConnection)> + '_ {
        self.clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.connected)
            .map(|(slot, c)| (slot as u8, c))
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.connected().map(|(_, c)| c.peer).collect()
    }

    /// True if every connected client satisfies `flag`
    pub fn all(&self, flag: impl Fn(&ClientConnection) -> bool) -> bool {
        self.connected().all(|(_, c)| flag(c))
    }

    /// Bitmask of connected slots satisfying `flag`
    pub fn mask(&self, flag: impl Fn(&ClientConnection) -> bool) -> u8 {
        self.connected()
            .filter(|(_, c)| flag(c))
            .fold(0, |mask, (slot, _)| mask | (1 << slot))
    }

    /// Clears the per-session flags of every slot
    pub fn reset_flags(&mut self) {
        for client in self.clients.iter_mut() {
            client.ready = false;
            client.map_loaded = false;
            client.turn_ready = false;
            client.ready_quit = false;
        }
    }

    /// Returns the number of connected clients
    pub fn len(&self) -> usize {
        self.connected().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new();
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
        assert_eq!(manager.pending_len(), 0);
    }

    #[test]
    fn test_add_client_uses_lowest_free_slot() {
        let mut manager = ClientManager::new();

        assert_eq!(manager.add_client(10, 1), Some(0));
        assert_eq!(manager.add_client(11, 2), Some(1));
        assert_eq!(manager.add_client(12, 1), Some(2));

        assert_eq!(manager.remove_client(11), Some(1));
        assert_eq!(manager.add_client(13, 1), Some(1));
        assert_eq!(manager.find_client_by_peer(13), Some(1));
        assert_eq!(manager.len(), 3);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new();
        for peer in 0..MAX_CLIENTS as u32 {
            assert!(manager.add_client(peer, 1).is_some());
        }
        assert!(manager.add_client(99, 1).is_none());
        assert_eq!(manager.len(), MAX_CLIENTS);
    }

    #[test]
    fn test_remove_unknown_client() {
        let mut manager = ClientManager::new();
        manager.add_client(1, 1);
        assert_eq!(manager.remove_client(2), None);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_pending_eviction() {
        let mut manager = ClientManager::new();
        let start = Instant::now();
        manager.add_pending(1, start);
        manager.add_pending(2, start + Duration::from_secs(10));
        manager.add_pending(2, start + Duration::from_secs(11));
        assert_eq!(manager.pending_len(), 2);

        let evicted = manager.evict_stale(start + Duration::from_secs(16), Duration::from_secs(15));
        assert_eq!(evicted, vec![1]);
        assert_eq!(manager.pending_len(), 1);
        assert!(manager.pending_mut(2).is_some());
    }

    #[test]
    fn test_flags_and_masks() {
        let mut manager = ClientManager::new();
        manager.add_client(5, 1);
        manager.add_client(6, 1);
        manager.add_client(7, 1);
        manager.remove_client(6);

        manager.get_mut(0).unwrap().ready = true;
        assert!(!manager.all(|c| c.ready));
        assert_eq!(manager.mask(|c| c.ready), 0b001);

        manager.get_mut(2).unwrap().ready = true;
        assert!(manager.all(|c| c.ready));
        assert_eq!(manager.mask(|c| c.ready), 0b101);
        assert!(manager.get_mut(1).is_none());

        manager.reset_flags();
        assert_eq!(manager.mask(|c| c.ready), 0);
        assert_eq!(manager.peers(), vec![5, 7]);
    }
}
