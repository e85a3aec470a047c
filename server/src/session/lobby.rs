use super::{ConnectionEvent, SessionState, SharedData};
use crate::network::{NetFlag, PeerId};
use billiards_shared::{Packet, RejectReason, ServerCommand, StateId};
use log::{debug, info, warn};

/// Pre-game gathering point. Players set their ready flags while the host
/// picks a table and starts the match.
pub struct LobbyState {
    next: StateId,
}

impl LobbyState {
    pub fn new(shared: &mut SharedData) -> Self {
        shared.check_thread();
        shared.clients.reset_flags();
        Self {
            next: StateId::Lobby,
        }
    }

    fn kick(&mut self, shared: &mut SharedData, target: u8) {
        let Some(peer) = shared.clients.get(target).map(|c| c.peer) else {
            debug!("Kick requested for empty slot {}", target);
            return;
        };
        info!("Kicking client {}", target);
        shared.send_peer(
            peer,
            &Packet::ConnectionRefused(RejectReason::Kicked),
            NetFlag::Reliable,
        );
        shared.transport.disconnect_later(peer);
    }
}

impl SessionState for LobbyState {
    fn state_id(&self) -> StateId {
        StateId::Lobby
    }

    fn handle_connection(&mut self, shared: &mut SharedData, event: ConnectionEvent) {
        if let ConnectionEvent::Connected(slot) = event {
            // Bring the newcomer up to date
            let table = shared.table.clone();
            shared.send(slot, &Packet::MapInfo(table), NetFlag::Reliable);

            let ready: Vec<u8> = shared
                .clients
                .connected()
                .filter(|(_, c)| c.lobby_ready)
                .map(|(s, _)| s)
                .collect();
            for other in ready {
                let value = (other as u16) << 8 | 1;
                shared.send(slot, &Packet::LobbyReady(value), NetFlag::Reliable);
            }
        }
    }

    fn net_event(&mut self, shared: &mut SharedData, peer: PeerId, packet: Packet) {
        shared.check_thread();
        let Some(slot) = shared.clients.find_client_by_peer(peer) else {
            return;
        };

        match packet {
            Packet::LobbyReady(value) => {
                let index = (value >> 8) as u8;
                if index != slot {
                    warn!("Client {} tried to set the ready flag of {}", slot, index);
                    return;
                }
                let ready = value & 0xff != 0;
                if let Some(client) = shared.clients.get_mut(slot) {
                    client.lobby_ready = ready;
                }
                let value = (slot as u16) << 8 | ready as u16;
                shared.broadcast(&Packet::LobbyReady(value), NetFlag::Reliable);
            }
            Packet::MapInfo(table) if shared.is_host(peer) => {
                info!("Host selected table {}", table);
                shared.table = table.clone();
                shared.broadcast(&Packet::MapInfo(table), NetFlag::Reliable);
            }
            Packet::RequestGameStart(id) if shared.is_host(peer) => match StateId::try_from(id) {
                Ok(StateId::Billiards) => self.next = StateId::Billiards,
                Ok(StateId::Golf) => info!("Golf is not hosted by this server, ignoring start"),
                Ok(StateId::Lobby) | Err(_) => warn!("Invalid game start request {}", id),
            },
            Packet::ServerCommand {
                command: ServerCommand::KickClient,
                target,
            } if shared.is_host(peer) && target != 0 => self.kick(shared, target),
            other => debug!("Lobby ignoring {:?} from client {}", other, slot),
        }
    }

    fn net_broadcast(&mut self, _shared: &mut SharedData) {}

    fn process(&mut self, _shared: &mut SharedData, _dt: f32) -> StateId {
        self.next
    }
}
