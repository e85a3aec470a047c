//! The match session: owns the table, the rule director and the turn flow.

use super::{ConnectionEvent, SessionState, SharedData};
use crate::billiards::BilliardsSystem;
use crate::director::{BilliardsEvent, Director, EventQueue, GameEndReason};
use crate::error::SessionError;
use crate::network::{NetFlag, PeerId};
use crate::table::{CollisionMesh, TableData};
use billiards_shared::{
    BallPlacement, BilliardsUpdate, Packet, RejectReason, ServerCommand, StateId, TableInfo, Vec3,
    BALL_HEIGHT, BALL_RADIUS, CUE_BALL,
};
use log::{debug, error, info, warn};
use rand::Rng;
use std::path::Path;

/// Largest impulse a shot may apply, in N·s.
pub const MAX_IMPULSE: f32 = 1.0;
/// Seconds before an idle player is reported. Advisory only.
pub const TURN_TIME: f32 = 20.0;
/// Seconds the result is shown before returning to the lobby.
pub const SUMMARY_DURATION: f32 = 6.0;
pub const ERROR_RETURN_DELAY: f32 = 2.0;
/// Longest wait for clients to finish their turn change animation.
pub const TURN_READY_TIMEOUT: f32 = 3.0;

/// Loads and checks everything a match needs from the asset directory.
pub fn validate_data(
    asset_dir: &Path,
    table: &str,
) -> Result<(TableData, CollisionMesh), SessionError> {
    let data = TableData::load(asset_dir, table)?;
    data.validate()?;
    let mesh = CollisionMesh::load(asset_dir, &data.collision)?;
    Ok((data, mesh))
}

struct Game {
    table: BilliardsSystem,
    director: Box<dyn Director>,
    events: EventQueue,
    seats: [(u8, u8); 2],
}

impl Game {
    fn build(shared: &SharedData) -> Result<Self, SessionError> {
        let (data, mesh) = validate_data(&shared.asset_dir, &shared.table)?;

        let first_player = shared
            .first_player
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..2));
        let mut director = data
            .ruleset
            .create_director(first_player)
            .ok_or(SessionError::NoDirector(data.ruleset))?;

        let mut table = BilliardsSystem::default();
        table.init_table(&data, &mesh)?;
        for ball in director.ball_layout().to_vec() {
            table.add_ball(ball.position, ball.id)?;
        }
        let cueball = table.add_ball(director.cueball_position(), CUE_BALL)?;
        director.set_cueball(Some(cueball));

        let mut available = shared
            .clients
            .connected()
            .flat_map(|(slot, c)| (0..c.player_count).map(move |player| (slot, player)));
        let first = available.next().unwrap_or((0, 0));
        let second = available.next().unwrap_or(first);
        let seats = [first, second];
        director.set_seats(seats);

        info!(
            "Match on {} ({:?}), seats {:?}, player {} breaks",
            data.name, data.ruleset, seats, first_player
        );
        Ok(Self {
            table,
            director,
            events: EventQueue::new(),
            seats,
        })
    }

    fn current_seat(&self) -> (u8, u8) {
        self.seats[self.director.current_player()]
    }
}

pub struct BilliardsState {
    /// `None` when the table could not be loaded.
    game: Option<Game>,
    /// Session time in seconds.
    clock: f32,
    error_timer: f32,
    game_started: bool,
    shot_active: bool,
    turn_open: bool,
    turn_ready_wait: Option<f32>,
    turn_timer: f32,
    turn_warned: bool,
    summary: Option<f32>,
    game_ended: bool,
    next: StateId,
}

impl BilliardsState {
    pub fn new(shared: &mut SharedData) -> Self {
        shared.check_thread();
        shared.clients.reset_flags();

        let game = match Game::build(shared) {
            Ok(game) => Some(game),
            Err(e) => {
                error!("Unable to start match on {}: {}", shared.table, e);
                None
            }
        };

        Self {
            game,
            clock: 0.0,
            error_timer: 0.0,
            game_started: false,
            shot_active: false,
            turn_open: false,
            turn_ready_wait: None,
            turn_timer: 0.0,
            turn_warned: false,
            summary: None,
            game_ended: false,
            next: StateId::Billiards,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.game.is_none()
    }

    pub fn game_ended(&self) -> bool {
        self.game_ended
    }

    pub fn shot_active(&self) -> bool {
        self.shot_active
    }

    pub fn turn_open(&self) -> bool {
        self.turn_open
    }

    pub fn current_player(&self) -> Option<usize> {
        self.game.as_ref().map(|g| g.director.current_player())
    }

    pub fn director(&self) -> Option<&dyn Director> {
        self.game.as_ref().map(|g| g.director.as_ref())
    }

    pub fn table(&self) -> Option<&BilliardsSystem> {
        self.game.as_ref().map(|g| &g.table)
    }

    fn timestamp(&self) -> u32 {
        (self.clock * 1000.0) as u32
    }

    /// True if `slot` may act for the current player right now.
    fn authorised(&self, slot: u8, client_id: u8, player_id: u8) -> bool {
        let Some(game) = &self.game else {
            return false;
        };
        self.game_started
            && self.turn_open
            && !self.game_ended
            && slot == client_id
            && game.current_seat() == (client_id, player_id)
    }

    fn send_bootstrap(&self, shared: &mut SharedData, peer: PeerId) {
        let Some(game) = &self.game else {
            shared.send_peer(
                peer,
                &Packet::ServerError(RejectReason::MapNotFound),
                NetFlag::Reliable,
            );
            return;
        };

        for info in game.table.ball_infos(self.timestamp()) {
            shared.send_peer(peer, &Packet::ActorSpawn(info), NetFlag::Reliable);
        }
        let table_info = TableInfo {
            cueball_position: game.director.cueball_position(),
            spawn_area: game.table.spawn_area().to_array(),
        };
        shared.send_peer(peer, &Packet::TableInfo(table_info), NetFlag::Reliable);

        if self.game_started {
            let current = game.director.player_info(game.director.current_player());
            shared.send_peer(peer, &Packet::SetPlayer(current), NetFlag::Reliable);
        }
    }

    fn take_shot(&mut self, slot: u8, update: BilliardsUpdate) {
        if !self.authorised(slot, update.client_id, update.player_id) {
            debug!(
                "Rejected shot from client {} for seat ({}, {})",
                slot, update.client_id, update.player_id
            );
            return;
        }
        let Some(game) = &mut self.game else {
            return;
        };

        if !update.impulse.is_finite() || !update.offset.is_finite() {
            debug!("Dropping non-finite shot from client {}", slot);
            return;
        }
        let impulse = update.impulse.clamp_length(MAX_IMPULSE);
        let offset = update.offset.clamp_length(BALL_RADIUS);
        if game.table.apply_impulse(impulse, offset) {
            game.events.push(BilliardsEvent::TurnBegan);
            self.shot_active = true;
            self.turn_open = false;
        }
    }

    fn place_ball(&mut self, shared: &mut SharedData, slot: u8, placement: BallPlacement) {
        if !self.authorised(slot, placement.client_id, placement.player_id) {
            debug!("Rejected placement from client {}", slot);
            return;
        }
        let timestamp = self.timestamp();
        let Some(game) = &mut self.game else {
            return;
        };
        if game.table.has_cueball() {
            debug!("Ignoring placement, the cue ball is on the table");
            return;
        }

        let requested = placement.position;
        if !game.table.spawn_area().contains(requested.x, requested.z) {
            debug!("Placement {:?} outside the spawn area, clamping", requested);
        }
        let position = game.table.clamp_to_spawn(requested);
        match game.table.add_ball(position, CUE_BALL) {
            Ok(server_id) => {
                game.director.set_cueball(Some(server_id));
                if let Some(ball) = game.table.cueball() {
                    let info = ball.actor_info(timestamp);
                    shared.broadcast(&Packet::ActorSpawn(info), NetFlag::Reliable);
                }
            }
            Err(e) => warn!("Failed to place cue ball: {}", e),
        }
    }

    fn server_command(&mut self, shared: &mut SharedData, command: ServerCommand, target: u8) {
        let timestamp = self.timestamp();
        let turn_open = self.turn_open;
        let Some(game) = &mut self.game else {
            return;
        };

        match command {
            ServerCommand::SpawnBall => {
                let position = game.table.find_clear_spot(Vec3::new(0.0, BALL_HEIGHT, 0.0));
                match game.table.add_ball(position, target) {
                    Ok(server_id) => {
                        if target == CUE_BALL {
                            game.director.set_cueball(Some(server_id));
                        }
                        let spawned = game.table.balls().iter().find(|b| b.server_id == server_id);
                        if let Some(ball) = spawned {
                            let info = ball.actor_info(timestamp);
                            shared.broadcast(&Packet::ActorSpawn(info), NetFlag::Reliable);
                        }
                    }
                    Err(e) => warn!("Spawn of ball {} failed: {}", target, e),
                }
            }
            ServerCommand::StrikeBall if turn_open => {
                let angle = rand::thread_rng().gen_range(0.0..std::f32::consts::TAU);
                let impulse = Vec3::new(angle.sin(), 0.0, angle.cos()) * (MAX_IMPULSE * 0.5);
                if game.table.apply_impulse(impulse, Vec3::ZERO) {
                    game.events.push(BilliardsEvent::TurnBegan);
                    self.shot_active = true;
                    self.turn_open = false;
                }
            }
            ServerCommand::StrikeBall => debug!("Strike ignored while a shot is in play"),
            ServerCommand::ForceEnd => {
                let winner = game.director.current_player();
                game.events.push(BilliardsEvent::GameEnded {
                    winner,
                    reason: GameEndReason::Forced,
                });
            }
            ServerCommand::KickClient => debug!("Kicking is handled by the lobby"),
        }
    }

    fn announce_turn(&mut self, shared: &mut SharedData) {
        let Some(game) = &self.game else {
            return;
        };
        let current = game.director.player_info(game.director.current_player());
        shared.broadcast(&Packet::SetPlayer(current), NetFlag::Reliable);

        self.turn_open = true;
        self.turn_timer = 0.0;
        self.turn_warned = false;
    }

    fn end_game(&mut self, shared: &mut SharedData, winner: usize, reason: GameEndReason) {
        if self.game_ended {
            return;
        }
        let Some(game) = &self.game else {
            return;
        };

        let info = game.director.player_info(winner);
        info!("Game over, player {} wins ({:?})", winner, reason);
        shared.broadcast(&Packet::GameEnd(info), NetFlag::Reliable);

        self.game_ended = true;
        self.turn_open = false;
        self.turn_ready_wait = None;
        self.summary = Some(0.0);
    }

    /// Feeds queued events to the director and turns its outcomes into packets.
    fn drain_events(&mut self, shared: &mut SharedData) {
        let timestamp = self.timestamp();
        loop {
            let Some(game) = &mut self.game else {
                return;
            };
            let Some(event) = game.events.pop() else {
                break;
            };
            game.director.handle_event(&event, &mut game.events);

            match event {
                BilliardsEvent::Foul(foul) => {
                    info!("Foul: {:?}", foul);
                    shared.broadcast(&Packet::FoulEvent(foul), NetFlag::Reliable);
                }
                BilliardsEvent::TargetAssigned { player, .. } => {
                    let info = game.director.player_info(player);
                    shared.broadcast(&Packet::NotifyPlayer(info), NetFlag::Reliable);
                }
                BilliardsEvent::RespotBall { ball, position } => {
                    let position = game.table.find_clear_spot(position);
                    match game.table.add_ball(position, ball) {
                        Ok(server_id) => {
                            let balls = game.table.balls();
                            if let Some(b) = balls.iter().find(|b| b.server_id == server_id) {
                                let info = b.actor_info(timestamp);
                                shared.broadcast(&Packet::ActorSpawn(info), NetFlag::Reliable);
                            }
                        }
                        Err(e) => warn!("Failed to respot ball {}: {}", ball, e),
                    }
                }
                BilliardsEvent::RemoveCueball => {
                    game.table.remove_cueball();
                    game.director.set_cueball(None);
                }
                BilliardsEvent::PlayerSwitched { .. } => {
                    for player in 0..2 {
                        let info = game.director.player_info(player);
                        shared.broadcast(&Packet::NotifyPlayer(info), NetFlag::Reliable);
                    }
                    reset_turn_ready(shared);
                    self.turn_ready_wait = Some(0.0);
                }
                BilliardsEvent::GameEnded { winner, reason } => {
                    self.end_game(shared, winner, reason);
                }
                BilliardsEvent::TurnBegan
                | BilliardsEvent::TurnEnded
                | BilliardsEvent::Collision { .. }
                | BilliardsEvent::Pocket { .. }
                | BilliardsEvent::OutOfBounds { .. } => {}
            }
        }

        let Some(game) = &mut self.game else {
            return;
        };
        for server_id in game.table.take_removed() {
            if game.director.cueball() == Some(server_id) {
                game.director.set_cueball(None);
            }
            shared.broadcast(&Packet::EntityRemoved(server_id), NetFlag::Reliable);
        }
    }
}

fn reset_turn_ready(shared: &mut SharedData) {
    let slots: Vec<u8> = shared.clients.connected().map(|(slot, _)| slot).collect();
    for slot in slots {
        if let Some(client) = shared.clients.get_mut(slot) {
            client.turn_ready = false;
        }
    }
}

impl SessionState for BilliardsState {
    fn state_id(&self) -> StateId {
        StateId::Billiards
    }

    fn handle_connection(&mut self, shared: &mut SharedData, event: ConnectionEvent) {
        let ConnectionEvent::Disconnected(slot) = event else {
            return;
        };

        if shared.clients.is_empty() {
            info!("Everyone left the match");
            self.next = StateId::Lobby;
            return;
        }
        if self.game_ended {
            return;
        }
        let Some(game) = &self.game else {
            return;
        };

        let left = game.seats.iter().any(|&(client, _)| client == slot);
        if !left {
            return;
        }
        match game.seats.iter().position(|&(client, _)| client != slot) {
            Some(winner) => self.end_game(shared, winner, GameEndReason::OpponentLeft),
            None => {
                info!("Both seats belonged to client {}, returning to lobby", slot);
                self.next = StateId::Lobby;
            }
        }
    }

    fn net_event(&mut self, shared: &mut SharedData, peer: PeerId, packet: Packet) {
        shared.check_thread();
        let Some(slot) = shared.clients.find_client_by_peer(peer) else {
            return;
        };

        match packet {
            Packet::ClientReady(_) => {
                if let Some(client) = shared.clients.get_mut(slot) {
                    client.ready = true;
                }
                self.send_bootstrap(shared, peer);
            }
            Packet::TransitionComplete(_) => {
                if let Some(client) = shared.clients.get_mut(slot) {
                    client.map_loaded = true;
                }
            }
            Packet::InputUpdate(update) => self.take_shot(slot, update),
            Packet::BallPlaced(placement) => self.place_ball(shared, slot, placement),
            Packet::TurnReady(_) => {
                if let Some(client) = shared.clients.get_mut(slot) {
                    client.turn_ready = true;
                }
            }
            Packet::ReadyQuit(_) if self.game_ended => {
                if let Some(client) = shared.clients.get_mut(slot) {
                    client.ready_quit = true;
                }
                let mask = shared.clients.mask(|c| c.ready_quit);
                shared.broadcast(&Packet::ReadyQuitStatus(mask), NetFlag::Reliable);
                if shared.clients.all(|c| c.ready_quit) {
                    self.next = StateId::Lobby;
                }
            }
            Packet::ServerCommand { command, target } if shared.is_host(peer) => {
                self.server_command(shared, command, target);
            }
            other => debug!("Match ignoring {:?} from client {}", other, slot),
        }
    }

    fn net_broadcast(&mut self, shared: &mut SharedData) {
        let timestamp = self.timestamp();
        let Some(game) = &mut self.game else {
            return;
        };
        for info in game.table.take_updates(timestamp) {
            shared.broadcast(&Packet::ActorUpdate(info), NetFlag::Unreliable);
        }
    }

    fn process(&mut self, shared: &mut SharedData, dt: f32) -> StateId {
        shared.check_thread();
        self.clock += dt;

        if self.game.is_none() {
            self.error_timer += dt;
            if self.error_timer > ERROR_RETURN_DELAY {
                return StateId::Lobby;
            }
            return self.next;
        }
        if shared.clients.is_empty() {
            return StateId::Lobby;
        }

        if !self.game_started
            && shared.clients.all(|c| c.ready)
            && shared.clients.all(|c| c.map_loaded)
        {
            self.game_started = true;
            self.announce_turn(shared);
        }

        if let Some(game) = &mut self.game {
            game.table.step(dt, &mut game.events);
            if self.shot_active && game.table.all_at_rest() {
                self.shot_active = false;
                game.events.push(BilliardsEvent::TurnEnded);
            }
        }
        self.drain_events(shared);

        if let Some(waited) = self.turn_ready_wait.as_mut() {
            *waited += dt;
            let timed_out = *waited > TURN_READY_TIMEOUT;
            if timed_out || shared.clients.all(|c| c.turn_ready) {
                if timed_out {
                    debug!("Turn ready timed out");
                }
                self.turn_ready_wait = None;
                self.announce_turn(shared);
            }
        }

        if self.turn_open {
            self.turn_timer += dt;
            if self.turn_timer > TURN_TIME && !self.turn_warned {
                self.turn_warned = true;
                warn!("Player has not taken a shot for {} seconds", TURN_TIME);
            }
        }

        if let Some(shown) = self.summary.as_mut() {
            *shown += dt;
            if *shown > SUMMARY_DURATION {
                return StateId::Lobby;
            }
        }

        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::shared_with_clients;
    use super::*;
    use crate::network::MemoryTransport;
    use assert_approx_eq::assert_approx_eq;
    use billiards_shared::PlayerInfo;

    const DT: f32 = 0.016;

    fn started_match(
        clients: u32,
        first_player: usize,
    ) -> (BilliardsState, SharedData, MemoryTransport) {
        let (mut shared, transport) = shared_with_clients(clients);
        shared.first_player = Some(first_player);
        let mut state = BilliardsState::new(&mut shared);
        for peer in 1..=clients {
            state.net_event(&mut shared, peer, Packet::ClientReady(0));
            state.net_event(&mut shared, peer, Packet::TransitionComplete(0));
        }
        state.process(&mut shared, DT);
        (state, shared, transport)
    }

    fn shot(client_id: u8, impulse: Vec3) -> Packet {
        Packet::InputUpdate(BilliardsUpdate {
            client_id,
            player_id: 0,
            impulse,
            offset: Vec3::ZERO,
        })
    }

    #[test]
    fn test_missing_table_disables_session() {
        let (mut shared, transport) = shared_with_clients(1);
        shared.table = "no_such_table".to_string();
        let mut state = BilliardsState::new(&mut shared);
        assert!(state.is_disabled());

        state.net_event(&mut shared, 1, Packet::ClientReady(0));
        assert_eq!(
            transport.sent_to(1),
            vec![Packet::ServerError(RejectReason::MapNotFound)]
        );

        let mut next = StateId::Billiards;
        for _ in 0..200 {
            next = state.process(&mut shared, DT);
            if next != StateId::Billiards {
                break;
            }
        }
        assert_eq!(next, StateId::Lobby);
    }

    #[test]
    fn test_ready_sends_rack_and_table_info() {
        let (mut shared, transport) = shared_with_clients(2);
        let mut state = BilliardsState::new(&mut shared);
        state.net_event(&mut shared, 2, Packet::ClientReady(0));

        let sent = transport.sent_to(2);
        let spawns = sent
            .iter()
            .filter(|p| matches!(p, Packet::ActorSpawn(_)))
            .count();
        assert_eq!(spawns, 16);
        assert!(matches!(sent.last(), Some(Packet::TableInfo(_))));
        assert!(transport.sent_to(1).is_empty());
    }

    #[test]
    fn test_first_turn_waits_for_everyone() {
        let (mut shared, transport) = shared_with_clients(2);
        shared.first_player = Some(1);
        let mut state = BilliardsState::new(&mut shared);

        state.net_event(&mut shared, 1, Packet::ClientReady(0));
        state.net_event(&mut shared, 1, Packet::TransitionComplete(0));
        state.process(&mut shared, DT);
        assert!(!state.turn_open());

        state.net_event(&mut shared, 2, Packet::ClientReady(0));
        state.net_event(&mut shared, 2, Packet::TransitionComplete(0));
        transport.take_outbox();
        state.process(&mut shared, DT);
        assert!(state.turn_open());

        let expected = PlayerInfo {
            client: 1,
            player: 0,
            target: billiards_shared::TargetClass::None as u8,
            score: 0,
        };
        assert_eq!(transport.sent_to(1), vec![Packet::SetPlayer(expected)]);
    }

    #[test]
    fn test_shot_from_wrong_seat_ignored() {
        let (mut state, mut shared, _transport) = started_match(2, 0);

        state.net_event(&mut shared, 2, shot(1, Vec3::new(0.0, 0.0, -0.5)));
        assert!(!state.shot_active());
        // Claiming another client's seat
        state.net_event(&mut shared, 2, shot(0, Vec3::new(0.0, 0.0, -0.5)));
        assert!(!state.shot_active());

        let table = state.table().unwrap();
        assert!(table.cueball().unwrap().velocity.length() < crate::billiards::REST_EPSILON);
        assert!(state.turn_open());
    }

    #[test]
    fn test_shot_from_current_player_starts_turn() {
        let (mut state, mut shared, _transport) = started_match(2, 0);

        state.net_event(&mut shared, 1, shot(0, Vec3::new(0.0, 0.0, -50.0)));
        assert!(state.shot_active());
        assert!(!state.turn_open());

        state.process(&mut shared, DT);
        let speed = state.table().unwrap().cueball().unwrap().velocity.length();
        assert!(speed <= MAX_IMPULSE / billiards_shared::BALL_MASS + 0.01);
        assert!(speed > 1.0);

        // A second shot while the balls roll is refused
        state.net_event(&mut shared, 1, shot(0, Vec3::new(0.0, 0.0, -0.5)));
        assert!(state.shot_active());
    }

    fn take_cueball(state: &mut BilliardsState) {
        let game = state.game.as_mut().unwrap();
        game.table.remove_cueball();
        game.director.set_cueball(None);
    }

    fn placement(client_id: u8, x: f32, z: f32) -> Packet {
        Packet::BallPlaced(BallPlacement {
            client_id,
            player_id: 0,
            position: Vec3::new(x, 0.3, z),
        })
    }

    #[test]
    fn test_placement_inside_spawn_area_is_exact() {
        let (mut state, mut shared, transport) = started_match(2, 0);
        take_cueball(&mut state);
        transport.take_outbox();

        // Only the current player may place
        state.net_event(&mut shared, 2, placement(1, 0.1, 0.5));
        assert!(!state.table().unwrap().has_cueball());

        state.net_event(&mut shared, 1, placement(0, 0.1, 0.5));
        let position = state.table().unwrap().cueball_position().unwrap();
        assert_approx_eq!(position.x, 0.1, 1e-6);
        assert_approx_eq!(position.y, BALL_HEIGHT, 1e-6);
        assert_approx_eq!(position.z, 0.5, 1e-6);
        assert!(state.director().unwrap().cueball().is_some());
        assert!(matches!(transport.sent_to(2).last(), Some(Packet::ActorSpawn(_))));
    }

    #[test]
    fn test_placement_outside_spawn_area_is_clamped() {
        let (mut state, mut shared, _transport) = started_match(2, 0);
        take_cueball(&mut state);

        state.net_event(&mut shared, 1, placement(0, 2.0, -3.0));
        let position = state.table().unwrap().cueball_position().unwrap();
        assert_approx_eq!(position.x, 0.45, 1e-5);
        assert_approx_eq!(position.z, 0.25, 1e-5);

        // A second placement while the cue ball is down is ignored
        state.net_event(&mut shared, 1, placement(0, 0.0, 0.6));
        let again = state.table().unwrap().cueball_position().unwrap();
        assert_approx_eq!(again.x, 0.45, 1e-5);
    }

    #[test]
    fn test_non_finite_placement_lands_in_spawn_area() {
        let (mut state, mut shared, transport) = started_match(2, 0);
        take_cueball(&mut state);
        transport.take_outbox();

        state.net_event(&mut shared, 1, placement(0, f32::NAN, f32::NAN));
        let position = state.table().unwrap().cueball_position().unwrap();
        assert!(position.is_finite());
        assert_approx_eq!(position.x, 0.0, 1e-5);
        assert_approx_eq!(position.z, 0.6, 1e-5);
        assert!(matches!(transport.sent_to(2).last(), Some(Packet::ActorSpawn(_))));
    }

    #[test]
    fn test_non_finite_shot_dropped() {
        let (mut state, mut shared, _transport) = started_match(2, 0);

        state.net_event(&mut shared, 1, shot(0, Vec3::new(f32::INFINITY, 0.0, 0.0)));
        state.net_event(&mut shared, 1, shot(0, Vec3::new(0.0, f32::NAN, -0.5)));
        let spin = Packet::InputUpdate(BilliardsUpdate {
            client_id: 0,
            player_id: 0,
            impulse: Vec3::new(0.0, 0.0, -0.5),
            offset: Vec3::new(f32::NAN, 0.0, 0.0),
        });
        state.net_event(&mut shared, 1, spin);
        assert!(!state.shot_active());
        assert!(state.turn_open());

        state.process(&mut shared, DT);
        let cueball = state.table().unwrap().cueball().unwrap();
        assert!(cueball.position.is_finite());
        assert!(cueball.velocity.length() < crate::billiards::REST_EPSILON);

        // The turn is still playable
        state.net_event(&mut shared, 1, shot(0, Vec3::new(0.0, 0.0, -0.5)));
        assert!(state.shot_active());
    }

    #[test]
    fn test_disconnect_of_opponent_ends_game() {
        let (mut state, mut shared, transport) = started_match(2, 0);
        transport.take_outbox();

        shared.clients.remove_client(2);
        state.handle_connection(&mut shared, ConnectionEvent::Disconnected(1));
        assert!(state.game_ended());

        let ended: Vec<_> = transport
            .sent_to(1)
            .into_iter()
            .filter(|p| matches!(p, Packet::GameEnd(_)))
            .collect();
        assert_eq!(ended.len(), 1);
        assert!(matches!(ended[0], Packet::GameEnd(PlayerInfo { client: 0, .. })));

        let mut next = StateId::Billiards;
        let mut elapsed = 0.0;
        while next == StateId::Billiards && elapsed < SUMMARY_DURATION + 1.0 {
            next = state.process(&mut shared, DT);
            elapsed += DT;
        }
        assert_eq!(next, StateId::Lobby);
        assert!(elapsed > SUMMARY_DURATION);
    }

    #[test]
    fn test_ready_quit_returns_to_lobby_when_all_ready() {
        let (mut state, mut shared, transport) = started_match(2, 0);

        state.net_event(&mut shared, 1, Packet::ReadyQuit(0));
        assert!(transport.sent_to(1).iter().all(|p| !matches!(p, Packet::ReadyQuitStatus(_))));

        state.net_event(
            &mut shared,
            1,
            Packet::ServerCommand {
                command: ServerCommand::ForceEnd,
                target: 0,
            },
        );
        assert_eq!(state.process(&mut shared, DT), StateId::Billiards);
        assert!(state.game_ended());

        transport.take_outbox();
        state.net_event(&mut shared, 1, Packet::ReadyQuit(0));
        assert_eq!(transport.sent_to(2), vec![Packet::ReadyQuitStatus(0b01)]);
        state.net_event(&mut shared, 2, Packet::ReadyQuit(0));
        assert_eq!(state.process(&mut shared, DT), StateId::Lobby);
    }
}
