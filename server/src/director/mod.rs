//! Rule directors turn table events into fouls, scores and turn changes.
//!
//! The table and the session push [`BilliardsEvent`]s into an [`EventQueue`].
//! The session drains it once per step, passing every event to the active
//! [`Director`], which pushes its own outcomes back onto the same queue.

mod eightball;
mod nineball;
mod snooker;

pub use eightball::EightballDirector;
pub use nineball::NineballDirector;
pub use snooker::SnookerDirector;

use crate::table::Ruleset;
use billiards_shared::{FoulType, PlayerInfo, Vec3, BALL_HEIGHT, CUE_BALL};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEndReason {
    Win,
    Forfeit,
    OpponentLeft,
    Forced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BilliardsEvent {
    // Raised by the session and the table
    TurnBegan,
    Collision { first: u8, second: u8 },
    Pocket { ball: u8, pocket: usize },
    OutOfBounds { ball: u8, was_pocket: bool },
    TurnEnded,

    // Raised by directors
    Foul(FoulType),
    TargetAssigned { player: usize, target: u8 },
    /// Marks the start of the next turn, which may belong to the same player.
    PlayerSwitched { player: usize },
    GameEnded { winner: usize, reason: GameEndReason },
    RespotBall { ball: u8, position: Vec3 },
    RemoveCueball,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<BilliardsEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: BilliardsEvent) {
        self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<BilliardsEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = BilliardsEvent> + '_ {
        self.events.drain(..)
    }
}

/// A ball in the opening layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BallInfo {
    pub position: Vec3,
    pub id: u8,
}

pub trait Director {
    fn ball_layout(&self) -> &[BallInfo];
    fn cueball_position(&self) -> Vec3;
    fn handle_event(&mut self, event: &BilliardsEvent, events: &mut EventQueue);
    fn current_player(&self) -> usize;
    /// Lowest numbered ball the current player must play, or 0 if none can be found.
    fn target_id(&self) -> u8;
    fn score(&self, player: usize) -> u8;
    fn player_info(&self, player: usize) -> PlayerInfo;
    fn set_cueball(&mut self, server_id: Option<u32>);
    fn cueball(&self) -> Option<u32>;
    /// Binds director players 0 and 1 to `(client, player)` seats.
    fn set_seats(&mut self, seats: [(u8, u8); 2]);
    fn game_over(&self) -> bool;
}

impl Ruleset {
    /// Returns `None` for rulesets this server cannot referee.
    pub fn create_director(self, first_player: usize) -> Option<Box<dyn Director>> {
        match self {
            Ruleset::Eightball => Some(Box::new(EightballDirector::new(first_player))),
            Ruleset::Nineball => Some(Box::new(NineballDirector::new(first_player))),
            Ruleset::Snooker => Some(Box::new(SnookerDirector::new(first_player))),
            Ruleset::BarBilliards | Ruleset::Void => None,
        }
    }
}

/// The two players of a match and which of them is shooting.
#[derive(Debug, Clone)]
pub struct Seats {
    pub players: [PlayerInfo; 2],
    pub current: usize,
}

impl Seats {
    pub fn new(first_player: usize) -> Self {
        let mut players = [PlayerInfo::default(); 2];
        players[1].player = 1;
        Self {
            players,
            current: first_player % 2,
        }
    }

    pub fn opponent(&self) -> usize {
        (self.current + 1) % 2
    }

    pub fn switch(&mut self) {
        self.current = self.opponent();
    }

    pub fn assign(&mut self, seats: [(u8, u8); 2]) {
        for (info, (client, player)) in self.players.iter_mut().zip(seats) {
            info.client = client;
            info.player = player;
        }
    }

    pub fn info(&self, player: usize) -> PlayerInfo {
        self.players[player % 2]
    }
}

/// What a director must react to after [`TurnState::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    None,
    OffTable(u8),
    Ended,
}

/// Everything seen between `TurnBegan` and `TurnEnded`.
#[derive(Debug, Clone)]
pub struct TurnState {
    pub first_collision: u8,
    pub pots: Vec<u8>,
    pub off_table: Vec<u8>,
    pub foul: Option<FoulType>,
    foul_reported: bool,
}

impl Default for TurnState {
    fn default() -> Self {
        Self {
            first_collision: CUE_BALL,
            pots: Vec::new(),
            off_table: Vec::new(),
            foul: None,
            foul_reported: false,
        }
    }
}

impl TurnState {
    pub fn begin(&mut self) {
        *self = TurnState::default();
    }

    /// Applies the part of the turn state machine shared by every ruleset.
    pub fn observe(&mut self, event: &BilliardsEvent, events: &mut EventQueue) -> TurnSignal {
        match *event {
            BilliardsEvent::TurnBegan => {
                self.begin();
                TurnSignal::None
            }
            BilliardsEvent::Collision { first, second } => {
                self.record_collision(first, second);
                TurnSignal::None
            }
            BilliardsEvent::Pocket { ball, .. } => {
                if !self.pots.contains(&ball) {
                    self.pots.push(ball);
                }
                TurnSignal::None
            }
            BilliardsEvent::OutOfBounds {
                ball,
                was_pocket: false,
            } => {
                self.off_table.push(ball);
                self.foul = Some(FoulType::OffTable);
                if !self.foul_reported {
                    self.foul_reported = true;
                    events.push(BilliardsEvent::Foul(FoulType::OffTable));
                }
                TurnSignal::OffTable(ball)
            }
            BilliardsEvent::TurnEnded => TurnSignal::Ended,
            _ => TurnSignal::None,
        }
    }

    fn record_collision(&mut self, first: u8, second: u8) {
        if self.first_collision != CUE_BALL
            || self.pots.contains(&first)
            || self.pots.contains(&second)
        {
            return;
        }
        if first == CUE_BALL {
            self.first_collision = second;
        } else if second == CUE_BALL {
            self.first_collision = first;
        }
    }

    pub fn cueball_lost(&self) -> bool {
        self.pots.contains(&CUE_BALL) || self.off_table.contains(&CUE_BALL)
    }

    /// Object balls potted this turn, in order.
    pub fn object_pots(&self) -> impl Iterator<Item = u8> + '_ {
        self.pots.iter().copied().filter(|&id| id != CUE_BALL)
    }

    /// Pushes the end of turn events: an unreported foul first, then the side
    /// effects, then the single terminal event.
    pub fn finish(
        &mut self,
        foul: Option<FoulType>,
        side_effects: Vec<BilliardsEvent>,
        terminal: BilliardsEvent,
        events: &mut EventQueue,
    ) {
        if let Some(foul) = foul {
            if !self.foul_reported {
                self.foul_reported = true;
                events.push(BilliardsEvent::Foul(foul));
            }
        }
        for event in side_effects {
            events.push(event);
        }
        events.push(terminal);
    }
}

/// Places `ids` in a triangle pointing at `apex`, rows growing towards -z.
pub(crate) fn rack_triangle(apex: Vec3, ids: &[u8], rows: usize) -> Vec<BallInfo> {
    const SPACING: Vec3 = Vec3::new(-0.027, 0.0, -0.0468);

    let mut layout = Vec::with_capacity(ids.len());
    let mut ids = ids.iter().copied();
    let mut row_start = Vec3::ZERO;
    for row in 0..rows {
        for column in 0..=row {
            let Some(id) = ids.next() else {
                return layout;
            };
            let mut position = row_start + apex;
            position.x += column as f32 * -SPACING.x * 2.0;
            layout.push(BallInfo { position, id });
        }
        row_start += SPACING;
    }
    layout
}

pub(crate) fn spot(x: f32, z: f32) -> Vec3 {
    Vec3::new(x, BALL_HEIGHT, z)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_first_collision_only_counts_cue_ball_contacts() {
        let mut turn = TurnState::default();
        let mut queue = EventQueue::new();

        turn.observe(&hit(3, 4), &mut queue);
        assert_eq!(turn.first_collision, CUE_BALL);

        turn.observe(&hit(5, CUE_BALL), &mut queue);
        turn.observe(&hit(CUE_BALL, 2), &mut queue);
        assert_eq!(turn.first_collision, 5);
    }

    #[test]
    fn test_collision_with_potted_ball_ignored() {
        let mut turn = TurnState::default();
        let mut queue = EventQueue::new();

        turn.observe(&pot(6), &mut queue);
        turn.observe(&hit(CUE_BALL, 6), &mut queue);
        assert_eq!(turn.first_collision, CUE_BALL);
    }

    #[test]
    fn test_off_table_foul_reported_once() {
        let mut turn = TurnState::default();
        let mut queue = EventQueue::new();

        let signal = turn.observe(&off_table(4), &mut queue);
        assert_eq!(signal, TurnSignal::OffTable(4));
        turn.observe(&off_table(5), &mut queue);
        turn.finish(
            Some(FoulType::CueBallPot),
            Vec::new(),
            BilliardsEvent::PlayerSwitched { player: 1 },
            &mut queue,
        );

        let events: Vec<_> = queue.drain().collect();
        assert_eq!(
            events,
            vec![
                BilliardsEvent::Foul(FoulType::OffTable),
                BilliardsEvent::PlayerSwitched { player: 1 },
            ]
        );
    }

    #[test]
    fn test_pocketed_out_of_bounds_is_not_a_foul() {
        let mut turn = TurnState::default();
        let mut queue = EventQueue::new();

        let signal = turn.observe(
            &BilliardsEvent::OutOfBounds {
                ball: 3,
                was_pocket: true,
            },
            &mut queue,
        );
        assert_eq!(signal, TurnSignal::None);
        assert!(turn.foul.is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rulesets_without_director() {
        assert!(Ruleset::BarBilliards.create_director(0).is_none());
        assert!(Ruleset::Void.create_director(0).is_none());
        assert!(Ruleset::Eightball.create_director(1).is_some());
    }

    #[test]
    fn test_rack_triangle_rows() {
        let layout = rack_triangle(spot(0.0, -0.5), &[1, 2, 3, 4, 5, 6], 3);
        assert_eq!(layout.len(), 6);
        assert_eq!(layout[0].position, spot(0.0, -0.5));
        assert!((layout[1].position.x + 0.027).abs() < 1e-6);
        assert!((layout[2].position.x - 0.027).abs() < 1e-6);
        assert!((layout[5].position.z + 0.5936).abs() < 1e-5);
    }
}
