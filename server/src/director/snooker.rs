use super::{
    rack_triangle, spot, BallInfo, BilliardsEvent, Director, EventQueue, GameEndReason, Seats,
    TurnSignal, TurnState,
};
use billiards_shared::{FoulType, PlayerInfo, Vec3, CUE_BALL, TARGET_COLOUR, TARGET_RED};
use log::debug;

const RED_COUNT: u8 = 15;
const YELLOW: u8 = 16;
const GREEN: u8 = 17;
const BROWN: u8 = 18;
const BLUE: u8 = 19;
const PINK: u8 = 20;
const BLACK: u8 = 21;

fn is_red(id: u8) -> bool {
    (1..=RED_COUNT).contains(&id)
}

fn is_colour(id: u8) -> bool {
    (YELLOW..=BLACK).contains(&id)
}

fn colour_spot(id: u8) -> Vec3 {
    match id {
        YELLOW => spot(0.15, 0.6),
        GREEN => spot(-0.15, 0.6),
        BROWN => spot(0.0, 0.6),
        BLUE => spot(0.0, 0.0),
        PINK => spot(0.0, -0.5),
        _ => spot(0.0, -0.82),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Red,
    Colour,
    /// Reds are gone, colours are cleared in ascending order.
    Sequence(u8),
}

pub struct SnookerDirector {
    layout: Vec<BallInfo>,
    seats: Seats,
    phase: Phase,
    on_table: Vec<u8>,
    turn: TurnState,
    cueball: Option<u32>,
    ended: bool,
}

impl SnookerDirector {
    pub fn new(first_player: usize) -> Self {
        let reds: Vec<u8> = (1..=RED_COUNT).collect();
        let mut layout = rack_triangle(spot(0.0, -0.554), &reds, 5);
        layout.extend((YELLOW..=BLACK).map(|id| BallInfo {
            position: colour_spot(id),
            id,
        }));

        let mut director = Self {
            layout,
            seats: Seats::new(first_player),
            phase: Phase::Red,
            on_table: (1..=BLACK).collect(),
            turn: TurnState::default(),
            cueball: None,
            ended: false,
        };
        director.refresh_targets();
        director
    }

    fn reds_remain(&self) -> bool {
        self.on_table.iter().any(|&id| is_red(id))
    }

    fn reset_phase(&mut self) {
        self.phase = if self.reds_remain() {
            Phase::Red
        } else {
            let next = self.on_table.iter().copied().min().unwrap_or(BLACK);
            Phase::Sequence(next)
        };
    }

    fn refresh_targets(&mut self) {
        let target = match self.phase {
            Phase::Red => TARGET_RED,
            Phase::Colour => TARGET_COLOUR,
            Phase::Sequence(colour) => colour,
        };
        for info in self.seats.players.iter_mut() {
            info.target = target;
        }
    }

    fn first_hit_legal(&self, first: u8) -> bool {
        match self.phase {
            Phase::Red => is_red(first),
            Phase::Colour => is_colour(first),
            Phase::Sequence(colour) => first == colour,
        }
    }

    fn summarise_turn(&mut self, events: &mut EventQueue) {
        let shooter = self.seats.current;
        let degraded = self.target_id() == 0;
        let pots: Vec<u8> = self.turn.object_pots().collect();

        let mut foul = self.turn.foul;
        let first = self.turn.first_collision;
        if first == CUE_BALL {
            foul = Some(FoulType::NoBallHit);
        } else if !degraded && !self.first_hit_legal(first) {
            foul = Some(FoulType::WrongBallHit);
        }

        match self.phase {
            Phase::Red => {
                if pots.iter().any(|&id| is_colour(id)) {
                    foul = Some(FoulType::WrongBallPot);
                }
            }
            Phase::Colour => {
                let colours = pots.iter().filter(|&&id| is_colour(id)).count();
                if colours > 1 || pots.iter().any(|&id| is_red(id)) {
                    foul = Some(FoulType::WrongBallPot);
                }
            }
            Phase::Sequence(colour) => {
                if pots.iter().any(|&id| id != colour) {
                    foul = Some(FoulType::OutOfSequence);
                }
            }
        }
        if self.turn.cueball_lost() {
            foul = Some(FoulType::CueBallPot);
        }

        // Reds stay down, colours go back unless cleared in sequence
        let mut side_effects = Vec::new();
        let keep_down = matches!(self.phase, Phase::Sequence(_)) && foul.is_none();
        let mut respots: Vec<u8> = self
            .turn
            .off_table
            .iter()
            .copied()
            .filter(|&id| is_colour(id))
            .collect();
        for &id in &pots {
            if is_colour(id) && !keep_down {
                if !respots.contains(&id) {
                    respots.push(id);
                }
            } else {
                self.on_table.retain(|&b| b != id);
            }
        }
        for &id in &self.turn.off_table {
            if is_red(id) {
                self.on_table.retain(|&b| b != id);
            }
        }
        for ball in respots {
            debug!("Respotting colour {}", ball);
            side_effects.push(BilliardsEvent::RespotBall {
                ball,
                position: colour_spot(ball),
            });
        }

        if foul.is_none() && !pots.is_empty() {
            self.seats.players[shooter].score += pots.len() as u8;
            if self.phase == Phase::Red {
                self.phase = Phase::Colour;
            } else {
                self.reset_phase();
            }
        } else {
            self.seats.switch();
            self.reset_phase();
        }

        let terminal = if self.on_table.is_empty() {
            self.ended = true;
            let opponent = (shooter + 1) % 2;
            let winner = if self.score(opponent) > self.score(shooter) {
                opponent
            } else {
                shooter
            };
            BilliardsEvent::GameEnded {
                winner,
                reason: GameEndReason::Win,
            }
        } else {
            self.refresh_targets();
            BilliardsEvent::PlayerSwitched {
                player: self.seats.current,
            }
        };

        self.turn.finish(foul, side_effects, terminal, events);
    }
}

impl Director for SnookerDirector {
    fn ball_layout(&self) -> &[BallInfo] {
        &self.layout
    }

    fn cueball_position(&self) -> Vec3 {
        spot(0.05, 0.65)
    }

    fn handle_event(&mut self, event: &BilliardsEvent, events: &mut EventQueue) {
        if self.ended {
            return;
        }

        match self.turn.observe(event, events) {
            TurnSignal::Ended => self.summarise_turn(events),
            TurnSignal::OffTable(_) | TurnSignal::None => {}
        }
    }

    fn current_player(&self) -> usize {
        self.seats.current
    }

    fn target_id(&self) -> u8 {
        let candidates = self.on_table.iter().copied();
        match self.phase {
            Phase::Red => candidates.filter(|&id| is_red(id)).min(),
            Phase::Colour => candidates.filter(|&id| is_colour(id)).min(),
            Phase::Sequence(colour) => candidates.filter(|&id| id == colour).min(),
        }
        .unwrap_or(0)
    }

    fn score(&self, player: usize) -> u8 {
        self.seats.info(player).score
    }

    fn player_info(&self, player: usize) -> PlayerInfo {
        self.seats.info(player)
    }

    fn set_cueball(&mut self, server_id: Option<u32>) {
        self.cueball = server_id;
    }

    fn cueball(&self) -> Option<u32> {
        self.cueball
    }

    fn set_seats(&mut self, seats: [(u8, u8); 2]) {
        self.seats.assign(seats);
    }

    fn game_over(&self) -> bool {
        self.ended
    }
}
