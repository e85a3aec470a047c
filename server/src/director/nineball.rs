use super::{
    spot, BallInfo, BilliardsEvent, Director, EventQueue, GameEndReason, Seats, TurnSignal,
    TurnState,
};
use billiards_shared::{FoulType, PlayerInfo, Vec3, CUE_BALL};

const NINE: u8 = 9;

pub struct NineballDirector {
    layout: Vec<BallInfo>,
    seats: Seats,
    on_table: Vec<u8>,
    /// Lowest ball on the table when the current turn began.
    turn_target: u8,
    turn: TurnState,
    cueball: Option<u32>,
    ended: bool,
}

impl NineballDirector {
    pub fn new(first_player: usize) -> Self {
        let mut director = Self {
            layout: diamond_rack(spot(0.0, -0.4)),
            seats: Seats::new(first_player),
            on_table: (1..=NINE).collect(),
            turn_target: 1,
            turn: TurnState::default(),
            cueball: None,
            ended: false,
        };
        director.refresh_targets();
        director
    }

    fn refresh_targets(&mut self) {
        let target = self.target_id();
        for info in self.seats.players.iter_mut() {
            info.target = target;
        }
    }

    fn summarise_turn(&mut self, events: &mut EventQueue) {
        let shooter = self.seats.current;
        let opponent = self.seats.opponent();
        let target = self.turn_target;

        let mut foul = self.turn.foul;
        if self.turn.first_collision == CUE_BALL {
            foul = Some(FoulType::NoBallHit);
        } else if target != 0 && self.turn.first_collision != target {
            foul = Some(FoulType::WrongBallHit);
        }
        if self.turn.cueball_lost() {
            foul = Some(FoulType::CueBallPot);
        }

        let pots: Vec<u8> = self.turn.object_pots().collect();
        self.on_table.retain(|id| !pots.contains(id));

        let nine_potted = pots.contains(&NINE);
        let nine_lost = self.turn.off_table.contains(&NINE);

        let mut side_effects = Vec::new();
        let terminal = if nine_lost || (nine_potted && foul.is_some()) {
            self.ended = true;
            BilliardsEvent::GameEnded {
                winner: opponent,
                reason: GameEndReason::Forfeit,
            }
        } else if nine_potted {
            self.ended = true;
            self.seats.players[shooter].score += pots.len() as u8;
            BilliardsEvent::GameEnded {
                winner: shooter,
                reason: GameEndReason::Win,
            }
        } else {
            if foul.is_some() {
                self.seats.switch();
                side_effects.push(BilliardsEvent::RemoveCueball);
            } else if pots.is_empty() {
                self.seats.switch();
            } else {
                self.seats.players[shooter].score += pots.len() as u8;
            }
            self.refresh_targets();
            BilliardsEvent::PlayerSwitched {
                player: self.seats.current,
            }
        };

        self.turn.finish(foul, side_effects, terminal, events);
    }
}

impl Director for NineballDirector {
    fn ball_layout(&self) -> &[BallInfo] {
        &self.layout
    }

    fn cueball_position(&self) -> Vec3 {
        spot(0.0, 0.57)
    }

    fn handle_event(&mut self, event: &BilliardsEvent, events: &mut EventQueue) {
        if self.ended {
            return;
        }

        if let BilliardsEvent::TurnBegan = event {
            self.turn_target = self.target_id();
        }

        match self.turn.observe(event, events) {
            TurnSignal::OffTable(CUE_BALL) | TurnSignal::None => {}
            TurnSignal::OffTable(ball) => self.on_table.retain(|&id| id != ball),
            TurnSignal::Ended => self.summarise_turn(events),
        }
    }

    fn current_player(&self) -> usize {
        self.seats.current
    }

    fn target_id(&self) -> u8 {
        self.on_table.iter().copied().min().unwrap_or(0)
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

/// Rows of 1, 2, 3, 2, 1 with the one at the apex and the nine in the middle.
fn diamond_rack(apex: Vec3) -> Vec<BallInfo> {
    const ROWS: [&[u8]; 5] = [&[1], &[2, 3], &[4, NINE, 5], &[6, 7], &[8]];
    const DX: f32 = 0.027;
    const DZ: f32 = -0.0468;

    let mut layout = Vec::with_capacity(NINE as usize);
    for (row, ids) in ROWS.iter().enumerate() {
        let start = -DX * (ids.len() as f32 - 1.0);
        for (column, &id) in ids.iter().enumerate() {
            let mut position = apex;
            position.x += start + column as f32 * DX * 2.0;
            position.z += row as f32 * DZ;
            layout.push(BallInfo { position, id });
        }
    }
    layout
}
