use super::{
    rack_triangle, spot, BallInfo, BilliardsEvent, Director, EventQueue, GameEndReason, Seats,
    TurnSignal, TurnState,
};
use billiards_shared::{FoulType, PlayerInfo, TargetClass, Vec3, CUE_BALL};
use log::info;

const RACK: [u8; 15] = [1, 11, 5, 2, 8, 10, 9, 7, 14, 4, 6, 15, 13, 3, 12];
const CLASS_SIZE: u8 = 7;

pub struct EightballDirector {
    layout: Vec<BallInfo>,
    seats: Seats,
    classes: [TargetClass; 2],
    /// Cleared spots and stripes, in that order.
    pot_count: [u8; 2],
    on_table: Vec<u8>,
    turn: TurnState,
    forfeit: bool,
    free_table: bool,
    cueball: Option<u32>,
    ended: bool,
}

impl EightballDirector {
    pub fn new(first_player: usize) -> Self {
        let mut seats = Seats::new(first_player);
        for info in seats.players.iter_mut() {
            info.target = TargetClass::None as u8;
        }

        Self {
            layout: rack_triangle(spot(0.0, 0.0935 - 0.465), &RACK, 5),
            seats,
            classes: [TargetClass::None; 2],
            pot_count: [0; 2],
            on_table: RACK.to_vec(),
            turn: TurnState::default(),
            forfeit: false,
            free_table: false,
            cueball: None,
            ended: false,
        }
    }

    fn target(&self, player: usize) -> TargetClass {
        match self.seats.players[player].target {
            0 => TargetClass::Spots,
            1 => TargetClass::Stripes,
            2 => TargetClass::Eightball,
            _ => TargetClass::None,
        }
    }

    fn clear_ball(&mut self, ball: u8) {
        self.on_table.retain(|&id| id != ball);
        match TargetClass::of_ball(ball) {
            TargetClass::Spots => self.pot_count[0] += 1,
            TargetClass::Stripes => self.pot_count[1] += 1,
            _ => {}
        }
    }

    fn class_count(&self, class: TargetClass) -> u8 {
        match class {
            TargetClass::Spots => self.pot_count[0],
            TargetClass::Stripes => self.pot_count[1],
            _ => 0,
        }
    }

    fn assign_classes(&mut self, shooter: usize, side_effects: &mut Vec<BilliardsEvent>) {
        let shooter_class = if self.pot_count[1] > self.pot_count[0] {
            TargetClass::Stripes
        } else {
            TargetClass::Spots
        };
        let other_class = match shooter_class {
            TargetClass::Spots => TargetClass::Stripes,
            _ => TargetClass::Spots,
        };

        self.classes[shooter] = shooter_class;
        self.classes[(shooter + 1) % 2] = other_class;
        info!(
            "Player {} takes {:?}, player {} takes {:?}",
            shooter,
            shooter_class,
            (shooter + 1) % 2,
            other_class
        );

        for player in 0..2 {
            self.seats.players[player].target = self.classes[player] as u8;
            side_effects.push(BilliardsEvent::TargetAssigned {
                player,
                target: self.classes[player] as u8,
            });
        }
    }

    fn update_targets(&mut self) {
        for player in 0..2 {
            let class = self.classes[player];
            if class == TargetClass::None {
                continue;
            }
            let cleared = self.class_count(class).min(CLASS_SIZE);
            self.seats.players[player].score = cleared;
            if cleared >= CLASS_SIZE {
                self.seats.players[player].target = TargetClass::Eightball as u8;
            }
        }
    }

    fn summarise_turn(&mut self, events: &mut EventQueue) {
        let shooter = self.seats.current;
        let opponent = self.seats.opponent();
        let target = self.target(shooter);
        let degraded = target != TargetClass::None && self.target_id() == 0;
        let pots = self.turn.pots.clone();

        let mut foul = self.turn.foul;
        let mut forfeit = std::mem::take(&mut self.forfeit);
        let mut eight_potted = false;

        let first = self.turn.first_collision;
        if first == CUE_BALL {
            foul = Some(FoulType::NoBallHit);
        } else {
            let status = TargetClass::of_ball(first);
            if status != target
                && (target != TargetClass::None || status == TargetClass::Eightball)
                && !self.free_table
                && !degraded
            {
                foul = Some(FoulType::WrongBallHit);
            }
        }

        for &id in &pots {
            if id == CUE_BALL {
                foul = Some(FoulType::CueBallPot);
                continue;
            }

            let status = TargetClass::of_ball(id);
            if status != TargetClass::Eightball {
                self.clear_ball(id);
                if target != TargetClass::None
                    && target != status
                    && !self.free_table
                    && !degraded
                {
                    foul = Some(FoulType::WrongBallPot);
                }
            } else {
                self.on_table.retain(|&b| b != id);
                if target == TargetClass::Eightball {
                    eight_potted = true;
                } else {
                    forfeit = true;
                }
            }
        }

        let mut side_effects = Vec::new();
        if target == TargetClass::None
            && pots.iter().any(|&id| id != CUE_BALL)
            && foul.is_none()
            && !forfeit
        {
            self.assign_classes(shooter, &mut side_effects);
        }
        self.update_targets();

        let terminal = if forfeit {
            self.ended = true;
            BilliardsEvent::GameEnded {
                winner: opponent,
                reason: GameEndReason::Forfeit,
            }
        } else if eight_potted {
            self.ended = true;
            if foul.is_some() || pots.last() != Some(&8) {
                BilliardsEvent::GameEnded {
                    winner: opponent,
                    reason: GameEndReason::Forfeit,
                }
            } else {
                BilliardsEvent::GameEnded {
                    winner: shooter,
                    reason: GameEndReason::Win,
                }
            }
        } else {
            let potted_any = pots.iter().any(|&id| id != CUE_BALL);
            if foul.is_some() || (!potted_any && !self.free_table) {
                self.seats.switch();
            }
            if foul.is_some() {
                side_effects.push(BilliardsEvent::RemoveCueball);
                side_effects.push(BilliardsEvent::Foul(FoulType::FreeTable));
            }
            BilliardsEvent::PlayerSwitched {
                player: self.seats.current,
            }
        };

        self.free_table = foul.is_some();
        self.turn.finish(foul, side_effects, terminal, events);
    }
}

impl Director for EightballDirector {
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

        match self.turn.observe(event, events) {
            TurnSignal::OffTable(8) => {
                self.on_table.retain(|&id| id != 8);
                self.forfeit = true;
            }
            TurnSignal::OffTable(CUE_BALL) | TurnSignal::None => {}
            TurnSignal::OffTable(ball) => self.clear_ball(ball),
            TurnSignal::Ended => self.summarise_turn(events),
        }
    }

    fn current_player(&self) -> usize {
        self.seats.current
    }

    fn target_id(&self) -> u8 {
        let target = self.target(self.seats.current);
        self.on_table
            .iter()
            .copied()
            .filter(|&id| target != TargetClass::None && TargetClass::of_ball(id) == target)
            .min()
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

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn terminal_count(events: &[BilliardsEvent]) -> usize {
        events.iter().filter(|e| is_terminal(e)).count()
    }

    #[test]
    fn test_rack_layout() {
        let director = EightballDirector::new(0);
        let layout = director.ball_layout();
        assert_eq!(layout.len(), 15);
        assert_eq!(layout[0].id, 1);
        assert_eq!(layout[4].id, 8);
        assert!((layout[0].position.z + 0.3715).abs() < 1e-5);
        assert_eq!(director.cueball_position(), spot(0.0, 0.57));
    }

    #[test]
    fn test_first_legal_pot_assigns_spots_and_continues() {
        let mut director = EightballDirector::new(0);
        let events = play_turn(&mut director, &[hit(CUE_BALL, 1), pot(1)]);

        assert_eq!(director.current_player(), 0);
        assert_eq!(director.player_info(0).target, TargetClass::Spots as u8);
        assert_eq!(director.player_info(1).target, TargetClass::Stripes as u8);
        assert_eq!(director.score(0), 1);
        assert_eq!(
            events,
            vec![
                BilliardsEvent::TargetAssigned {
                    player: 0,
                    target: TargetClass::Spots as u8
                },
                BilliardsEvent::TargetAssigned {
                    player: 1,
                    target: TargetClass::Stripes as u8
                },
                BilliardsEvent::PlayerSwitched { player: 0 },
            ]
        );
    }

    #[test]
    fn test_more_stripes_assigns_stripes() {
        let mut director = EightballDirector::new(1);
        play_turn(&mut director, &[hit(CUE_BALL, 9), pot(9), pot(10), pot(2)]);

        assert_eq!(director.current_player(), 1);
        assert_eq!(director.player_info(1).target, TargetClass::Stripes as u8);
        assert_eq!(director.player_info(0).target, TargetClass::Spots as u8);
    }

    #[test]
    fn test_no_ball_hit_is_foul_and_switches() {
        let mut director = EightballDirector::new(0);
        let events = play_turn(&mut director, &[]);

        assert_eq!(
            events,
            vec![
                BilliardsEvent::Foul(FoulType::NoBallHit),
                BilliardsEvent::RemoveCueball,
                BilliardsEvent::Foul(FoulType::FreeTable),
                BilliardsEvent::PlayerSwitched { player: 1 },
            ]
        );
        assert_eq!(director.current_player(), 1);
    }

    #[test]
    fn test_free_table_after_foul() {
        let mut director = EightballDirector::new(0);
        play_turn(&mut director, &[hit(CUE_BALL, 1), pot(1)]);
        // Player 0 has spots and hits a stripe first
        let events = play_turn(&mut director, &[hit(CUE_BALL, 12)]);
        assert_eq!(events[0], BilliardsEvent::Foul(FoulType::WrongBallHit));
        assert_eq!(director.current_player(), 1);

        // Player 1 on a free table may hit a spot first and miss without losing the table
        let events = play_turn(&mut director, &[hit(CUE_BALL, 3)]);
        assert_eq!(events, vec![BilliardsEvent::PlayerSwitched { player: 1 }]);
    }

    #[test]
    fn test_free_table_announced_after_foul_only() {
        let mut director = EightballDirector::new(0);
        let events = play_turn(&mut director, &[hit(CUE_BALL, 9), pot(CUE_BALL)]);
        let free_table = BilliardsEvent::Foul(FoulType::FreeTable);
        assert_eq!(events[0], BilliardsEvent::Foul(FoulType::CueBallPot));
        assert_eq!(events.iter().filter(|e| **e == free_table).count(), 1);
        assert_eq!(events.last(), Some(&BilliardsEvent::PlayerSwitched { player: 1 }));

        // A clean miss on the free table hands over without the notice
        let events = play_turn(&mut director, &[hit(CUE_BALL, 2)]);
        assert!(!events.contains(&free_table));
        assert_eq!(events, vec![BilliardsEvent::PlayerSwitched { player: 1 }]);
    }

    #[test]
    fn test_early_eight_forfeits_for_every_ordering() {
        let prior: [&[u8]; 4] = [&[], &[1], &[1, 2, 3], &[2, 6, 7, 5, 3, 1]];
        for legal in prior {
            let mut director = EightballDirector::new(0);
            for &ball in legal {
                play_turn(&mut director, &[hit(CUE_BALL, ball), pot(ball)]);
                assert_eq!(director.current_player(), 0);
            }

            let events = play_turn(&mut director, &[hit(CUE_BALL, 4), pot(4), pot(8)]);
            assert_eq!(terminal_count(&events), 1);
            assert_eq!(
                events.last(),
                Some(&BilliardsEvent::GameEnded {
                    winner: 1,
                    reason: GameEndReason::Forfeit
                }),
                "prior pots {:?}",
                legal
            );
            assert!(director.game_over());
        }
    }

    #[test]
    fn test_clearing_class_targets_eight_and_legal_eight_wins() {
        let mut director = EightballDirector::new(0);
        for ball in 1..=7 {
            play_turn(&mut director, &[hit(CUE_BALL, ball), pot(ball)]);
        }
        assert_eq!(director.player_info(0).target, TargetClass::Eightball as u8);
        assert_eq!(director.target_id(), 8);

        let events = play_turn(&mut director, &[hit(CUE_BALL, 8), pot(8)]);
        assert_eq!(
            events,
            vec![BilliardsEvent::GameEnded {
                winner: 0,
                reason: GameEndReason::Win
            }]
        );
    }

    #[test]
    fn test_eight_with_cue_ball_forfeits() {
        let mut director = EightballDirector::new(0);
        for ball in 1..=7 {
            play_turn(&mut director, &[hit(CUE_BALL, ball), pot(ball)]);
        }

        let events = play_turn(&mut director, &[hit(CUE_BALL, 8), pot(8), pot(CUE_BALL)]);
        assert_eq!(events[0], BilliardsEvent::Foul(FoulType::CueBallPot));
        assert_eq!(
            events[1],
            BilliardsEvent::GameEnded {
                winner: 1,
                reason: GameEndReason::Forfeit
            }
        );
        assert_eq!(terminal_count(&events), 1);
    }

    #[test]
    fn test_eight_off_table_forfeits() {
        let mut director = EightballDirector::new(0);
        let events = play_turn(&mut director, &[hit(CUE_BALL, 1), off_table(8)]);
        assert_eq!(
            events,
            vec![
                BilliardsEvent::Foul(FoulType::OffTable),
                BilliardsEvent::GameEnded {
                    winner: 1,
                    reason: GameEndReason::Forfeit
                },
            ]
        );
    }

    #[test]
    fn test_off_table_ball_counts_for_its_own_class() {
        let mut director = EightballDirector::new(0);
        play_turn(&mut director, &[hit(CUE_BALL, 1), pot(1)]);
        let events = play_turn(&mut director, &[hit(CUE_BALL, 2), off_table(3)]);

        assert_eq!(events[0], BilliardsEvent::Foul(FoulType::OffTable));
        assert_eq!(director.score(0), 2);
        assert_eq!(director.score(1), 0);
        assert_eq!(director.current_player(), 1);
    }

    #[test]
    fn test_events_after_game_end_ignored() {
        let mut director = EightballDirector::new(0);
        play_turn(&mut director, &[hit(CUE_BALL, 1), pot(8)]);
        assert!(director.game_over());

        let events = play_turn(&mut director, &[hit(CUE_BALL, 2), pot(2)]);
        assert!(events.is_empty());
    }
}
