//! The billiards world: balls, pockets and the events raised while the
//! physics engine moves them.

use crate::director::{BilliardsEvent, EventQueue};
use crate::error::PhysicsError;
use crate::physics::{
    BodyDesc, BodyHandle, BodyKind, Contact, Hole, PhysicsEngine, SimpleEngine, StaticGeometry,
};
use crate::table::{CollisionMesh, Rect, TableData};
use billiards_shared::{
    compress_quat, compress_velocity, ActorInfo, Quat, Vec3, BALL_HEIGHT, BALL_MASS, BALL_RADIUS,
    CUE_BALL,
};
use log::{debug, info, warn};
use rand::Rng;
use std::collections::BTreeSet;

/// Steps a ball must spend inside a pocket before it counts as potted.
pub const POCKET_CONFIRM_FRAMES: u32 = 3;
pub const OUT_OF_BOUNDS_DEPTH: f32 = 2.0;
pub const POCKET_DEPTH: f32 = 0.2;
pub const REST_EPSILON: f32 = 0.01;

#[derive(Debug, Clone)]
pub struct Ball {
    pub id: u8,
    pub server_id: u32,
    handle: BodyHandle,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    /// Id of the last ball this one started touching.
    pub ball_contact: Option<u8>,
    pub cushion_contact: bool,
    /// Pocket whose volume currently holds the ball.
    pub pocket_contact: Option<usize>,
    pub had_update: bool,
    pocket_frames: u32,
    potted: bool,
    in_pocket_radius: bool,
}

impl Ball {
    pub fn actor_info(&self, timestamp: u32) -> ActorInfo {
        ActorInfo {
            server_id: self.server_id,
            position: self.position,
            velocity: compress_velocity(self.velocity),
            rotation: compress_quat(self.rotation),
            state: self.id,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pocket {
    position: (f32, f32),
    radius: f32,
}

impl Pocket {
    fn horizontal_distance(&self, position: Vec3) -> f32 {
        let dx = position.x - self.position.0;
        let dz = position.z - self.position.1;
        (dx * dx + dz * dz).sqrt()
    }
}

pub struct BilliardsSystem {
    engine: Box<dyn PhysicsEngine>,
    balls: Vec<Ball>,
    pockets: Vec<Pocket>,
    spawn_area: Rect,
    initialised: bool,
    next_server_id: u32,
    /// Ball pairs in contact after the last step, by server id.
    touching: BTreeSet<(u32, u32)>,
    removed: Vec<u32>,
}

impl Default for BilliardsSystem {
    fn default() -> Self {
        Self::new(Box::new(SimpleEngine::new()))
    }
}

impl BilliardsSystem {
    pub fn new(engine: Box<dyn PhysicsEngine>) -> Self {
        Self {
            engine,
            balls: Vec::new(),
            pockets: Vec::new(),
            spawn_area: Rect {
                left: 0.0,
                bottom: 0.0,
                width: 0.0,
                height: 0.0,
            },
            initialised: false,
            next_server_id: 1,
            touching: BTreeSet::new(),
            removed: Vec::new(),
        }
    }

    pub fn init_table(
        &mut self,
        table: &TableData,
        collision: &CollisionMesh,
    ) -> Result<(), PhysicsError> {
        if self.initialised {
            return Err(PhysicsError::AlreadyInitialised);
        }

        self.pockets = table
            .pockets
            .iter()
            .map(|p| Pocket {
                position: p.position,
                radius: p.effective_radius(),
            })
            .collect();

        self.engine.set_static_geometry(StaticGeometry {
            half_extents: collision.half_extents,
            cushion_height: collision.cushion_height,
            cushions: collision.cushions.clone(),
            holes: self
                .pockets
                .iter()
                .map(|p| Hole {
                    centre: p.position,
                    radius: p.radius,
                    depth: POCKET_DEPTH,
                })
                .collect(),
        });

        self.spawn_area = table.spawn_area();
        self.initialised = true;
        info!(
            "Table {} ready with {} pockets and {} cushions",
            table.name,
            self.pockets.len(),
            collision.cushions.len()
        );
        Ok(())
    }

    /// Adds a ball and returns its server id.
    pub fn add_ball(&mut self, position: Vec3, id: u8) -> Result<u32, PhysicsError> {
        if !self.initialised {
            return Err(PhysicsError::NoTable);
        }
        if id == CUE_BALL && self.has_cueball() {
            return Err(PhysicsError::CueballExists);
        }

        let yaw = rand::thread_rng().gen_range(0.0..std::f32::consts::TAU);
        let rotation = Quat::from_axis_angle(Vec3::UP, yaw);
        let handle = self.engine.add_body(BodyDesc {
            kind: BodyKind::Dynamic,
            position,
            rotation,
            radius: BALL_RADIUS,
            mass: BALL_MASS,
        })?;

        let server_id = self.next_server_id;
        self.next_server_id += 1;
        self.balls.push(Ball {
            id,
            server_id,
            handle,
            position,
            rotation,
            velocity: Vec3::ZERO,
            ball_contact: None,
            cushion_contact: false,
            pocket_contact: None,
            had_update: false,
            pocket_frames: 0,
            potted: false,
            in_pocket_radius: false,
        });
        debug!("Added ball {} as {}", id, server_id);
        Ok(server_id)
    }

    pub fn remove_ball(&mut self, server_id: u32) -> bool {
        let Some(index) = self.balls.iter().position(|b| b.server_id == server_id) else {
            return false;
        };

        let ball = self.balls.remove(index);
        self.engine.remove_body(ball.handle);
        self.touching
            .retain(|&(a, b)| a != server_id && b != server_id);
        self.removed.push(server_id);
        true
    }

    /// Removes the cue ball, returning its server id.
    pub fn remove_cueball(&mut self) -> Option<u32> {
        let server_id = self.cueball()?.server_id;
        self.remove_ball(server_id);
        Some(server_id)
    }

    /// Strikes the cue ball. `offset` is the contact point relative to its centre.
    pub fn apply_impulse(&mut self, impulse: Vec3, offset: Vec3) -> bool {
        let Some(handle) = self.cueball().map(|b| b.handle) else {
            warn!("Shot requested without a cue ball on the table");
            return false;
        };
        self.engine.apply_impulse(handle, impulse, offset);
        true
    }

    pub fn step(&mut self, dt: f32, events: &mut EventQueue) {
        let mut contacts = Vec::new();
        self.engine.step(dt, &mut |contact| contacts.push(contact));

        for ball in self.balls.iter_mut() {
            if let Some((position, rotation)) = self.engine.transform(ball.handle) {
                if position != ball.position || rotation != ball.rotation {
                    ball.had_update = true;
                }
                ball.position = position;
                ball.rotation = rotation;
            }
            ball.velocity = self.engine.velocity(ball.handle).unwrap_or(Vec3::ZERO);
            ball.cushion_contact = false;
        }

        self.classify_contacts(contacts, events);
        self.update_pockets(events);
    }

    fn classify_contacts(&mut self, contacts: Vec<Contact>, events: &mut EventQueue) {
        let mut touching = BTreeSet::new();
        for contact in contacts {
            match contact {
                Contact::Body(a, b) => {
                    let (Some(i), Some(j)) = (self.index_of(a), self.index_of(b)) else {
                        continue;
                    };
                    if self.balls[i].potted || self.balls[j].potted {
                        continue;
                    }

                    let (first, second) = (self.balls[i].id, self.balls[j].id);
                    let (sa, sb) = (self.balls[i].server_id, self.balls[j].server_id);
                    let key = (sa.min(sb), sa.max(sb));
                    touching.insert(key);
                    if !self.touching.contains(&key) {
                        self.balls[i].ball_contact = Some(second);
                        self.balls[j].ball_contact = Some(first);
                        events.push(BilliardsEvent::Collision { first, second });
                    }
                }
                Contact::Cushion(handle) => {
                    if let Some(i) = self.index_of(handle) {
                        self.balls[i].cushion_contact = true;
                    }
                }
            }
        }
        self.touching = touching;
    }

    fn update_pockets(&mut self, events: &mut EventQueue) {
        let pockets = &self.pockets;
        let mut lost = Vec::new();

        for ball in self.balls.iter_mut() {
            let y = ball.position.y;
            if y >= 0.0 {
                ball.in_pocket_radius = pockets
                    .iter()
                    .any(|p| p.horizontal_distance(ball.position) < p.radius);
                ball.pocket_contact = None;
                ball.pocket_frames = 0;
            } else if !ball.potted {
                let inside = pockets.iter().position(|p| {
                    p.horizontal_distance(ball.position) < p.radius && y > -POCKET_DEPTH
                });
                match inside {
                    Some(pocket) if ball.pocket_contact == Some(pocket) => ball.pocket_frames += 1,
                    Some(pocket) => {
                        ball.pocket_contact = Some(pocket);
                        ball.pocket_frames = 1;
                    }
                    None => {
                        ball.pocket_contact = None;
                        ball.pocket_frames = 0;
                    }
                }

                if let Some(pocket) = ball.pocket_contact {
                    if ball.pocket_frames >= POCKET_CONFIRM_FRAMES {
                        ball.potted = true;
                        info!("Ball {} in pocket {}", ball.id, pocket);
                        events.push(BilliardsEvent::Pocket {
                            ball: ball.id,
                            pocket,
                        });
                    }
                }
            }

            if y < -OUT_OF_BOUNDS_DEPTH {
                let was_pocket = ball.potted || ball.in_pocket_radius;
                if !was_pocket {
                    info!("Ball {} left the table", ball.id);
                }
                events.push(BilliardsEvent::OutOfBounds {
                    ball: ball.id,
                    was_pocket,
                });
                lost.push(ball.server_id);
            }
        }

        for server_id in lost {
            self.remove_ball(server_id);
        }
    }

    fn index_of(&self, handle: BodyHandle) -> Option<usize> {
        self.balls.iter().position(|b| b.handle == handle)
    }

    pub fn all_at_rest(&self) -> bool {
        self.balls.iter().all(|b| {
            b.velocity.length() < REST_EPSILON && !self.engine.is_active(b.handle)
        })
    }

    pub fn balls(&self) -> &[Ball] {
        &self.balls
    }

    pub fn cueball(&self) -> Option<&Ball> {
        self.balls.iter().find(|b| b.id == CUE_BALL)
    }

    pub fn has_cueball(&self) -> bool {
        self.cueball().is_some()
    }

    pub fn cueball_position(&self) -> Option<Vec3> {
        self.cueball().map(|b| b.position)
    }

    pub fn spawn_area(&self) -> Rect {
        self.spawn_area
    }

    /// Moves a cue ball placement into the spawn area, resting on the surface.
    pub fn clamp_to_spawn(&self, position: Vec3) -> Vec3 {
        let mut position = self.spawn_area.clamp(position);
        position.y = BALL_HEIGHT;
        position
    }

    /// Nearest free spot to `position` along the table's long axis.
    pub fn find_clear_spot(&self, position: Vec3) -> Vec3 {
        let clear = |candidate: Vec3| {
            self.balls
                .iter()
                .all(|b| (b.position - candidate).flat().length() >= BALL_RADIUS * 2.0)
        };

        let step = BALL_RADIUS * 2.1;
        for i in 0..32 {
            let distance = (i / 2 + i % 2) as f32 * step;
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let candidate = Vec3::new(position.x, BALL_HEIGHT, position.z + distance * sign);
            if clear(candidate) {
                return candidate;
            }
        }
        position
    }

    pub fn ball_infos(&self, timestamp: u32) -> Vec<ActorInfo> {
        self.balls.iter().map(|b| b.actor_info(timestamp)).collect()
    }

    /// State of every ball moved since the last call.
    pub fn take_updates(&mut self, timestamp: u32) -> Vec<ActorInfo> {
        self.balls
            .iter_mut()
            .filter(|b| b.had_update)
            .map(|b| {
                b.had_update = false;
                b.actor_info(timestamp)
            })
            .collect()
    }

    /// Server ids removed since the last call.
    pub fn take_removed(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.removed)
    }
}
