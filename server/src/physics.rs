//! Rigid body engine interface and the built-in ball simulation.
//!
//! The billiards world only talks to an engine through [`PhysicsEngine`].
//! [`SimpleEngine`] models spheres on a flat surface with pocket holes,
//! cushion segments, sliding and rolling friction, and sleeping.

use crate::error::PhysicsError;
use crate::table::Segment;
use billiards_shared::{Quat, Vec3};

pub const MAX_BODIES: usize = 64;
pub const GRAVITY: f32 = -9.0;

const BALL_RESTITUTION: f32 = 0.92;
const CUSHION_RESTITUTION: f32 = 0.5;
const HOLE_WALL_RESTITUTION: f32 = 0.3;
const SLIDING_FRICTION: f32 = 0.2;
const ROLLING_RESISTANCE: f32 = 0.015;
const SPIN_DECAY: f32 = 4.0;
const SLIP_EPSILON: f32 = 0.01;
const SLEEP_LINEAR: f32 = 0.005;
const SLEEP_ANGULAR: f32 = 0.2;
const SLEEP_FRAMES: u32 = 8;
const MAX_SUBSTEPS: u32 = 16;

/// Opaque reference to a body owned by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(u32);

/// Dynamic bodies are simulated. Collision only bodies stay where they are
/// put, never push back and only report contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Dynamic,
    CollisionOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub position: Vec3,
    pub rotation: Quat,
    pub radius: f32,
    pub mass: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Contact {
    Body(BodyHandle, BodyHandle),
    Cushion(BodyHandle),
}

/// A hole cut into the playing surface. Balls whose centre passes over it
/// lose the surface's support, and its walls hold them until `depth`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hole {
    pub centre: (f32, f32),
    pub radius: f32,
    pub depth: f32,
}

#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    /// The surface is the plane `y = 0` within these half extents.
    pub half_extents: (f32, f32),
    pub cushion_height: f32,
    pub cushions: Vec<Segment>,
    pub holes: Vec<Hole>,
}

pub trait PhysicsEngine {
    fn set_static_geometry(&mut self, geometry: StaticGeometry);
    fn add_body(&mut self, desc: BodyDesc) -> Result<BodyHandle, PhysicsError>;
    fn remove_body(&mut self, handle: BodyHandle);
    /// Teleports a body and leaves it at rest.
    fn set_transform(&mut self, handle: BodyHandle, position: Vec3, rotation: Quat);
    fn transform(&self, handle: BodyHandle) -> Option<(Vec3, Quat)>;
    fn velocity(&self, handle: BodyHandle) -> Option<Vec3>;
    /// Applies `impulse` at `offset` from the centre of mass.
    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3, offset: Vec3);
    fn is_active(&self, handle: BodyHandle) -> bool;
    /// Advances the simulation, reporting each touching pair once per call.
    fn step(&mut self, dt: f32, on_contact: &mut dyn FnMut(Contact));
}

#[derive(Debug, Clone)]
struct Body {
    kind: BodyKind,
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
    angular: Vec3,
    radius: f32,
    mass: f32,
    awake: bool,
    rest_frames: u32,
}

impl Body {
    fn inertia(&self) -> f32 {
        0.4 * self.mass * self.radius * self.radius
    }

    fn inverse_mass(&self) -> f32 {
        match self.kind {
            BodyKind::Dynamic if self.mass > 0.0 => 1.0 / self.mass,
            _ => 0.0,
        }
    }

    fn simulated(&self) -> bool {
        self.kind == BodyKind::Dynamic && self.awake
    }

    fn wake(&mut self) {
        self.awake = true;
        self.rest_frames = 0;
    }
}

#[derive(Debug, Default)]
pub struct SimpleEngine {
    bodies: Vec<(BodyHandle, Body)>,
    geometry: StaticGeometry,
    next_handle: u32,
}

impl SimpleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, b)| b)
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, b)| b)
    }

    /// Splits `dt` so that no body travels more than half its radius per substep.
    fn required_substeps(&self, dt: f32) -> u32 {
        let (max_speed, min_radius) = self
            .bodies
            .iter()
            .filter(|(_, b)| b.simulated())
            .fold((0.0f32, f32::MAX), |(speed, radius), (_, b)| {
                (speed.max(b.velocity.length()), radius.min(b.radius))
            });

        if max_speed <= 0.0 {
            return 1;
        }

        let max_move = min_radius * 0.5;
        let movement = max_speed * dt;
        if movement > max_move {
            ((movement / max_move).ceil() as u32).min(MAX_SUBSTEPS)
        } else {
            1
        }
    }

    fn integrate(&mut self, h: f32) {
        for (_, body) in self.bodies.iter_mut().filter(|(_, b)| b.simulated()) {
            body.velocity.y += GRAVITY * h;
            body.position += body.velocity * h;
            body.rotation = body.rotation.integrate(body.angular, h);
        }
    }

    fn resolve_surface(&mut self, h: f32) {
        let geometry = &self.geometry;
        for (_, body) in self.bodies.iter_mut().filter(|(_, b)| b.simulated()) {
            let r = body.radius;
            let (x, y, z) = (body.position.x, body.position.y, body.position.z);
            if y < r && y > 0.0 && over_surface(geometry, x, z) {
                body.position.y = r;
                if body.velocity.y < 0.0 {
                    body.velocity.y = 0.0;
                }
                apply_friction(body, h);
            }

            for hole in &geometry.holes {
                let offset = Vec3::new(
                    body.position.x - hole.centre.0,
                    0.0,
                    body.position.z - hole.centre.1,
                );
                let distance = offset.length();
                let y = body.position.y;
                if y >= 0.0 || y <= -hole.depth || distance >= hole.radius + r {
                    continue;
                }

                let limit = (hole.radius - r).max(0.0);
                if distance > limit {
                    let normal = offset.normalize();
                    body.position.x = hole.centre.0 + normal.x * limit;
                    body.position.z = hole.centre.1 + normal.z * limit;
                    let outward = body.velocity.dot(normal);
                    if outward > 0.0 {
                        body.velocity -= normal * (outward * (1.0 + HOLE_WALL_RESTITUTION));
                    }
                }
                break;
            }
        }
    }

    fn resolve_cushions(&mut self, contacts: &mut Vec<Contact>) {
        let height = self.geometry.cushion_height;
        for (handle, body) in self.bodies.iter_mut() {
            if !body.simulated() {
                continue;
            }
            let r = body.radius;
            if body.position.y - r >= height || body.position.y < -r {
                continue;
            }

            for segment in &self.geometry.cushions {
                let centre = (body.position.x, body.position.z);
                let closest = closest_point(segment, centre);
                let dx = centre.0 - closest.0;
                let dz = centre.1 - closest.1;
                let distance = (dx * dx + dz * dz).sqrt();
                if distance >= r || distance < 1e-6 {
                    continue;
                }

                let normal = Vec3::new(dx / distance, 0.0, dz / distance);
                body.position += normal * (r - distance);
                let approach = body.velocity.dot(normal);
                if approach < 0.0 {
                    body.velocity -= normal * (approach * (1.0 + CUSHION_RESTITUTION));
                }
                contacts.push(Contact::Cushion(*handle));
            }
        }
    }

    fn resolve_bodies(&mut self, contacts: &mut Vec<Contact>) {
        let count = self.bodies.len();
        for i in 0..count {
            for j in (i + 1)..count {
                let (left, right) = self.bodies.split_at_mut(j);
                let (ha, a) = &mut left[i];
                let (hb, b) = &mut right[0];

                if !a.simulated() && !b.simulated() {
                    continue;
                }

                let delta = b.position - a.position;
                let distance = delta.length();
                let reach = a.radius + b.radius;
                if distance >= reach || distance < 1e-6 {
                    continue;
                }

                contacts.push(Contact::Body(*ha, *hb));

                let (inv_a, inv_b) = (a.inverse_mass(), b.inverse_mass());
                let total = inv_a + inv_b;
                let passive =
                    a.kind == BodyKind::CollisionOnly || b.kind == BodyKind::CollisionOnly;
                if passive || total <= 0.0 {
                    continue;
                }

                let normal = delta * (1.0 / distance);
                let overlap = reach - distance;
                a.position -= normal * (overlap * inv_a / total);
                b.position += normal * (overlap * inv_b / total);

                let closing = (b.velocity - a.velocity).dot(normal);
                if closing < 0.0 {
                    let impulse = -(1.0 + BALL_RESTITUTION) * closing / total;
                    a.velocity -= normal * (impulse * inv_a);
                    b.velocity += normal * (impulse * inv_b);
                    a.wake();
                    b.wake();
                }
            }
        }
    }

    fn update_sleep(&mut self) {
        for (_, body) in self.bodies.iter_mut().filter(|(_, b)| b.simulated()) {
            if body.velocity.length() < SLEEP_LINEAR && body.angular.length() < SLEEP_ANGULAR {
                body.rest_frames += 1;
                if body.rest_frames >= SLEEP_FRAMES {
                    body.awake = false;
                    body.velocity = Vec3::ZERO;
                    body.angular = Vec3::ZERO;
                }
            } else {
                body.rest_frames = 0;
            }
        }
    }
}

impl PhysicsEngine for SimpleEngine {
    fn set_static_geometry(&mut self, geometry: StaticGeometry) {
        self.geometry = geometry;
    }

    fn add_body(&mut self, desc: BodyDesc) -> Result<BodyHandle, PhysicsError> {
        if self.bodies.len() >= MAX_BODIES {
            return Err(PhysicsError::Exhausted);
        }

        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        self.bodies.push((
            handle,
            Body {
                kind: desc.kind,
                position: desc.position,
                rotation: desc.rotation,
                velocity: Vec3::ZERO,
                angular: Vec3::ZERO,
                radius: desc.radius,
                mass: desc.mass,
                awake: desc.kind == BodyKind::Dynamic,
                rest_frames: 0,
            },
        ));
        Ok(handle)
    }

    fn remove_body(&mut self, handle: BodyHandle) {
        self.bodies.retain(|(h, _)| *h != handle);
    }

    fn set_transform(&mut self, handle: BodyHandle, position: Vec3, rotation: Quat) {
        if let Some(body) = self.body_mut(handle) {
            body.position = position;
            body.rotation = rotation;
            body.velocity = Vec3::ZERO;
            body.angular = Vec3::ZERO;
            if body.kind == BodyKind::Dynamic {
                body.wake();
            }
        }
    }

    fn transform(&self, handle: BodyHandle) -> Option<(Vec3, Quat)> {
        self.body(handle).map(|b| (b.position, b.rotation))
    }

    fn velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.body(handle).map(|b| b.velocity)
    }

    fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3, offset: Vec3) {
        if let Some(body) = self.body_mut(handle) {
            if body.kind != BodyKind::Dynamic {
                return;
            }
            let inertia = body.inertia();
            body.velocity += impulse * (1.0 / body.mass);
            if inertia > 0.0 {
                body.angular += offset.cross(impulse) * (1.0 / inertia);
            }
            body.wake();
        }
    }

    fn is_active(&self, handle: BodyHandle) -> bool {
        self.body(handle).map(|b| b.simulated()).unwrap_or(false)
    }

    fn step(&mut self, dt: f32, on_contact: &mut dyn FnMut(Contact)) {
        let substeps = self.required_substeps(dt);
        let h = dt / substeps as f32;
        let mut contacts = Vec::new();

        for _ in 0..substeps {
            self.integrate(h);
            self.resolve_surface(h);
            self.resolve_cushions(&mut contacts);
            self.resolve_bodies(&mut contacts);
        }
        self.update_sleep();

        contacts.sort();
        contacts.dedup();
        for contact in contacts {
            on_contact(contact);
        }
    }
}

fn over_surface(geometry: &StaticGeometry, x: f32, z: f32) -> bool {
    let (hx, hz) = geometry.half_extents;
    x.abs() <= hx
        && z.abs() <= hz
        && !geometry.holes.iter().any(|hole| {
            let dx = x - hole.centre.0;
            let dz = z - hole.centre.1;
            dx * dx + dz * dz < hole.radius * hole.radius
        })
}

/// Friction between a supported sphere and the cloth.
fn apply_friction(body: &mut Body, h: f32) {
    let lever = Vec3::new(0.0, -body.radius, 0.0);
    let slip = body.velocity.flat() + body.angular.cross(lever);
    let slip_speed = slip.length();
    let g = -GRAVITY;

    if slip_speed > SLIP_EPSILON {
        let max_impulse = SLIDING_FRICTION * body.mass * g * h;
        let stop_impulse = slip_speed * body.mass * 2.0 / 7.0;
        let impulse = slip.normalize() * -max_impulse.min(stop_impulse);
        body.velocity += impulse * (1.0 / body.mass);
        body.angular += lever.cross(impulse) * (1.0 / body.inertia());
    } else {
        let flat = body.velocity.flat();
        let speed = flat.length();
        let slowed = (speed - ROLLING_RESISTANCE * g * h).max(0.0);
        let flat = flat.normalize() * slowed;
        body.velocity.x = flat.x;
        body.velocity.z = flat.z;
        body.angular.x = flat.z / body.radius;
        body.angular.z = -flat.x / body.radius;
    }

    let spin = body.angular.y;
    let decay = SPIN_DECAY * h;
    body.angular.y = if spin.abs() <= decay {
        0.0
    } else {
        spin - decay * spin.signum()
    };
}

fn closest_point(segment: &Segment, point: (f32, f32)) -> (f32, f32) {
    let (ax, az) = segment.start;
    let (bx, bz) = segment.end;
    let (ex, ez) = (bx - ax, bz - az);
    let length_sq = ex * ex + ez * ez;
    if length_sq <= f32::EPSILON {
        return segment.start;
    }
    let t = (((point.0 - ax) * ex + (point.1 - az) * ez) / length_sq).clamp(0.0, 1.0);
    (ax + ex * t, az + ez * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const R: f32 = 0.0255;
    const M: f32 = 0.156;
    const DT: f32 = 0.016;

    fn table_engine() -> SimpleEngine {
        let mut engine = SimpleEngine::new();
        engine.set_static_geometry(StaticGeometry {
            half_extents: (0.5, 1.0),
            cushion_height: R * 1.6,
            cushions: vec![Segment {
                start: (0.5, -0.9),
                end: (0.5, -0.1),
            }],
            holes: vec![Hole {
                centre: (0.52, 0.0),
                radius: 0.06,
                depth: 0.2,
            }],
        });
        engine
    }

    fn ball_at(engine: &mut SimpleEngine, x: f32, z: f32) -> BodyHandle {
        engine
            .add_body(BodyDesc {
                kind: BodyKind::Dynamic,
                position: Vec3::new(x, R, z),
                rotation: Quat::IDENTITY,
                radius: R,
                mass: M,
            })
            .unwrap()
    }

    fn run(engine: &mut SimpleEngine, steps: usize) -> Vec<Contact> {
        let mut contacts = Vec::new();
        for _ in 0..steps {
            engine.step(DT, &mut |c| contacts.push(c));
        }
        contacts
    }

    #[test]
    fn test_ball_settles_on_surface() {
        let mut engine = table_engine();
        let ball = ball_at(&mut engine, 0.0, 0.0);

        run(&mut engine, 30);

        let (position, _) = engine.transform(ball).unwrap();
        assert_approx_eq!(position.y, R, 1e-4);
        assert!(!engine.is_active(ball));
    }

    #[test]
    fn test_ball_drops_into_hole() {
        let mut engine = table_engine();
        let ball = ball_at(&mut engine, 0.4, 0.0);
        engine.apply_impulse(ball, Vec3::new(0.5 * M, 0.0, 0.0), Vec3::ZERO);

        run(&mut engine, 40);

        let (position, _) = engine.transform(ball).unwrap();
        assert!(position.y < -0.2, "ball should be below the hole, y = {}", position.y);
        assert!(position.x > 0.4);
    }

    #[test]
    fn test_ball_leaves_surface_edge_and_falls() {
        let mut engine = table_engine();
        let ball = ball_at(&mut engine, 0.0, 0.95);
        engine.apply_impulse(ball, Vec3::new(0.0, 0.0, 0.5 * M), Vec3::ZERO);

        run(&mut engine, 30);

        let (position, _) = engine.transform(ball).unwrap();
        assert!(position.z > 1.0);
        assert!(position.y < 0.0);
    }

    #[test]
    fn test_head_on_collision_transfers_velocity() {
        let mut engine = table_engine();
        let a = ball_at(&mut engine, -0.2, -0.5);
        let b = ball_at(&mut engine, 0.0, -0.5);
        engine.apply_impulse(a, Vec3::new(M, 0.0, 0.0), Vec3::ZERO);

        let contacts = run(&mut engine, 20);

        assert!(contacts.contains(&Contact::Body(a, b)));
        let va = engine.velocity(a).unwrap();
        let vb = engine.velocity(b).unwrap();
        assert!(vb.x > 0.3);
        assert!(va.x.abs() < vb.x);
    }

    #[test]
    fn test_cushion_reflects_with_restitution() {
        let mut engine = table_engine();
        let ball = ball_at(&mut engine, 0.45, -0.5);
        engine.apply_impulse(ball, Vec3::new(0.4 * M, 0.0, 0.0), Vec3::ZERO);

        let mut touched = false;
        for _ in 0..15 {
            engine.step(DT, &mut |c| touched |= c == Contact::Cushion(ball));
            if touched {
                break;
            }
        }

        assert!(touched);
        let velocity = engine.velocity(ball).unwrap();
        assert!(velocity.x < 0.0);
        assert!(velocity.x.abs() < 0.4 * CUSHION_RESTITUTION + 0.05);
    }

    #[test]
    fn test_offset_impulse_adds_spin() {
        let mut engine = table_engine();
        let ball = ball_at(&mut engine, 0.0, 0.0);
        engine.apply_impulse(
            ball,
            Vec3::new(0.0, 0.0, -0.2 * M),
            Vec3::new(0.01, 0.0, 0.0),
        );

        let body = engine.body(ball).unwrap();
        assert!(body.angular.y.abs() > 0.0);
        assert!(engine.is_active(ball));
    }

    #[test]
    fn test_body_limit() {
        let mut engine = SimpleEngine::new();
        for i in 0..MAX_BODIES {
            ball_at(&mut engine, i as f32 * 0.06, 0.0);
        }
        let result = engine.add_body(BodyDesc {
            kind: BodyKind::Dynamic,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            radius: R,
            mass: M,
        });
        assert_eq!(result, Err(PhysicsError::Exhausted));
    }

    #[test]
    fn test_collision_only_body_reports_without_response() {
        let mut engine = table_engine();
        let sensor = engine
            .add_body(BodyDesc {
                kind: BodyKind::CollisionOnly,
                position: Vec3::new(0.0, R, -0.5),
                rotation: Quat::IDENTITY,
                radius: R,
                mass: 0.0,
            })
            .unwrap();
        let ball = ball_at(&mut engine, -0.2, -0.5);
        engine.apply_impulse(ball, Vec3::new(M, 0.0, 0.0), Vec3::ZERO);

        let contacts = run(&mut engine, 20);

        assert!(contacts.contains(&Contact::Body(sensor, ball)));
        assert!(engine.velocity(ball).unwrap().x > 0.6);
        let (position, _) = engine.transform(sensor).unwrap();
        assert_approx_eq!(position.x, 0.0, 1e-6);
    }

    #[test]
    fn test_required_substeps() {
        let mut engine = table_engine();
        let ball = ball_at(&mut engine, 0.0, 0.0);
        assert_eq!(engine.required_substeps(DT), 1);

        engine.apply_impulse(ball, Vec3::new(0.0, 0.0, 3.0 * M), Vec3::ZERO);
        let substeps = engine.required_substeps(DT);
        assert!(substeps > 1);
        assert!(substeps <= MAX_SUBSTEPS);
    }
}
