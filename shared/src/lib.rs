//! Wire protocol and table constants shared by the billiards server and its clients.
//!
//! Every message is a [`Packet`], carried inside a [`Datagram`] frame and
//! encoded with bincode. Ball state travels as [`ActorInfo`] with a compressed
//! velocity and orientation.

pub mod math;

pub use math::{Quat, Vec3};

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u16 = 1;

/// Number of client slots on a server.
pub const MAX_CLIENTS: usize = 4;
/// Number of local players a single client may bring.
pub const MAX_PLAYERS_PER_CLIENT: u8 = 4;

pub const BALL_RADIUS: f32 = 0.0255;
pub const BALL_MASS: f32 = 0.156;
/// Height of a resting ball's centre above the playing surface.
pub const BALL_HEIGHT: f32 = BALL_RADIUS;
pub const CUE_BALL: u8 = 0;

/// Snooker target flags carried in [`PlayerInfo::target`]. The low bits hold a
/// colour id while the colours are being cleared in sequence.
pub const TARGET_RED: u8 = 0x80;
pub const TARGET_COLOUR: u8 = 0x40;

const VELOCITY_SCALE: f32 = 1000.0;
const ROTATION_SCALE: f32 = i16::MAX as f32;

/// Session identifiers returned by a session's `process()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StateId {
    Lobby = 0,
    Golf = 1,
    Billiards = 2,
}

impl TryFrom<u8> for StateId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StateId::Lobby),
            1 => Ok(StateId::Golf),
            2 => Ok(StateId::Billiards),
            other => Err(other),
        }
    }
}

/// Reason attached to a refused connection or a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RejectReason {
    VersionMismatch,
    ServerFull,
    NotInLobby,
    Kicked,
    MapNotFound,
    BadData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FoulType {
    NoBallHit,
    WrongBallHit,
    CueBallPot,
    WrongBallPot,
    OffTable,
    OutOfSequence,
    Forfeit,
    /// Not a foul itself: the incoming player has a free table.
    FreeTable,
}

/// Eight-ball target classes, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TargetClass {
    Spots = 0,
    Stripes = 1,
    Eightball = 2,
    None = 3,
}

impl TargetClass {
    /// Classifies a pool ball number.
    pub fn of_ball(id: u8) -> TargetClass {
        match id {
            1..=7 => TargetClass::Spots,
            8 => TargetClass::Eightball,
            9..=15 => TargetClass::Stripes,
            _ => TargetClass::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerCommand {
    SpawnBall,
    StrikeBall,
    ForceEnd,
    KickClient,
}

/// Per-player game state as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub client: u8,
    pub player: u8,
    pub target: u8,
    pub score: u8,
}

/// Shot input from the active player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BilliardsUpdate {
    pub client_id: u8,
    pub player_id: u8,
    pub impulse: Vec3,
    pub offset: Vec3,
}

/// Cue ball placement request after a foul.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallPlacement {
    pub client_id: u8,
    pub player_id: u8,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActorInfo {
    pub server_id: u32,
    pub position: Vec3,
    pub velocity: [i16; 3],
    pub rotation: [i16; 4],
    /// Ball id for spawns.
    pub state: u8,
    /// Server time in milliseconds.
    pub timestamp: u32,
}

/// Static table data a client needs before the first turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub cueball_position: Vec3,
    /// Cue ball placement rectangle as (left, bottom, width, height) on the x/z plane.
    pub spawn_area: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    // Client to server
    ClientVersion(u16),
    ClientPlayerCount(u8),
    ClientReady(u8),
    TransitionComplete(u8),
    InputUpdate(BilliardsUpdate),
    BallPlaced(BallPlacement),
    TurnReady(u8),
    ReadyQuit(u8),
    ServerCommand { command: ServerCommand, target: u8 },
    /// Lobby ready flag: client index in the high byte, flag in the low byte.
    LobbyReady(u16),
    MapInfo(String),
    RequestGameStart(u8),

    // Server to client
    ConnectionAccepted(u8),
    ConnectionRefused(RejectReason),
    ClientConnected(u8),
    ClientDisconnected(u8),
    StateChange(StateId),
    ServerError(RejectReason),
    ActorSpawn(ActorInfo),
    ActorUpdate(ActorInfo),
    EntityRemoved(u32),
    TableInfo(TableInfo),
    SetPlayer(PlayerInfo),
    NotifyPlayer(PlayerInfo),
    FoulEvent(FoulType),
    GameEnd(PlayerInfo),
    ReadyQuitStatus(u8),
    PingTime { client: u8, rtt_ms: u16 },
}

/// Framing used on the UDP socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datagram {
    Hello,
    Goodbye,
    Unreliable(Packet),
    Reliable { seq: u32, packet: Packet },
    Ack { seq: u32 },
    Ping { sent_ms: u64 },
    Pong { sent_ms: u64 },
}

pub fn compress_quat(q: Quat) -> [i16; 4] {
    let q = q.normalize();
    [q.x, q.y, q.z, q.w].map(|c| (c.clamp(-1.0, 1.0) * ROTATION_SCALE).round() as i16)
}

pub fn decompress_quat(data: [i16; 4]) -> Quat {
    let [x, y, z, w] = data.map(|c| c as f32 / ROTATION_SCALE);
    Quat { x, y, z, w }.normalize()
}

/// Velocity in millimetres per second, saturating at roughly 32 m/s.
pub fn compress_velocity(v: Vec3) -> [i16; 3] {
    [v.x, v.y, v.z].map(|c| {
        (c * VELOCITY_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16
    })
}

pub fn decompress_velocity(data: [i16; 3]) -> Vec3 {
    let [x, y, z] = data.map(|c| c as f32 / VELOCITY_SCALE);
    Vec3::new(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_state_id_from_u8() {
        assert_eq!(StateId::try_from(2), Ok(StateId::Billiards));
        assert_eq!(StateId::try_from(0), Ok(StateId::Lobby));
        assert_eq!(StateId::try_from(9), Err(9));
    }

    #[test]
    fn test_ball_classes() {
        assert_eq!(TargetClass::of_ball(0), TargetClass::None);
        assert_eq!(TargetClass::of_ball(3), TargetClass::Spots);
        assert_eq!(TargetClass::of_ball(8), TargetClass::Eightball);
        assert_eq!(TargetClass::of_ball(12), TargetClass::Stripes);
    }

    #[test]
    fn test_quat_compression_precision() {
        let q = Quat::from_axis_angle(Vec3::new(0.3, 1.0, -0.2), 1.1);
        let restored = decompress_quat(compress_quat(q));
        assert_approx_eq!(restored.x, q.x, 1e-3);
        assert_approx_eq!(restored.y, q.y, 1e-3);
        assert_approx_eq!(restored.z, q.z, 1e-3);
        assert_approx_eq!(restored.w, q.w, 1e-3);
    }

    #[test]
    fn test_velocity_compression_saturates() {
        let data = compress_velocity(Vec3::new(100.0, -0.0015, 1.25));
        assert_eq!(data[0], i16::MAX);
        assert_eq!(data[1], -2);
        assert_eq!(data[2], 1250);
        assert_approx_eq!(decompress_velocity(data).z, 1.25, 1e-3);
    }

    #[test]
    fn test_packet_serialization_input_update() {
        let packet = Packet::InputUpdate(BilliardsUpdate {
            client_id: 1,
            player_id: 0,
            impulse: Vec3::new(0.0, 0.0, -0.4),
            offset: Vec3::new(0.0, 0.01, 0.0),
        });

        let serialized = bincode::serialize(&Datagram::Unreliable(packet.clone())).unwrap();
        let deserialized: Datagram = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Datagram::Unreliable(p) => assert_eq!(p, packet),
            _ => panic!("Wrong datagram type after deserialization"),
        }
    }

    #[test]
    fn test_truncated_datagram_is_rejected() {
        let data = bincode::serialize(&Datagram::Reliable {
            seq: 7,
            packet: Packet::MapInfo("pool_green".to_string()),
        })
        .unwrap();

        let result: Result<Datagram, _> = bincode::deserialize(&data[..data.len() / 2]);
        assert!(result.is_err());
    }
}
