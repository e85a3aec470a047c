//! Headless client that joins a server, starts a match if it is the host and
//! takes every shot it is given.

use billiards_server::network::{NetEventKind, NetFlag, PeerId, Transport, UdpTransport};
use billiards_shared::{
    BallPlacement, BilliardsUpdate, Packet, PlayerInfo, StateId, Vec3, BALL_HEIGHT,
    PROTOCOL_VERSION,
};
use clap::Parser;
use log::{info, warn};
use rand::Rng;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:16002")]
    server: SocketAddr,

    /// Local players sharing this connection
    #[arg(short = 'p', long, default_value = "1")]
    players: u8,

    /// Request a match as soon as we are the host
    #[arg(long)]
    start: bool,

    /// Seconds to stay connected
    #[arg(short = 'd', long, default_value = "60")]
    duration: u64,
}

struct Session {
    slot: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (mut transport, server) = UdpTransport::connect(args.server).await?;
    transport.send(server, &Packet::ClientVersion(PROTOCOL_VERSION), NetFlag::Reliable);
    transport.send(server, &Packet::ClientPlayerCount(args.players), NetFlag::Reliable);

    let mut session = Session { slot: None };
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    while Instant::now() < deadline {
        while let Some(event) = transport.poll_event() {
            match event.kind {
                NetEventKind::Packet(packet) => {
                    handle_packet(&mut transport, server, &mut session, &args, packet)
                }
                NetEventKind::Disconnected => {
                    info!("Server closed the connection");
                    return Ok(());
                }
                NetEventKind::Connected => {}
            }
        }
        transport.service(Instant::now());
        sleep(Duration::from_millis(5)).await;
    }

    transport.disconnect(server);
    Ok(())
}

fn handle_packet(
    transport: &mut UdpTransport,
    server: PeerId,
    session: &mut Session,
    args: &Args,
    packet: Packet,
) {
    match packet {
        Packet::ConnectionAccepted(slot) => {
            info!("Joined as client {}", slot);
            session.slot = Some(slot);
            let ready = (slot as u16) << 8 | 1;
            transport.send(server, &Packet::LobbyReady(ready), NetFlag::Reliable);
            if args.start && slot == 0 {
                transport.send(
                    server,
                    &Packet::RequestGameStart(StateId::Billiards as u8),
                    NetFlag::Reliable,
                );
            }
        }
        Packet::ConnectionRefused(reason) => warn!("Refused: {:?}", reason),
        Packet::StateChange(state) => {
            info!("Server switched to {:?}", state);
            if state == StateId::Billiards {
                transport.send(server, &Packet::ClientReady(0), NetFlag::Reliable);
                transport.send(server, &Packet::TransitionComplete(0), NetFlag::Reliable);
            }
        }
        Packet::SetPlayer(player) => {
            if Some(player.client) == session.slot {
                take_shot(transport, server, player);
            }
        }
        Packet::NotifyPlayer(player) => {
            info!(
                "Player {}:{} target {} score {}",
                player.client, player.player, player.target, player.score
            );
            transport.send(server, &Packet::TurnReady(0), NetFlag::Reliable);
        }
        Packet::FoulEvent(foul) => info!("Foul: {:?}", foul),
        Packet::GameEnd(winner) => {
            info!(
                "Game over, client {} player {} wins with {}",
                winner.client, winner.player, winner.score
            );
            transport.send(server, &Packet::ReadyQuit(0), NetFlag::Reliable);
        }
        Packet::ServerError(reason) => warn!("Server error: {:?}", reason),
        Packet::PingTime { client, rtt_ms } if Some(client) == session.slot => {
            info!("RTT {} ms", rtt_ms);
        }
        _ => {}
    }
}

/// Places the cue ball in case we have ball in hand, then shoots up the table.
fn take_shot(transport: &mut UdpTransport, server: PeerId, player: PlayerInfo) {
    let placement = BallPlacement {
        client_id: player.client,
        player_id: player.player,
        position: Vec3::new(0.0, BALL_HEIGHT, 0.6),
    };
    transport.send(server, &Packet::BallPlaced(placement), NetFlag::Reliable);

    let mut rng = rand::thread_rng();
    let impulse = Vec3::new(rng.gen_range(-0.05..0.05), 0.0, -rng.gen_range(0.3..0.8));
    info!("Shooting with impulse {:?}", impulse);
    let update = BilliardsUpdate {
        client_id: player.client,
        player_id: player.player,
        impulse,
        offset: Vec3::ZERO,
    };
    transport.send(server, &Packet::InputUpdate(update), NetFlag::Reliable);
}
