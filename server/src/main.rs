use billiards_server::config::ServerConfig;
use billiards_server::server::Server;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

/// Parses command-line arguments, then runs the server until Ctrl+C or
/// until the server thread stops by itself.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "16002")]
        port: u16,
        /// Directory containing the table assets
        #[clap(short, long, default_value = "server/assets")]
        assets: PathBuf,
        /// Table the first match is played on
        #[clap(short, long, default_value = "pool")]
        table: String,
        /// Physics step in milliseconds
        #[clap(long, default_value = "16")]
        tick_ms: u64,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        listen_addr: format!("{}:{}", args.host, args.port),
        asset_dir: args.assets,
        table: args.table,
        tick_interval: Duration::from_millis(args.tick_ms),
        ..Default::default()
    };

    // Launch blocks until the socket is bound
    let mut server = tokio::task::spawn_blocking(move || {
        let mut server = Server::new();
        server.launch(config).map(|addr| (server, addr))
    })
    .await?
    .map(|(server, addr)| {
        info!("Billiards server listening on {}", addr);
        server
    })?;

    let mut watchdog = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
            _ = watchdog.tick() => {
                if !server.is_running() {
                    info!("Server thread stopped");
                    break;
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || server.stop()).await?;
    Ok(())
}
