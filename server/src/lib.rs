//! # Billiards Server Library
//!
//! Authoritative server for networked billiards. Clients send shots and cue
//! ball placements; the server runs the physics, referees the rules and
//! broadcasts the resulting ball state.
//!
//! ## Architecture
//!
//! Everything runs on one worker thread owned by [`server::Server`]. The
//! loop body is [`server::ServerCore`], which drains three accumulators each
//! update: a fixed physics step, the state broadcast and the ping report.
//! Exactly one session is active at a time, either the lobby or a match
//! ([`session::BilliardsState`]).
//!
//! Within a match the physics world ([`billiards::BilliardsSystem`]) raises
//! [`director::BilliardsEvent`]s into a queue. The rule director for the
//! table's ruleset consumes them and answers with fouls, player switches and
//! the end of the game, which the session turns into packets.
//!
//! ## Module Organization
//!
//! - `network`: UDP transport with reliable ordered delivery, plus an
//!   in-memory transport for tests
//! - `client_manager`: pending handshakes and numbered client slots
//! - `session`: lobby and match sessions and the data they share
//! - `billiards`, `physics`: the table simulation
//! - `director`: eight-ball, nine-ball and snooker rules
//! - `table`: RON table assets
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use billiards_server::config::ServerConfig;
//! use billiards_server::server::Server;
//!
//! let mut server = Server::new();
//! let addr = server.launch(ServerConfig::default()).unwrap();
//! println!("serving on {}", addr);
//! // ...
//! server.stop();
//! ```

pub mod billiards;
pub mod client_manager;
pub mod config;
pub mod director;
pub mod error;
pub mod network;
pub mod physics;
pub mod server;
pub mod session;
pub mod table;
