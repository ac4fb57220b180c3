//! # Mock RCON Server Library
//!
//! A small stand-in for a game server's RCON endpoint, used for local
//! development of the roster client and by the integration tests. It speaks
//! the same framed UDP protocol as the real thing: it checks the login
//! password and frame checksums, answers `players` with a configurable
//! listing, echoes other commands and pushes server messages on request.
//!
//! ## Architecture Design
//!
//! The server follows an event-driven layout with internal async tasks:
//! - **Network Receiver**: decodes incoming frames and forwards them to the
//!   main loop, optionally dropping some to simulate loss
//! - **Network Sender**: drains the outgoing frame queue
//! - **Timeout Checker**: forgets admins who stopped sending keep-alives
//! - **Main Loop**: authenticates admins and builds replies
//!
//! Test code controls a running server through a [`network::ServerHandle`]:
//! it can mute the server to simulate an outage, swap the player listing,
//! broadcast messages and inspect what the server has received.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Logged-in admins, their idle timeouts and server message sequences.
//!
//! ### Network Module (`network`)
//! Socket tasks, login verification and command replies.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use shared::ObservedPlayer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ServerConfig::new("127.0.0.1:2306", "password");
//!     config.players = vec![ObservedPlayer::new(0, "aaaa-1111", "Alice")];
//!     config.lines_per_response = 2;
//!
//!     let server = Server::new(config).await?;
//!     let handle = server.handle();
//!     tokio::spawn(server.run());
//!
//!     handle.broadcast_message("Server restart in 5 minutes");
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod network;
