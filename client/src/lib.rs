//! # RCON Roster Client
//!
//! This library keeps an administrative RCON connection to a game server
//! alive and maintains an authoritative, in-memory roster of the players on
//! it. The roster is built from two sources that arrive independently:
//!
//! - the server's answer to the `players` command, polled periodically and
//!   often split across several UDP datagrams, and
//! - join/update events parsed from the server logs by an external tailer.
//!
//! ## Architecture
//!
//! ### Sans-IO State Machines
//! Every protocol concern is a plain state machine that takes the current time
//! as an argument and reports its next deadline:
//!
//! - [`session`]: login, keep-alive, watchdog and server-message acks.
//! - [`correlator`]: the one-at-a-time `players` query with its response
//!   window, debounce and consecutive-timeout escalation.
//! - [`roster`]: merge of polled listings, log enrichment and expiry.
//! - [`supervisor`]: exponential reconnect backoff behind a single-loop guard.
//!
//! ### Single-Task Event Loop
//! [`network::RconClient`] owns the UDP socket and all four state machines. It
//! waits on the socket, the command channel and the earliest deadline, so no
//! locking is needed and timers can never fire twice.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::{ClientEvent, RconClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("127.0.0.1:2306".parse()?, "password");
//!     let (client, handle, mut events) = RconClient::new(config);
//!     tokio::spawn(client.run());
//!
//!     while let Some(event) = events.recv().await {
//!         if let ClientEvent::Players(players) = event {
//!             println!("{} players online", players.len());
//!             handle.send_custom_command("say -1 Hello");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlator;
pub mod error;
pub mod network;
pub mod roster;
pub mod session;
pub mod supervisor;

pub use config::ClientConfig;
pub use error::RconError;
pub use network::{ClientEvent, ClientHandle, RconClient};
