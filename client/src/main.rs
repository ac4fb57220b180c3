use clap::Parser;
use client::config::ClientConfig;
use client::network::{ClientEvent, ClientHandle, RconClient};
use log::{error, info, warn};
use shared::LogEvent;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// RCON host of the game server
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RCON port of the game server
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// RCON password
    #[arg(short = 'P', long)]
    password: String,

    /// Seconds between players polls (0 disables polling)
    #[arg(long, default_value = "30")]
    poll_interval: u64,

    /// Seconds after which an unconfirmed player is dropped
    #[arg(long, default_value = "120")]
    expiry: u64,

    /// Seconds of server silence before the session is considered dead
    #[arg(long, default_value = "60")]
    watchdog: u64,
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("could not resolve {}", host).into())
}

/// Reads stdin line by line. `!<command>` lines are sent to the server, any
/// other line must be a JSON log event from the log tailer.
async fn forward_stdin(handle: ClientHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(command) = line.strip_prefix('!') {
                    handle.send_custom_command(command);
                    continue;
                }
                match serde_json::from_str::<LogEvent>(line) {
                    Ok(event) => {
                        handle.enrich(event);
                    }
                    Err(e) => warn!("Ignoring unparseable log event: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Error reading stdin: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ClientConfig::new(resolve(&args.host, args.port)?, &args.password);
    config.poll_interval = (args.poll_interval > 0).then(|| Duration::from_secs(args.poll_interval));
    config.player_expiry = Duration::from_secs(args.expiry);
    config.watchdog_timeout = Duration::from_secs(args.watchdog);

    info!("Starting RCON client for {}", config.server_addr);

    let (client, handle, mut events) = RconClient::new(config);
    let client_task = tokio::spawn(client.run());
    tokio::spawn(forward_stdin(handle.clone()));

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ClientEvent::Players(players)) => {
                        println!("{}", serde_json::to_string(&players)?);
                    }
                    Some(ClientEvent::Connected) => info!("Connected"),
                    Some(ClientEvent::Closed) => info!("Connection closed"),
                    Some(ClientEvent::Error(message)) => warn!("{}", message),
                    Some(ClientEvent::ServerMessage(text)) => info!("Server: {}", text),
                    Some(ClientEvent::CommandResponse(text)) => info!("Response: {}", text),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                handle.shutdown();
                break;
            }
        }
    }

    if let Err(e) = client_task.await {
        error!("Client task panicked: {}", e);
    }

    Ok(())
}
