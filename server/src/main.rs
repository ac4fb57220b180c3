use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig, ServerHandle};
use shared::ObservedPlayer;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RCON port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Password admins must log in with
    #[arg(short = 'P', long)]
    password: String,

    /// Player in the listing, as `id;uid;name` (repeatable)
    #[arg(long = "player", value_parser = parse_player)]
    players: Vec<ObservedPlayer>,

    /// Lines per `players` response (0 sends one response)
    #[arg(long, default_value = "0")]
    lines_per_response: usize,

    /// Milliseconds between the responses of one listing
    #[arg(long, default_value = "0")]
    response_delay_ms: u64,

    /// Bytes per multipacket fragment
    #[arg(long, default_value = "1024")]
    fragment_size: usize,

    /// Probability of losing a datagram (0.0 to 1.0)
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Maximum number of logged-in admins
    #[arg(short, long, default_value = "8")]
    max_clients: usize,
}

fn parse_player(value: &str) -> Result<ObservedPlayer, String> {
    let mut parts = value.splitn(3, ';').map(str::trim);
    let (Some(id), Some(uid), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected `id;uid;name`, got `{}`", value));
    };
    let id = id
        .parse()
        .map_err(|e| format!("invalid player id `{}`: {}", id, e))?;
    Ok(ObservedPlayer::new(id, uid, name))
}

/// Broadcasts every stdin line to the logged-in admins as a server message
async fn broadcast_stdin(handle: ServerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                handle.broadcast_message(line.trim());
            }
            Ok(Some(_)) => {}
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

    let mut config = ServerConfig::new(&format!("{}:{}", args.host, args.port), &args.password);
    config.players = args.players;
    config.lines_per_response = args.lines_per_response;
    config.response_delay = Duration::from_millis(args.response_delay_ms);
    config.fragment_size = args.fragment_size;
    config.drop_rate = args.drop_rate.clamp(0.0, 1.0);
    config.max_clients = args.max_clients;

    info!(
        "Serving {} players, {} lines per response",
        config.players.len(),
        config.lines_per_response
    );

    let server = Server::new(config).await?;
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());
    tokio::spawn(broadcast_stdin(handle.clone()));

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    Ok(())
}
