//! Mock RCON endpoint: UDP handling, login checks and command replies

use crate::client_manager::ClientManager;
use log::{debug, error, info, warn};
use rand::Rng;
use shared::codec::{
    command_response_packet, login_response_packet, parse_client_frame, server_message_packet,
    split_response, ClientPacket, MAX_DATAGRAM,
};
use shared::{ObservedPlayer, PLAYERS_COMMAND};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// How the mock server behaves
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub password: String,
    /// Listing returned by `players`
    pub players: Vec<ObservedPlayer>,
    /// Send the `players` listing as separate responses of this many lines.
    /// Zero sends it in one response.
    pub lines_per_response: usize,
    /// Pause between two responses of one listing
    pub response_delay: Duration,
    /// Responses longer than this are split into multipacket fragments
    pub fragment_size: usize,
    /// Probability in `0.0..=1.0` of silently losing any datagram
    pub drop_rate: f64,
    pub idle_timeout: Duration,
    pub max_clients: usize,
}

impl ServerConfig {
    pub fn new(bind_addr: &str, password: &str) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            password: password.to_string(),
            players: Vec::new(),
            lines_per_response: 0,
            response_delay: Duration::ZERO,
            fragment_size: 1024,
            drop_rate: 0.0,
            idle_timeout: Duration::from_secs(45),
            max_clients: 8,
        }
    }
}

/// Observable state shared between the server loop and its handles
#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub players: Vec<ObservedPlayer>,
    /// While muted the server ignores every datagram, as if it were down.
    pub muted: bool,
    pub logins: u32,
    pub rejected_logins: u32,
    /// Non-empty commands in arrival order
    pub commands: Vec<String>,
    pub keepalives: u32,
    pub acks: Vec<u8>,
}

/// Messages sent from network tasks and handles to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: ClientPacket, addr: SocketAddr },
    Broadcast { text: String },
    Shutdown,
}

/// A frame queued for the sender task
#[derive(Debug)]
struct Outbound {
    frame: Vec<u8>,
    addr: SocketAddr,
}

/// Cloneable control surface for a running [`Server`]
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    state: Arc<RwLock<MockState>>,
}

impl ServerHandle {
    /// Pushes a server message (type 0x02) to every logged-in admin
    pub fn broadcast_message(&self, text: &str) -> bool {
        self.send(ServerMessage::Broadcast {
            text: text.to_string(),
        })
    }

    pub fn shutdown(&self) -> bool {
        self.send(ServerMessage::Shutdown)
    }

    fn send(&self, message: ServerMessage) -> bool {
        if let Err(e) = self.server_tx.send(message) {
            error!("Mock server is no longer running: {}", e);
            return false;
        }
        true
    }

    pub async fn set_muted(&self, muted: bool) {
        info!("Mock server {}", if muted { "muted" } else { "unmuted" });
        self.state.write().await.muted = muted;
    }

    pub async fn set_players(&self, players: Vec<ObservedPlayer>) {
        self.state.write().await.players = players;
    }

    pub async fn snapshot(&self) -> MockState {
        self.state.read().await.clone()
    }
}

/// Mock RCON server coordinating the receive, send and timeout tasks
pub struct Server {
    config: ServerConfig,
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    state: Arc<RwLock<MockState>>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Mock RCON server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let state = MockState {
            players: config.players.clone(),
            ..MockState::default()
        };

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(
                config.max_clients,
                config.idle_timeout,
            ))),
            state: Arc::new(RwLock::new(state)),
            config,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Spawns task that continuously listens for incoming frames
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();
        let drop_rate = self.config.drop_rate;

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if should_drop(drop_rate) {
                            debug!("Simulated loss of {} bytes from {}", len, addr);
                            continue;
                        }
                        match parse_client_frame(&buffer[..len]) {
                            Ok(packet) => {
                                if let Err(e) =
                                    server_tx.send(ServerMessage::PacketReceived { packet, addr })
                                {
                                    error!("Failed to send packet to main loop: {}", e);
                                    break;
                                }
                            }
                            // Real servers drop bad frames without a reply.
                            Err(e) => warn!("Dropping frame from {}: {}", addr, e),
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing frame queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let drop_rate = self.config.drop_rate;
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(Outbound { frame, addr }) = outbound_rx.recv().await {
                if should_drop(drop_rate) {
                    debug!("Simulated loss of {} bytes to {}", frame.len(), addr);
                    continue;
                }
                if let Err(e) = socket.send_to(&frame, addr).await {
                    error!("Failed to send frame to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that forgets admins who stopped sending keep-alives
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts(Instant::now());
                for client_id in timed_out {
                    info!("Admin {} timed out", client_id);
                }
            }
        });
    }

    fn send_frame(&self, frame: Vec<u8>, addr: SocketAddr) {
        if let Err(e) = self.outbound_tx.send(Outbound { frame, addr }) {
            error!("Failed to queue frame for sending: {}", e);
        }
    }

    /// Queues response groups with a pause between each group
    fn send_delayed(&self, groups: Vec<Vec<Vec<u8>>>, addr: SocketAddr) {
        let outbound_tx = self.outbound_tx.clone();
        let delay = self.config.response_delay;

        tokio::spawn(async move {
            for (i, group) in groups.into_iter().enumerate() {
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                for frame in group {
                    if outbound_tx.send(Outbound { frame, addr }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    async fn handle_packet(&mut self, packet: ClientPacket, addr: SocketAddr) {
        if self.state.read().await.muted {
            debug!("Muted, ignoring frame from {}", addr);
            return;
        }

        let now = Instant::now();

        match packet {
            ClientPacket::Login { password } => {
                let accepted = password == self.config.password;
                let client_id = if accepted {
                    self.clients.write().await.add_client(addr, now)
                } else {
                    None
                };

                {
                    let mut state = self.state.write().await;
                    state.logins += 1;
                    if client_id.is_none() {
                        state.rejected_logins += 1;
                    }
                }

                if accepted && client_id.is_none() {
                    warn!("Rejecting login from {}: server full", addr);
                } else if !accepted {
                    warn!("Rejecting login from {}: wrong password", addr);
                }

                self.send_frame(login_response_packet(client_id.is_some()), addr);
            }

            ClientPacket::Command { sequence, command } => {
                if self.clients.write().await.touch(addr, now).is_none() {
                    warn!("Command from {} without login", addr);
                    return;
                }

                if command.is_empty() {
                    self.state.write().await.keepalives += 1;
                    self.send_frame(command_response_packet(sequence, &[]), addr);
                    return;
                }

                info!("Command #{} from {}: {}", sequence, addr, command);
                self.state.write().await.commands.push(command.clone());

                if command.trim().eq_ignore_ascii_case(PLAYERS_COMMAND) {
                    let players = self.state.read().await.players.clone();
                    let groups = players_listing(&players, self.config.lines_per_response)
                        .into_iter()
                        .map(|text| split_response(sequence, text.as_bytes(), self.config.fragment_size))
                        .collect();
                    self.send_delayed(groups, addr);
                } else {
                    let reply = format!("Executed: {}", command);
                    for frame in split_response(sequence, reply.as_bytes(), self.config.fragment_size) {
                        self.send_frame(frame, addr);
                    }
                }
            }

            ClientPacket::Ack { sequence } => {
                if self.clients.write().await.touch(addr, now).is_some() {
                    debug!("Ack {} from {}", sequence, addr);
                    self.state.write().await.acks.push(sequence);
                }
            }
        }
    }

    async fn broadcast(&mut self, text: &str) {
        let recipients: Vec<(SocketAddr, u8)> = {
            let mut clients = self.clients.write().await;
            clients
                .get_client_addrs()
                .into_iter()
                .filter_map(|(id, addr)| Some((addr, clients.take_message_sequence(id)?)))
                .collect()
        };

        debug!("Broadcasting to {} admins: {}", recipients.len(), text);
        for (addr, sequence) in recipients {
            self.send_frame(server_message_packet(sequence, text), addr);
        }
    }

    /// Main server loop. Returns after [`ServerHandle::shutdown`].
    pub async fn run(mut self) -> io::Result<()> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Mock server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr).await;
                }
                ServerMessage::Broadcast { text } => self.broadcast(&text).await,
                ServerMessage::Shutdown => {
                    info!("Mock server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn should_drop(drop_rate: f64) -> bool {
    drop_rate > 0.0 && rand::thread_rng().gen_bool(drop_rate.min(1.0))
}

/// Renders the `players` listing, grouped into `lines_per_response` lines
/// per response. The header sits in the first group and the total in the last.
pub fn players_listing(players: &[ObservedPlayer], lines_per_response: usize) -> Vec<String> {
    let mut lines = vec!["Players on server:".to_string()];
    lines.extend(players.iter().map(ToString::to_string));
    lines.push(format!("({} players in total)", players.len()));

    if lines_per_response == 0 {
        return vec![lines.join("\n")];
    }
    lines
        .chunks(lines_per_response)
        .map(|group| group.join("\n"))
        .collect()
}
