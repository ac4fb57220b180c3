//! Client network layer: the event loop that owns the UDP socket and drives
//! the session, the players query, the roster and the reconnect policy.
//!
//! Everything runs on one task. Each component reports its next deadline and
//! the loop sleeps until the earliest of them, a datagram, or a command from a
//! [`ClientHandle`]. Outside code never touches the roster directly; it sends
//! commands and receives [`ClientEvent`]s.

use crate::config::ClientConfig;
use crate::correlator::{PlayersQuery, QueryOutcome};
use crate::error::RconError;
use crate::roster::Roster;
use crate::session::{Session, SessionEvent};
use crate::supervisor::{ReconnectReason, ReconnectSupervisor};
use log::{debug, error, info, warn};
use shared::codec::MAX_DATAGRAM;
use shared::{LogEvent, Player, PLAYERS_COMMAND};
use std::io;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

/// Events emitted to listeners (bot, plugins, the CLI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Closed,
    Error(String),
    /// Full roster after every merge.
    Players(Vec<Player>),
    ServerMessage(String),
    CommandResponse(String),
}

/// Requests accepted by the event loop.
#[derive(Debug)]
pub enum ClientCommand {
    SendCustom(String),
    StartPolling(Duration),
    StopPolling,
    Enrich(LogEvent),
    Snapshot(oneshot::Sender<Vec<Player>>),
    Shutdown,
}

/// Cloneable sender side of the command channel.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    fn send(&self, command: ClientCommand) -> bool {
        if let Err(e) = self.command_tx.send(command) {
            error!("RCON client is no longer running: {}", e);
            return false;
        }
        true
    }

    /// Passes an arbitrary command (kick, ban, say, restart) to the server.
    pub fn send_custom_command(&self, command: &str) -> bool {
        self.send(ClientCommand::SendCustom(command.to_string()))
    }

    pub fn start_polling(&self, interval: Duration) -> bool {
        self.send(ClientCommand::StartPolling(interval))
    }

    pub fn stop_polling(&self) -> bool {
        self.send(ClientCommand::StopPolling)
    }

    pub fn enrich(&self, event: LogEvent) -> bool {
        self.send(ClientCommand::Enrich(event))
    }

    /// Current roster, or `None` if the client has stopped.
    pub async fn snapshot(&self) -> Option<Vec<Player>> {
        let (tx, rx) = oneshot::channel();
        if !self.send(ClientCommand::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    pub fn shutdown(&self) -> bool {
        self.send(ClientCommand::Shutdown)
    }
}

pub struct RconClient {
    config: ClientConfig,
    socket: Option<UdpSocket>,
    session: Session,
    players_query: PlayersQuery,
    roster: Roster,
    supervisor: ReconnectSupervisor,
    poll_interval: Option<Duration>,
    next_poll: Option<Instant>,

    event_tx: mpsc::UnboundedSender<ClientEvent>,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
}

impl RconClient {
    pub fn new(config: ClientConfig) -> (Self, ClientHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let client = RconClient {
            session: Session::from_config(&config),
            players_query: PlayersQuery::from_config(&config),
            roster: Roster::new(config.player_expiry),
            supervisor: ReconnectSupervisor::from_config(&config),
            poll_interval: config.poll_interval,
            next_poll: None,
            socket: None,
            config,
            event_tx,
            command_rx,
        };

        (client, ClientHandle { command_tx }, event_rx)
    }

    fn emit(&self, event: ClientEvent) {
        // Listeners may have gone away; the client keeps running regardless.
        if self.event_tx.send(event).is_err() {
            debug!("No listener for client events");
        }
    }

    async fn open_socket(&self) -> io::Result<UdpSocket> {
        let bind_addr = if self.config.server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.config.server_addr).await?;
        Ok(socket)
    }

    async fn connect(&mut self, now: Instant) {
        info!("Connecting to {}", self.config.server_addr);

        match self.open_socket().await {
            Ok(socket) => {
                self.socket = Some(socket);
                self.session.begin_login(now);
            }
            Err(e) => {
                error!("Failed to open RCON socket: {}", e);
                self.emit(ClientEvent::Error(RconError::Transport(e).to_string()));
                self.schedule_reconnect(ReconnectReason::Transport, now);
            }
        }
    }

    /// Drops the socket and every session timer.
    fn teardown(&mut self) {
        self.session.close();
        self.players_query.abort();
        self.next_poll = None;
        if self.socket.take().is_some() {
            self.emit(ClientEvent::Closed);
        }
    }

    fn schedule_reconnect(&mut self, reason: ReconnectReason, now: Instant) {
        if self.supervisor.is_reconnecting() {
            self.supervisor.attempt_failed(now);
        } else {
            self.supervisor.request(reason, now);
        }
    }

    fn fail(&mut self, err: RconError, now: Instant) {
        if !err.is_fatal() {
            match &err {
                RconError::Protocol(e) => warn!("Dropping frame: {}", e),
                _ => {
                    warn!("{}", err);
                    self.emit(ClientEvent::Error(err.to_string()));
                }
            }
            return;
        }

        let reason = match &err {
            RconError::Auth => ReconnectReason::AuthRejected,
            RconError::Watchdog(_) => ReconnectReason::Watchdog,
            _ => ReconnectReason::Transport,
        };

        error!("{}", err);
        self.emit(ClientEvent::Error(err.to_string()));
        self.teardown();
        self.schedule_reconnect(reason, now);
    }

    fn handle_datagram(&mut self, bytes: &[u8], now: Instant) {
        match self.session.handle_datagram(bytes, now) {
            Ok(Some(SessionEvent::LoggedIn)) => self.on_logged_in(now),
            Ok(Some(SessionEvent::CommandResponse { sequence, text })) => {
                debug!("Response to sequence {} ({} bytes)", sequence, text.len());
                let listing = !self.players_query.is_idle()
                    && self.players_query.on_command_response(&text, now);
                if !listing && !text.is_empty() {
                    self.emit(ClientEvent::CommandResponse(text));
                }
            }
            Ok(Some(SessionEvent::ServerMessage { text, .. })) => {
                info!("Server: {}", text);
                self.emit(ClientEvent::ServerMessage(text));
            }
            Ok(None) => {}
            Err(e) => self.fail(e, now),
        }
    }

    fn on_logged_in(&mut self, now: Instant) {
        self.supervisor.on_login_success();
        self.emit(ClientEvent::Connected);

        if let Some(interval) = self.poll_interval {
            debug!("Polling players every {:?}", interval);
            self.next_poll = Some(now);
        }
    }

    fn handle_command(&mut self, command: ClientCommand, now: Instant) {
        match command {
            ClientCommand::SendCustom(text) => match self.session.send_command(&text, now) {
                Ok(sequence) => debug!("Sent `{}` as sequence {}", text, sequence),
                Err(e) => self.fail(e, now),
            },
            ClientCommand::StartPolling(interval) => {
                info!("Polling players every {:?}", interval);
                self.poll_interval = Some(interval);
                if self.session.is_logged_in() {
                    self.next_poll = Some(now);
                }
            }
            ClientCommand::StopPolling => {
                info!("Players polling stopped");
                self.poll_interval = None;
                self.next_poll = None;
            }
            ClientCommand::Enrich(event) => self.roster.enrich(&event, now),
            ClientCommand::Snapshot(reply) => {
                if reply.send(self.roster.snapshot()).is_err() {
                    debug!("Snapshot requester went away");
                }
            }
            ClientCommand::Shutdown => {}
        }
    }

    fn poll_players(&mut self, now: Instant) {
        self.next_poll = self.poll_interval.map(|interval| now + interval);

        if !self.session.is_logged_in() {
            info!("Skipping players poll: not logged in");
            return;
        }
        if !self.players_query.is_idle() {
            debug!("Skipping players poll: previous query still running");
            return;
        }

        match self.session.send_command(PLAYERS_COMMAND, now) {
            Ok(sequence) => {
                self.players_query.begin(sequence, now);
            }
            Err(e) => self.fail(e, now),
        }
    }

    fn finish_query(&mut self, outcome: QueryOutcome, now: Instant) {
        match outcome {
            QueryOutcome::Completed(players) => self.publish(&players, now),
            QueryOutcome::TimedOut {
                players,
                consecutive,
                escalate,
            } => {
                self.fail(
                    RconError::Timeout {
                        command: PLAYERS_COMMAND.to_string(),
                        secs: self.config.response_timeout.as_secs(),
                    },
                    now,
                );
                self.publish(&players, now);

                if escalate {
                    warn!(
                        "{} consecutive players timeouts, forcing reconnect",
                        consecutive
                    );
                    self.teardown();
                    self.schedule_reconnect(ReconnectReason::CommandTimeouts, now);
                }
            }
        }
    }

    fn publish(&mut self, players: &[shared::ObservedPlayer], now: Instant) {
        let summary = self.roster.merge(players, now);
        debug!(
            "Roster merged: {} updated, {} added, {} expired",
            summary.updated, summary.added, summary.expired
        );
        self.emit(ClientEvent::Players(self.roster.snapshot()));
    }

    async fn handle_timers(&mut self, now: Instant) {
        if let Err(e) = self.session.handle_timeout(now) {
            self.fail(e, now);
        }

        if let Some(outcome) = self.players_query.poll(now) {
            self.finish_query(outcome, now);
        }

        if self.next_poll.is_some_and(|due| now >= due) {
            self.poll_players(now);
        }

        if self.supervisor.take_due_attempt(now) {
            self.connect(now).await;
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.session.next_deadline(),
            self.players_query.next_deadline(),
            self.next_poll,
            self.supervisor.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Sends every frame the session has queued.
    async fn flush(&mut self) {
        while let Some(frame) = self.session.poll_transmit() {
            let Some(socket) = self.socket.as_ref() else {
                break;
            };
            let result = socket.send(&frame).await;
            if let Err(e) = result {
                self.fail(RconError::Transport(e), Instant::now());
                break;
            }
        }
    }

    /// Runs until [`ClientHandle::shutdown`] is called or every handle is dropped.
    pub async fn run(mut self) {
        self.connect(Instant::now()).await;
        self.flush().await;

        let mut buffer = vec![0u8; MAX_DATAGRAM];

        loop {
            let deadline = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                result = recv_datagram(self.socket.as_ref(), &mut buffer) => {
                    let now = Instant::now();
                    match result {
                        Ok(len) => self.handle_datagram(&buffer[..len], now),
                        Err(e) => self.fail(RconError::Transport(e), now),
                    }
                },

                command = self.command_rx.recv() => {
                    match command {
                        Some(ClientCommand::Shutdown) | None => {
                            info!("RCON client shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command, Instant::now()),
                    }
                },

                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    self.handle_timers(Instant::now()).await;
                },
            }

            self.flush().await;
        }

        self.supervisor.cancel();
        self.teardown();
    }
}

async fn recv_datagram(socket: Option<&UdpSocket>, buffer: &mut [u8]) -> io::Result<usize> {
    match socket {
        Some(socket) => socket.recv(buffer).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::{
        command_response_packet, login_response_packet, parse_client_frame, server_message_packet,
        ClientPacket,
    };
    use std::net::SocketAddr;
    use tokio::time::timeout;

    fn test_config(server_addr: SocketAddr) -> ClientConfig {
        let mut config = ClientConfig::new(server_addr, "secret");
        config.poll_interval = None;
        config.initial_backoff = Duration::from_millis(50);
        config.max_backoff = Duration::from_millis(200);
        config
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("event channel closed")
    }

    async fn recv_client_packet(socket: &UdpSocket) -> (ClientPacket, SocketAddr) {
        let mut buf = [0u8; 2048];
        let (len, addr) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for client frame")
            .unwrap();
        (parse_client_frame(&buf[..len]).unwrap(), addr)
    }

    #[tokio::test]
    async fn test_login_and_server_message_ack() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (client, handle, mut events) = RconClient::new(test_config(server.local_addr().unwrap()));
        let task = tokio::spawn(client.run());

        let (packet, addr) = recv_client_packet(&server).await;
        assert_eq!(
            packet,
            ClientPacket::Login {
                password: "secret".to_string()
            }
        );

        server.send_to(&login_response_packet(true), addr).await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        server
            .send_to(&server_message_packet(7, "hello admins"), addr)
            .await
            .unwrap();
        let (ack, _) = recv_client_packet(&server).await;
        assert_eq!(ack, ClientPacket::Ack { sequence: 7 });
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::ServerMessage("hello admins".to_string())
        );

        assert!(handle.shutdown());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_command_response() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (client, handle, mut events) = RconClient::new(test_config(server.local_addr().unwrap()));
        let task = tokio::spawn(client.run());

        let (_, addr) = recv_client_packet(&server).await;
        server.send_to(&login_response_packet(true), addr).await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        assert!(handle.send_custom_command("say -1 hello"));
        let (packet, _) = recv_client_packet(&server).await;
        assert_eq!(
            packet,
            ClientPacket::Command {
                sequence: 0,
                command: "say -1 hello".to_string()
            }
        );

        server
            .send_to(&command_response_packet(0, b"done"), addr)
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::CommandResponse("done".to_string())
        );

        assert!(handle.shutdown());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_response_during_players_query() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(server.local_addr().unwrap());
        config.gather_debounce = Duration::from_millis(100);
        let (client, handle, mut events) = RconClient::new(config);
        let task = tokio::spawn(client.run());

        let (_, addr) = recv_client_packet(&server).await;
        server.send_to(&login_response_packet(true), addr).await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected);

        assert!(handle.start_polling(Duration::from_secs(60)));
        let (players, _) = recv_client_packet(&server).await;
        assert_eq!(
            players,
            ClientPacket::Command {
                sequence: 0,
                command: "players".to_string()
            }
        );

        assert!(handle.send_custom_command("say -1 hi"));
        let (custom, _) = recv_client_packet(&server).await;
        assert_eq!(
            custom,
            ClientPacket::Command {
                sequence: 1,
                command: "say -1 hi".to_string()
            }
        );

        server
            .send_to(&command_response_packet(1, b"Executed: say -1 hi"), addr)
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::CommandResponse("Executed: say -1 hi".to_string())
        );

        server
            .send_to(
                &command_response_packet(0, b"Players on server:\n0 ; aaaa-1111 ; Alice"),
                addr,
            )
            .await
            .unwrap();
        match next_event(&mut events).await {
            ClientEvent::Players(players) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].name, "Alice");
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        assert!(handle.shutdown());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_players_timeouts_reconnect_once() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(server.local_addr().unwrap());
        config.poll_interval = Some(Duration::from_millis(100));
        config.response_timeout = Duration::from_millis(100);
        config.initial_backoff = Duration::from_millis(300);
        let (client, handle, mut events) = RconClient::new(config);
        let task = tokio::spawn(client.run());

        let (_, addr) = recv_client_packet(&server).await;
        server.send_to(&login_response_packet(true), addr).await.unwrap();

        // Never answer `players`; wait for the client to log in again.
        let mut polls = 0;
        loop {
            match recv_client_packet(&server).await.0 {
                ClientPacket::Command { command, .. } if command == "players" => polls += 1,
                ClientPacket::Login { .. } => break,
                other => panic!("Unexpected frame: {:?}", other),
            }
        }
        assert_eq!(polls, 3);

        let mut closed = 0;
        let mut timeouts = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                ClientEvent::Closed => closed += 1,
                ClientEvent::Error(message) if message.starts_with("no response") => timeouts += 1,
                _ => {}
            }
        }
        assert_eq!(closed, 1);
        assert_eq!(timeouts, 3);

        assert!(handle.shutdown());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_login_retries() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (client, handle, mut events) = RconClient::new(test_config(server.local_addr().unwrap()));
        let task = tokio::spawn(client.run());

        let (_, addr) = recv_client_packet(&server).await;
        server.send_to(&login_response_packet(false), addr).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::Error("login rejected by server".to_string())
        );
        assert_eq!(next_event(&mut events).await, ClientEvent::Closed);

        // Same credentials again after the backoff delay.
        let (packet, _) = recv_client_packet(&server).await;
        assert!(matches!(packet, ClientPacket::Login { .. }));

        assert!(handle.shutdown());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_enrich_and_snapshot() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (client, handle, _events) = RconClient::new(test_config(server.local_addr().unwrap()));
        let task = tokio::spawn(client.run());

        handle.enrich(LogEvent::PlayerJoined {
            name: "Alice".to_string(),
            ip: None,
            be_guid: Some("abc123".to_string()),
            steam_id: None,
            device: None,
        });

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].be_guid.as_deref(), Some("abc123"));

        assert!(handle.shutdown());
        task.await.unwrap();
        assert!(handle.snapshot().await.is_none());
    }
}
