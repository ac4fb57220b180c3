//! Transport session state machine.
//!
//! The session owns the protocol state of one login: the wrapping command
//! sequence byte, the multi-packet reassembly buffer, and the keep-alive and
//! watchdog deadlines. It performs no I/O itself. The driver feeds it inbound
//! datagrams and the current time, and drains queued outbound frames with
//! [`Session::poll_transmit`].

use crate::config::ClientConfig;
use crate::error::RconError;
use log::{debug, info, warn};
use shared::codec::{self, Packet};
use shared::Reassembler;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    LoggingIn,
    LoggedIn,
}

/// Decoded traffic handed up to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    CommandResponse { sequence: u8, text: String },
    ServerMessage { sequence: u8, text: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub protocol_errors: u64,
    pub keepalives_sent: u64,
    pub messages_acked: u64,
}

pub struct Session {
    password: String,
    state: SessionState,
    sequence: u8,
    reassembler: Reassembler,
    keepalive_interval: Duration,
    watchdog_timeout: Duration,
    login_timeout: Duration,
    keepalive_due: Option<Instant>,
    watchdog_due: Option<Instant>,
    outbox: VecDeque<Vec<u8>>,
    stats: SessionStats,
}

impl Session {
    pub fn new(
        password: &str,
        keepalive_interval: Duration,
        watchdog_timeout: Duration,
        login_timeout: Duration,
    ) -> Self {
        Self {
            password: password.to_string(),
            state: SessionState::Disconnected,
            sequence: 0,
            reassembler: Reassembler::new(),
            keepalive_interval,
            watchdog_timeout,
            login_timeout,
            keepalive_due: None,
            watchdog_due: None,
            outbox: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            &config.password,
            config.keepalive_interval,
            config.watchdog_timeout,
            config.login_timeout,
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Starts a fresh login. Any previous protocol state is discarded.
    pub fn begin_login(&mut self, now: Instant) {
        self.close();
        self.state = SessionState::LoggingIn;
        self.sequence = 0;
        self.stats = SessionStats::default();
        self.watchdog_due = Some(now + self.login_timeout.min(self.watchdog_timeout));
        self.queue(codec::login_packet(&self.password), now);
    }

    /// Queues a command frame and returns the sequence byte it was sent with.
    pub fn send_command(&mut self, command: &str, now: Instant) -> Result<u8, RconError> {
        if !self.is_logged_in() {
            return Err(RconError::NotLoggedIn);
        }

        let sequence = self.next_sequence();
        self.queue(codec::command_packet(sequence, command), now);
        Ok(sequence)
    }

    fn next_sequence(&mut self) -> u8 {
        let sequence = self.sequence;
        self.sequence = sequence.wrapping_add(1);
        sequence
    }

    fn queue(&mut self, frame: Vec<u8>, now: Instant) {
        self.outbox.push_back(frame);
        self.stats.frames_sent += 1;
        if self.is_logged_in() {
            self.keepalive_due = Some(now + self.keepalive_interval);
        }
    }

    /// Next outbound frame, if any.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    /// Decodes one inbound datagram.
    ///
    /// Server messages are acknowledged here, before the event is returned.
    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        now: Instant,
    ) -> Result<Option<SessionEvent>, RconError> {
        if self.state == SessionState::Disconnected {
            debug!("Ignoring {} byte datagram while disconnected", bytes.len());
            return Ok(None);
        }

        let packet = match codec::parse_frame(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.protocol_errors += 1;
                return Err(e.into());
            }
        };

        self.stats.frames_received += 1;
        self.watchdog_due = Some(now + self.watchdog_timeout);

        match packet {
            Packet::LoginResponse { success: true } => {
                if self.state != SessionState::LoggingIn {
                    debug!("Duplicate login response ignored");
                    return Ok(None);
                }
                info!("Logged in");
                self.state = SessionState::LoggedIn;
                self.keepalive_due = Some(now + self.keepalive_interval);
                Ok(Some(SessionEvent::LoggedIn))
            }
            Packet::LoginResponse { success: false } => {
                warn!("Login rejected");
                self.close();
                Err(RconError::Auth)
            }
            Packet::CommandResponse { sequence, data } => Ok(Some(SessionEvent::CommandResponse {
                sequence,
                text: String::from_utf8_lossy(&data).into_owned(),
            })),
            Packet::CommandFragment {
                sequence,
                total,
                index,
                data,
            } => {
                debug!("Fragment {} of {} for sequence {}", index, total, sequence);
                Ok(self
                    .reassembler
                    .push(sequence, total, index, data)
                    .map(|data| SessionEvent::CommandResponse {
                        sequence,
                        text: String::from_utf8_lossy(&data).into_owned(),
                    }))
            }
            Packet::ServerMessage { sequence, data } => {
                self.queue(codec::ack_packet(sequence), now);
                self.stats.messages_acked += 1;
                Ok(Some(SessionEvent::ServerMessage {
                    sequence,
                    text: String::from_utf8_lossy(&data).into_owned(),
                }))
            }
        }
    }

    /// Fires whichever session deadlines have passed.
    ///
    /// Keep-alives are queued internally. An expired watchdog closes the
    /// session and is reported as an error.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), RconError> {
        if let Some(due) = self.watchdog_due {
            if now >= due {
                let silence = match self.state {
                    SessionState::LoggingIn => self.login_timeout.min(self.watchdog_timeout),
                    _ => self.watchdog_timeout,
                };
                warn!("No traffic from server for {:?}, session considered dead", silence);
                self.close();
                return Err(RconError::Watchdog(silence));
            }
        }

        if let Some(due) = self.keepalive_due {
            if now >= due && self.is_logged_in() {
                debug!("Sending keep-alive");
                let sequence = self.next_sequence();
                self.queue(codec::command_packet(sequence, ""), now);
                self.stats.keepalives_sent += 1;
            }
        }

        Ok(())
    }

    /// Earliest pending keep-alive or watchdog deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.keepalive_due, self.watchdog_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Clears all timers and protocol state. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state != SessionState::Disconnected {
            debug!(
                "Closing session: {} frames sent, {} received, {} protocol errors",
                self.stats.frames_sent, self.stats.frames_received, self.stats.protocol_errors
            );
        }
        self.state = SessionState::Disconnected;
        self.keepalive_due = None;
        self.watchdog_due = None;
        self.outbox.clear();
        self.reassembler.reset();
    }
}
