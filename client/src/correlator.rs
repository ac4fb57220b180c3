//! Gathering of the multi-line `players` listing.
//!
//! The protocol does not echo a reliable request identifier, so correctness
//! comes from issuing at most one `players` query at a time. A query moves
//! `Idle → AwaitingResponse → Gathering → Idle`; the listing is finalized once
//! no further player line has arrived for the debounce window.

use crate::config::ClientConfig;
use log::{debug, info, warn};
use regex::Regex;
use shared::ObservedPlayer;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const MARKERS: [&str; 2] = ["processing command: players", "players on server:"];

fn player_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\s*;\s*([a-z0-9-]+)\s*;\s*(.+?)\s*$").expect("valid player line pattern")
    })
}

/// Parses one `<id> ; <uid> ; <name>` row. Anything else yields `None`.
pub fn parse_player_line(line: &str) -> Option<ObservedPlayer> {
    let caps = player_line().captures(line.trim())?;
    let id = caps[1].parse().ok()?;
    Some(ObservedPlayer::new(id, &caps[2], &caps[3]))
}

pub fn is_players_marker(line: &str) -> bool {
    let line = line.to_ascii_lowercase();
    MARKERS.iter().any(|marker| line.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    AwaitingResponse,
    Gathering,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The listing settled; hand it to the roster.
    Completed(Vec<ObservedPlayer>),
    /// No answer within the response window.
    TimedOut {
        players: Vec<ObservedPlayer>,
        consecutive: u32,
        /// The consecutive-timeout threshold was reached; reconnect.
        escalate: bool,
    },
}

impl QueryOutcome {
    pub fn players(&self) -> &[ObservedPlayer] {
        match self {
            QueryOutcome::Completed(players) => players,
            QueryOutcome::TimedOut { players, .. } => players,
        }
    }
}

pub struct PlayersQuery {
    state: QueryState,
    sequence: Option<u8>,
    response_due: Option<Instant>,
    debounce_due: Option<Instant>,
    gathered: Vec<ObservedPlayer>,
    consecutive_timeouts: u32,
    liveness_seen: bool,
    response_timeout: Duration,
    debounce: Duration,
    timeout_threshold: u32,
}

impl PlayersQuery {
    pub fn new(response_timeout: Duration, debounce: Duration, timeout_threshold: u32) -> Self {
        Self {
            state: QueryState::Idle,
            sequence: None,
            response_due: None,
            debounce_due: None,
            gathered: Vec::new(),
            consecutive_timeouts: 0,
            liveness_seen: false,
            response_timeout,
            debounce,
            timeout_threshold: timeout_threshold.max(1),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.response_timeout,
            config.gather_debounce,
            config.timeout_threshold,
        )
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == QueryState::Idle
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Records that `players` went out with `sequence` and arms the response
    /// window. Returns false if a query is already outstanding.
    pub fn begin(&mut self, sequence: u8, now: Instant) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.state = QueryState::AwaitingResponse;
        self.sequence = Some(sequence);
        self.response_due = Some(now + self.response_timeout);
        self.debounce_due = None;
        self.gathered.clear();
        self.liveness_seen = false;
        true
    }

    /// Feeds the text of one (reassembled) command response. Returns true
    /// when the text belonged to the players listing.
    pub fn on_command_response(&mut self, text: &str, now: Instant) -> bool {
        match self.state {
            QueryState::Idle => {
                debug!("Command response outside a players query ({} bytes)", text.len());
                return false;
            }
            QueryState::AwaitingResponse => {
                // Any answer proves the link is alive.
                self.liveness_seen = true;
                self.consecutive_timeouts = 0;
            }
            QueryState::Gathering => {}
        }

        let mut listing = false;
        for line in text.lines() {
            if is_players_marker(line) {
                self.enter_gathering(now);
                listing = true;
            } else if let Some(player) = parse_player_line(line) {
                self.enter_gathering(now);
                self.gathered.push(player);
                listing = true;
            }
        }
        listing
    }

    fn enter_gathering(&mut self, now: Instant) {
        if self.state == QueryState::AwaitingResponse {
            debug!("Gathering players for sequence {:?}", self.sequence);
            self.state = QueryState::Gathering;
            self.response_due = None;
        }
        self.debounce_due = Some(now + self.debounce);
    }

    /// Fires elapsed deadlines, returning the outcome of a finished query.
    pub fn poll(&mut self, now: Instant) -> Option<QueryOutcome> {
        match self.state {
            QueryState::Gathering if self.debounce_due.is_some_and(|due| now >= due) => {
                let players = self.finish();
                info!("Players listing complete: {} entries", players.len());
                Some(QueryOutcome::Completed(players))
            }
            QueryState::AwaitingResponse if self.response_due.is_some_and(|due| now >= due) => {
                let liveness_seen = self.liveness_seen;
                let players = self.finish();

                if liveness_seen {
                    debug!("Server answered but sent no players listing");
                    return Some(QueryOutcome::Completed(players));
                }

                self.consecutive_timeouts += 1;
                let consecutive = self.consecutive_timeouts;
                let escalate = consecutive >= self.timeout_threshold;
                warn!(
                    "Players query timed out ({} consecutive)",
                    consecutive
                );
                if escalate {
                    self.consecutive_timeouts = 0;
                }
                Some(QueryOutcome::TimedOut {
                    players,
                    consecutive,
                    escalate,
                })
            }
            _ => None,
        }
    }

    fn finish(&mut self) -> Vec<ObservedPlayer> {
        self.state = QueryState::Idle;
        self.sequence = None;
        self.response_due = None;
        self.debounce_due = None;
        self.liveness_seen = false;
        std::mem::take(&mut self.gathered)
    }

    /// Drops an in-flight query without counting it as a timeout.
    pub fn abort(&mut self) {
        if !self.is_idle() {
            debug!("Aborting players query for sequence {:?}", self.sequence);
        }
        self.finish();
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            QueryState::Idle => None,
            QueryState::AwaitingResponse => self.response_due,
            QueryState::Gathering => self.debounce_due,
        }
    }
}
