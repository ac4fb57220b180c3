//! Types shared between the RCON client and the mock server: the wire codec,
//! the player record emitted to listeners, and the log events consumed from
//! the log-tailing collaborator.

pub mod codec;

pub use codec::{CodecError, ClientPacket, Packet, Reassembler};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default RCON port used by the game server.
pub const DEFAULT_PORT: u16 = 2306;

/// The command whose multi-line response the roster is built from.
pub const PLAYERS_COMMAND: &str = "players";

/// One known participant as seen by listeners.
///
/// Every identity attribute is optional: log enrichment can create an entry
/// before the polled listing has confirmed its `uid` or slot `id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Player {
    pub uid: Option<String>,
    pub id: Option<u32>,
    pub name: String,
    pub ip: Option<String>,
    #[serde(rename = "beGUID")]
    pub be_guid: Option<String>,
    #[serde(rename = "steamID")]
    pub steam_id: Option<String>,
    pub device: Option<String>,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// True once the polled listing (or a `PlayerUpdate`) supplied a uid.
    pub fn is_confirmed(&self) -> bool {
        self.uid.as_deref().is_some_and(|uid| !uid.is_empty())
    }

    /// Copies every non-empty field of `other` into slots that are still empty.
    pub fn fill_missing(&mut self, other: &Player) {
        fill(&mut self.uid, other.uid.clone());
        if self.id.is_none() {
            self.id = other.id;
        }
        if self.name.is_empty() && !other.name.is_empty() {
            self.name = other.name.clone();
        }
        fill(&mut self.ip, other.ip.clone());
        fill(&mut self.be_guid, other.be_guid.clone());
        fill(&mut self.steam_id, other.steam_id.clone());
        fill(&mut self.device, other.device.clone());
    }
}

/// Writes `value` into `slot` only when the slot is empty and the value is not.
pub fn fill(slot: &mut Option<String>, value: Option<String>) {
    let slot_empty = slot.as_deref().map_or(true, str::is_empty);
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        if slot_empty {
            *slot = Some(value);
        }
    }
}

/// One row of a polled `players` listing: `<id> ; <uid> ; <name>`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ObservedPlayer {
    pub id: u32,
    pub uid: String,
    pub name: String,
}

impl ObservedPlayer {
    pub fn new(id: u32, uid: &str, name: &str) -> Self {
        Self {
            id,
            uid: uid.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObservedPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ; {} ; {}", self.id, self.uid, self.name)
    }
}

/// Events produced by the log-tailing collaborator.
///
/// These are non-authoritative: they enrich roster entries but never decide
/// who is online.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogEvent {
    PlayerJoined {
        name: String,
        ip: Option<String>,
        #[serde(rename = "beGUID")]
        be_guid: Option<String>,
        #[serde(rename = "steamID")]
        steam_id: Option<String>,
        device: Option<String>,
    },
    PlayerUpdate {
        id: Option<u32>,
        name: String,
        uid: Option<String>,
    },
    PlayerDisconnected {
        name: String,
    },
}

impl LogEvent {
    pub fn name(&self) -> &str {
        match self {
            LogEvent::PlayerJoined { name, .. }
            | LogEvent::PlayerUpdate { name, .. }
            | LogEvent::PlayerDisconnected { name } => name,
        }
    }
}
