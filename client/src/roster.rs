//! Canonical table of known players.
//!
//! Two sources feed the roster. The polled `players` listing is
//! authoritative for who is online and carries the protocol `uid`; log events
//! arrive asynchronously and only fill in details (ip, BattlEye GUID, Steam id,
//! device). Entries first seen in the logs stay provisional, keyed by name,
//! until a poll or a `PlayerUpdate` confirms their uid. Removal is driven by
//! expiry alone.

use log::{debug, info};
use shared::{LogEvent, ObservedPlayer, Player};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub player: Player,
    /// Last time the polled listing (or enrichment, for provisional entries)
    /// confirmed this player.
    pub last_seen: Instant,
}

impl RosterEntry {
    fn new(player: Player, now: Instant) -> Self {
        Self {
            player,
            last_seen: now,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_seen = self.last_seen.max(now);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub updated: usize,
    pub added: usize,
    pub expired: usize,
}

pub struct Roster {
    entries: Vec<RosterEntry>,
    expiry: Duration,
}

impl Roster {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: Vec::new(),
            expiry,
        }
    }

    /// Reconciles a polled listing into the roster, then expires idle entries.
    pub fn merge(&mut self, observed: &[ObservedPlayer], now: Instant) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut lookup: HashMap<&str, &ObservedPlayer> = observed
            .iter()
            .filter(|p| !p.uid.is_empty())
            .map(|p| (p.uid.as_str(), p))
            .collect();

        for entry in &mut self.entries {
            let Some(uid) = entry.player.uid.as_deref() else {
                continue;
            };
            if let Some(seen) = lookup.remove(uid) {
                apply_observation(&mut entry.player, seen);
                entry.touch(now);
                summary.updated += 1;
            }
        }

        // Whatever is left is new to the roster, unless a provisional entry
        // with the same name is waiting for exactly this confirmation.
        for candidate in observed {
            let Some(seen) = lookup.remove(candidate.uid.as_str()) else {
                continue;
            };

            let provisional = self
                .entries
                .iter_mut()
                .find(|e| !e.player.is_confirmed() && e.player.name == seen.name);

            match provisional {
                Some(entry) => {
                    debug!("Confirmed provisional player {} as {}", seen.name, seen.uid);
                    entry.player.uid = Some(seen.uid.clone());
                    apply_observation(&mut entry.player, seen);
                    entry.touch(now);
                    summary.updated += 1;
                }
                None => {
                    info!("Player {} ({}) joined", seen.name, seen.uid);
                    let player = Player {
                        uid: Some(seen.uid.clone()),
                        id: Some(seen.id),
                        name: seen.name.clone(),
                        ..Player::default()
                    };
                    self.entries.push(RosterEntry::new(player, now));
                    summary.added += 1;
                }
            }
        }

        summary.expired = self.expire(now).len();
        summary
    }

    /// Removes entries not confirmed within the expiry window.
    pub fn expire(&mut self, now: Instant) -> Vec<Player> {
        let expiry = self.expiry;
        let mut expired = Vec::new();

        self.entries.retain(|entry| {
            let idle = now.saturating_duration_since(entry.last_seen);
            if idle > expiry {
                expired.push(entry.player.clone());
                false
            } else {
                true
            }
        });

        for player in &expired {
            info!("Player {} expired from roster", player.name);
        }
        expired
    }

    /// Applies a log-derived event. Only empty fields are ever written.
    pub fn enrich(&mut self, event: &LogEvent, now: Instant) {
        match event {
            LogEvent::PlayerJoined {
                name,
                ip,
                be_guid,
                steam_id,
                device,
            } => {
                let details = Player {
                    name: name.clone(),
                    ip: ip.clone(),
                    be_guid: be_guid.clone(),
                    steam_id: steam_id.clone(),
                    device: device.clone(),
                    ..Player::default()
                };

                let found = self
                    .position_confirmed_by_name(name)
                    .or_else(|| self.position_provisional_by_name(name));

                match found {
                    Some(i) => self.entries[i].player.fill_missing(&details),
                    None => {
                        debug!("Provisional roster entry for {}", name);
                        self.entries.push(RosterEntry::new(details, now));
                    }
                }
            }
            LogEvent::PlayerUpdate { id, name, uid } => {
                let uid = uid.as_deref().filter(|u| !u.is_empty());
                let update = Player {
                    uid: uid.map(str::to_string),
                    id: *id,
                    name: name.clone(),
                    ..Player::default()
                };

                let by_uid = uid.and_then(|u| self.position_by_uid(u));
                // Without a uid match, a confirmed entry of the same name is
                // the player the update talks about.
                let by_name = self.position_provisional_by_name(name).or_else(|| {
                    by_uid
                        .is_none()
                        .then(|| self.position_confirmed_by_name(name))
                        .flatten()
                });

                match (by_uid, by_name) {
                    (Some(canonical), Some(provisional)) if canonical != provisional => {
                        debug!("Folding provisional entry for {} into its uid", name);
                        let folded = self.entries.remove(provisional);
                        let canonical = if provisional < canonical {
                            canonical - 1
                        } else {
                            canonical
                        };
                        let entry = &mut self.entries[canonical];
                        entry.player.fill_missing(&update);
                        entry.player.fill_missing(&folded.player);
                    }
                    (Some(i), _) | (None, Some(i)) => {
                        self.entries[i].player.fill_missing(&update);
                    }
                    (None, None) => {
                        debug!("New roster entry for {} from log update", name);
                        self.entries.push(RosterEntry::new(update, now));
                    }
                }
            }
            LogEvent::PlayerDisconnected { name } => {
                // Polled listing decides who is online; expiry removes.
                debug!("Player {} disconnected according to logs", name);
            }
        }
    }

    fn position_by_uid(&self, uid: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.player.uid.as_deref() == Some(uid))
    }

    fn position_confirmed_by_name(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.player.is_confirmed() && e.player.name == name)
    }

    fn position_provisional_by_name(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.player.is_confirmed() && e.player.name == name)
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<&Player> {
        self.position_by_uid(uid).map(|i| &self.entries[i].player)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Player> {
        self.entries
            .iter()
            .find(|e| e.player.name == name)
            .map(|e| &e.player)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Full player list ordered by slot id, unslotted entries last.
    pub fn snapshot(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.entries.iter().map(|e| e.player.clone()).collect();
        players.sort_by(|a, b| {
            (a.id.is_none(), a.id, &a.name).cmp(&(b.id.is_none(), b.id, &b.name))
        });
        players
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn apply_observation(player: &mut Player, seen: &ObservedPlayer) {
    player.id = Some(seen.id);
    if !seen.name.is_empty() {
        player.name = seen.name.clone();
    }
}
