//! Bookkeeping for authenticated RCON admins
//!
//! An admin is identified by the UDP address it logged in from. The manager
//! tracks when each admin was last heard from, hands out the per-admin
//! sequence numbers used for pushed server messages, and drops admins that
//! have gone silent for longer than the idle timeout, the way a real game
//! server forgets a client that stopped sending keep-alives.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One logged-in admin connection
#[derive(Debug)]
pub struct AdminClient {
    /// Identifier assigned by the server at login
    pub id: u32,
    /// Address the admin logged in from; all replies go here
    pub addr: SocketAddr,
    /// Last time any valid frame arrived from this admin
    pub last_seen: Instant,
    /// Sequence for the next pushed server message
    next_message_sequence: u8,
}

impl AdminClient {
    pub fn new(id: u32, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            next_message_sequence: 0,
        }
    }

    /// Returns the sequence for a new server message, wrapping after 255
    pub fn take_message_sequence(&mut self) -> u8 {
        let sequence = self.next_message_sequence;
        self.next_message_sequence = self.next_message_sequence.wrapping_add(1);
        sequence
    }

    /// True once nothing has been heard for longer than `timeout`
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Tracks every authenticated admin and enforces the connection limit
pub struct ClientManager {
    clients: HashMap<u32, AdminClient>,
    next_client_id: u32,
    max_clients: usize,
    idle_timeout: Duration,
}

impl ClientManager {
    /// Creates an empty manager
    ///
    /// Client IDs start from 1 and are never reused while the server runs.
    pub fn new(max_clients: usize, idle_timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            idle_timeout,
        }
    }

    /// Registers a freshly authenticated admin
    ///
    /// A second login from the same address replaces the earlier session.
    /// Returns None when the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr, now: Instant) -> Option<u32> {
        if let Some(existing) = self.find_client_by_addr(addr) {
            info!("Replacing admin {} from {}", existing, addr);
            self.remove_client(&existing);
        }

        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Admin {} logged in from {}", client_id, addr);
        self.clients
            .insert(client_id, AdminClient::new(client_id, addr, now));

        Some(client_id)
    }

    /// Removes an admin. Returns false if it was already gone.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Admin {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks the admin at `addr` as alive. Returns its ID, or None if the
    /// address never logged in.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) -> Option<u32> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.last_seen = now;
        Some(client.id)
    }

    /// Hands out the next server message sequence for one admin
    pub fn take_message_sequence(&mut self, client_id: u32) -> Option<u8> {
        self.clients
            .get_mut(&client_id)
            .map(AdminClient::take_message_sequence)
    }

    /// Removes admins that stayed silent past the idle timeout
    ///
    /// Returns the removed IDs so the caller can log or report them.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(now, self.idle_timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    /// All admin IDs with their addresses, for broadcasting server messages
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn test_manager(max_clients: usize) -> ClientManager {
        ClientManager::new(max_clients, Duration::from_secs(45))
    }

    #[test]
    fn test_add_client() {
        let mut manager = test_manager(2);
        let now = Instant::now();

        let client_id = manager.add_client(test_addr(), now).unwrap();
        assert_eq!(client_id, 1);
        assert_eq!(manager.len(), 1);
        assert!(!manager.is_empty());
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = test_manager(1);
        let now = Instant::now();

        assert!(manager.add_client(test_addr(), now).is_some());
        assert!(manager.add_client(test_addr2(), now).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_relogin_replaces_session() {
        let mut manager = test_manager(1);
        let now = Instant::now();

        let first = manager.add_client(test_addr(), now).unwrap();
        let second = manager.add_client(test_addr(), now).unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find_client_by_addr(test_addr()), Some(second));
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = test_manager(2);

        assert!(!manager.remove_client(&999));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_touch_unknown_address() {
        let mut manager = test_manager(2);
        let now = Instant::now();
        manager.add_client(test_addr(), now);

        assert_eq!(manager.touch(test_addr(), now), Some(1));
        assert_eq!(manager.touch(test_addr2(), now), None);
    }

    #[test]
    fn test_message_sequence_wraps() {
        let mut manager = test_manager(2);
        let client_id = manager.add_client(test_addr(), Instant::now()).unwrap();

        let sequences: Vec<u8> = (0..257)
            .filter_map(|_| manager.take_message_sequence(client_id))
            .collect();

        assert_eq!(sequences[0], 0);
        assert_eq!(sequences[255], 255);
        assert_eq!(sequences[256], 0);
        assert_eq!(manager.take_message_sequence(999), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = test_manager(3);
        let start = Instant::now();

        let quiet = manager.add_client(test_addr(), start).unwrap();
        let chatty = manager.add_client(test_addr2(), start).unwrap();

        manager.touch(test_addr2(), start + Duration::from_secs(40));

        let removed = manager.check_timeouts(start + Duration::from_secs(46));
        assert_eq!(removed, vec![quiet]);
        assert_eq!(manager.get_client_addrs(), vec![(chatty, test_addr2())]);
    }
}
