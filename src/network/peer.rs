use crate::error::{BlockchainError, Result};
use crate::network::Message;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// A registered connection. Messages for it go through `outbound`, which a
/// single writer thread drains in order.
pub struct Peer {
    address: String,
    port: u16,
    connection_id: u64,
    outbound: Sender<Message>,
    stream: TcpStream,
}

impl Peer {
    pub fn get_address(&self) -> &str {
        &self.address
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn key(&self) -> String {
        peer_key(&self.address, self.port)
    }

    pub fn send(&self, message: Message) -> Result<()> {
        self.outbound.send(message).map_err(|_| {
            BlockchainError::Network(format!("Outbound queue for {} is closed", self.key()))
        })
    }

    fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Shutdown of {} reported: {e}", self.key());
        }
    }
}

pub fn peer_key(address: &str, port: u16) -> String {
    format!("{address}:{port}")
}

/// Live peers keyed by `address:port`
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Peer>>,
    next_connection_id: AtomicU64,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry {
            peers: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Peer>> {
        self.peers
            .lock()
            .expect("Failed to acquire peer registry lock - this should never happen")
    }

    /// Adds a peer and hands back its connection id and the receiving end of
    /// its outbound queue. Fails if the key is already taken.
    pub fn insert(
        &self,
        address: &str,
        port: u16,
        stream: TcpStream,
    ) -> Result<(u64, Receiver<Message>)> {
        let key = peer_key(address, port);
        let mut peers = self.lock();
        if peers.contains_key(&key) {
            return Err(BlockchainError::Network(format!(
                "Peer {key} is already connected"
            )));
        }

        let (outbound, receiver) = mpsc::channel();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        peers.insert(
            key.clone(),
            Peer {
                address: address.to_string(),
                port,
                connection_id,
                outbound,
                stream,
            },
        );
        info!("Registered peer {key} ({} connected)", peers.len());
        Ok((connection_id, receiver))
    }

    /// Closes the connection and forgets the peer
    pub fn remove(&self, address: &str, port: u16) -> bool {
        let key = peer_key(address, port);
        match self.lock().remove(&key) {
            Some(peer) => {
                peer.close();
                info!("Removed peer {key}");
                true
            }
            None => false,
        }
    }

    /// Removes `key` only if it still belongs to `connection_id`, so a stale
    /// connection cannot evict its replacement.
    pub(crate) fn remove_connection(&self, key: &str, connection_id: u64) {
        let mut peers = self.lock();
        if peers
            .get(key)
            .is_some_and(|peer| peer.connection_id == connection_id)
        {
            if let Some(peer) = peers.remove(key) {
                peer.close();
                info!("Removed peer {key}");
            }
        }
    }

    pub fn contains(&self, address: &str, port: u16) -> bool {
        self.lock().contains_key(&peer_key(address, port))
    }

    pub fn send(&self, address: &str, port: u16, message: Message) -> Result<()> {
        let key = peer_key(address, port);
        match self.lock().get(&key) {
            Some(peer) => peer.send(message),
            None => Err(BlockchainError::Network(format!("Peer {key} is not connected"))),
        }
    }

    /// Queues `message` for every peer; returns how many accepted it
    pub fn broadcast(&self, message: &Message) -> usize {
        self.broadcast_with(|_| Some(message.clone()))
    }

    /// Queues a per-peer message for every peer `build` returns one for. A
    /// peer whose queue is closed is skipped, never aborting the rest.
    pub fn broadcast_with<F>(&self, build: F) -> usize
    where
        F: Fn(&Peer) -> Option<Message>,
    {
        let peers = self.lock();
        let mut delivered = 0;
        for peer in peers.values() {
            let message = match build(peer) {
                Some(message) => message,
                None => continue,
            };
            match peer.send(message) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast skipped {}: {e}", peer.key()),
            }
        }
        delivered
    }

    /// `(address, port)` of every registered peer, sorted by key
    pub fn list(&self) -> Vec<(String, u16)> {
        let mut peers: Vec<(String, u16)> = self
            .lock()
            .values()
            .map(|peer| (peer.address.clone(), peer.port))
            .collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
