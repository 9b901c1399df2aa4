//! Peer-to-peer synchronization
//!
//! Peers exchange newline-delimited JSON messages over plain TCP. Each peer
//! gets a reader thread and a writer thread sharing one outbound queue; the
//! registry is the only place peers are added or removed.

pub mod message;
pub mod peer;
pub mod server;

pub use message::{Handshake, Message, MessageKind, PeerIntroduction};
pub use peer::{peer_key, Peer, PeerRegistry};
pub use server::Server;
