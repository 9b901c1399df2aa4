use crate::core::{Block, Blockchain, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::{peer_key, Handshake, Message, MessageKind, PeerIntroduction, PeerRegistry};
use crate::storage::MemoryPool;
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TCP_CONNECT_TIMEOUT: u64 = 5000;
const HANDSHAKE_TIMEOUT: u64 = 10000;

/// P2P endpoint of a node: accepts peers, dials peers, and keeps the local
/// chain and pool in step with what they send.
#[derive(Clone)]
pub struct Server {
    blockchain: Blockchain,
    mempool: Arc<MemoryPool>,
    peers: Arc<PeerRegistry>,
    // raised when a peer's block arrives, so a local mining attempt yields
    mining_interrupt: Arc<AtomicBool>,
    listen_port: u16,
}

impl Server {
    /// Binds `addr` and starts accepting peers on a background thread
    pub fn start(blockchain: Blockchain, mempool: Arc<MemoryPool>, addr: &str) -> Result<Server> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        let listen_port = listener.local_addr()?.port();
        info!("Server listening on {}", listener.local_addr()?);

        let server = Server {
            blockchain,
            mempool,
            peers: Arc::new(PeerRegistry::new()),
            mining_interrupt: Arc::new(AtomicBool::new(false)),
            listen_port,
        };
        let acceptor = server.clone();
        thread::spawn(move || acceptor.accept_loop(listener));
        Ok(server)
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_mempool(&self) -> &Arc<MemoryPool> {
        &self.mempool
    }

    pub fn get_peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn get_mining_interrupt(&self) -> &AtomicBool {
        &self.mining_interrupt
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    fn accept_loop(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = server.accept_peer(stream) {
                            warn!("Rejected inbound connection: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }
    }

    // The dialer's first line says which port it listens on; that, with the
    // remote IP, is the identity the peer is registered under.
    fn accept_peer(&self, stream: TcpStream) -> Result<()> {
        let address = stream.peer_addr()?.ip().to_string();
        stream.set_read_timeout(Some(Duration::from_millis(HANDSHAKE_TIMEOUT)))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(BlockchainError::Network(format!(
                "{address} closed before the handshake"
            )));
        }
        let handshake: Handshake = serde_json::from_str(line.trim_end()).map_err(|e| {
            BlockchainError::Network(format!("Bad handshake from {address}: {e}"))
        })?;
        stream.set_read_timeout(None)?;

        self.register_peer(stream, reader, &address, handshake.port)?;
        self.broadcast_new_peer(&address, handshake.port);
        Ok(())
    }

    /// Dials a peer and announces our tip to it. No-op if already connected.
    pub fn connect_peer(&self, address: &str, port: u16) -> Result<()> {
        self.dial(address, port, self.listen_port)
    }

    fn dial(&self, address: &str, port: u16, announce_port: u16) -> Result<()> {
        if self.peers.contains(address, port) {
            debug!("Already connected to {}", peer_key(address, port));
            return Ok(());
        }

        let socket_addr = resolve(address, port)?;
        let mut stream =
            TcpStream::connect_timeout(&socket_addr, Duration::from_millis(TCP_CONNECT_TIMEOUT))
                .map_err(|e| {
                    BlockchainError::Network(format!("Failed to connect to {socket_addr}: {e}"))
                })?;

        let mut handshake = serde_json::to_string(&Handshake {
            port: announce_port,
        })?;
        handshake.push('\n');
        stream.write_all(handshake.as_bytes())?;

        let reader = BufReader::new(stream.try_clone()?);
        self.register_peer(stream, reader, address, port)?;

        let tip = Message::new(MessageKind::TipAnnounce, &self.blockchain.tip()?)?;
        self.peers.send(address, port, tip)
    }

    /// Registers the peer and starts its reader and writer threads. Either
    /// thread removes the peer on the first I/O failure.
    pub fn register_peer(
        &self,
        stream: TcpStream,
        reader: BufReader<TcpStream>,
        address: &str,
        port: u16,
    ) -> Result<()> {
        let writer = stream.try_clone()?;
        let (connection_id, outbound) = self.peers.insert(address, port, stream)?;
        let key = peer_key(address, port);

        let peers = Arc::clone(&self.peers);
        let writer_key = key.clone();
        thread::spawn(move || {
            write_loop(writer, outbound, &writer_key);
            peers.remove_connection(&writer_key, connection_id);
        });

        let server = self.clone();
        let address = address.to_string();
        thread::spawn(move || {
            server.read_loop(reader, &address, port);
            server.peers.remove_connection(&key, connection_id);
        });
        Ok(())
    }

    fn read_loop(&self, reader: BufReader<TcpStream>, address: &str, port: u16) {
        let key = peer_key(address, port);
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    info!("Connection to {key} failed: {e}");
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let message = match Message::from_line(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Dropping malformed message from {key}: {e}");
                    continue;
                }
            };
            if let Err(e) = self.handle_message(address, port, &message) {
                warn!("Dropping message from {key}: {e}");
            }
        }
        info!("Peer {key} closed the connection");
    }

    /// Applies one message received from `address:port`
    pub fn handle_message(&self, address: &str, port: u16, message: &Message) -> Result<()> {
        let kind = message.kind()?;
        debug!("Received {kind:?} from {}", peer_key(address, port));

        match kind {
            MessageKind::TipAnnounce => {
                let tip: Option<Block> = message.decode_payload()?;
                self.handle_tip_announce(address, port, tip)
            }
            MessageKind::ChainRequest => self.send_all_chain(address, port),
            MessageKind::AllChain => {
                let blocks: Vec<Block> = message.decode_payload()?;
                self.handle_all_chain(blocks)
            }
            MessageKind::TxBroadcast => {
                let tx: Transaction = message.decode_payload()?;
                debug!("Pooling transaction {} from peer", tx.get_id());
                self.mempool.submit(tx);
                Ok(())
            }
            MessageKind::BlockBroadcast => {
                let block: Block = message.decode_payload()?;
                self.handle_block(address, port, block)
            }
            MessageKind::PeerIntroduce => {
                let intro: PeerIntroduction = message.decode_payload()?;
                self.handle_introduction(intro)
            }
        }
    }

    fn handle_tip_announce(&self, address: &str, port: u16, tip: Option<Block>) -> Result<()> {
        let announced_height = tip.as_ref().map(|block| block.get_height()).unwrap_or(0);
        let announced_hash = tip.as_ref().map(|block| block.get_hash()).unwrap_or("");
        let local_height = self.blockchain.height()?;

        if announced_hash == self.blockchain.last_hash() {
            debug!("Tip {announced_hash} from {address}:{port} matches ours");
            return Ok(());
        }
        if announced_height >= local_height {
            info!(
                "Peer {address}:{port} is at height {announced_height} (local {local_height}), requesting its chain"
            );
            let request = Message::new(MessageKind::ChainRequest, &())?;
            self.peers.send(address, port, request)
        } else {
            self.send_all_chain(address, port)
        }
    }

    fn send_all_chain(&self, address: &str, port: u16) -> Result<()> {
        let blocks = self.blockchain.all_blocks()?;
        let message = Message::new(MessageKind::AllChain, &blocks)?;
        self.peers.send(address, port, message)
    }

    // Longest chain by block count wins, provided it is structurally sound
    fn handle_all_chain(&self, blocks: Vec<Block>) -> Result<()> {
        let incoming_tip = match blocks.first() {
            Some(block) => block,
            None => return Ok(()),
        };
        let local_height = self.blockchain.height()?;
        if (blocks.len() as u64) < local_height {
            debug!(
                "Ignoring chain of {} blocks, local height is {local_height}",
                blocks.len()
            );
            return Ok(());
        }
        if incoming_tip.get_hash() == self.blockchain.last_hash() {
            return Ok(());
        }

        Blockchain::validate_chain(&blocks)?;
        self.mining_interrupt.store(true, Ordering::SeqCst);
        self.blockchain.replace_chain(&blocks)?;
        for tx in blocks.iter().flat_map(|block| block.get_transactions()) {
            self.mempool.remove(tx.get_id());
        }
        Ok(())
    }

    fn handle_block(&self, address: &str, port: u16, block: Block) -> Result<()> {
        if !ProofOfWork::validate(&block) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} from peer fails proof-of-work",
                block.get_hash()
            )));
        }
        if block.get_hash() == self.blockchain.last_hash() {
            return Ok(());
        }

        let local_height = self.blockchain.height()?;
        if block.get_prev_hash() == self.blockchain.last_hash()
            && block.get_height() == local_height + 1
        {
            self.mining_interrupt.store(true, Ordering::SeqCst);
            if !self.blockchain.append_from_peer(&block, &self.mempool)? {
                debug!("Block {} lost the race for our tip", block.get_hash());
            }
            return Ok(());
        }

        if block.get_height() > local_height {
            info!(
                "Block {} at height {} does not extend our tip, requesting chain from {address}:{port}",
                block.get_hash(),
                block.get_height()
            );
            let request = Message::new(MessageKind::ChainRequest, &())?;
            return self.peers.send(address, port, request);
        }
        debug!("Ignoring stale block {}", block.get_hash());
        Ok(())
    }

    fn handle_introduction(&self, intro: PeerIntroduction) -> Result<()> {
        if self.peers.contains(&intro.address, intro.port) {
            return Ok(());
        }
        info!(
            "Introduced to {}, dialing",
            peer_key(&intro.address, intro.port)
        );
        self.dial(&intro.address, intro.port, intro.open_port)
    }

    pub fn broadcast_tx(&self, tx: &Transaction) -> Result<usize> {
        let message = Message::new(MessageKind::TxBroadcast, tx)?;
        Ok(self.peers.broadcast(&message))
    }

    pub fn broadcast_block(&self, block: &Block) -> Result<usize> {
        let message = Message::new(MessageKind::BlockBroadcast, block)?;
        Ok(self.peers.broadcast(&message))
    }

    /// Tells every other peer about `address:port`
    pub fn broadcast_new_peer(&self, address: &str, port: u16) -> usize {
        let new_key = peer_key(address, port);
        self.peers.broadcast_with(|peer| {
            if peer.key() == new_key {
                return None;
            }
            let intro = PeerIntroduction {
                address: address.to_string(),
                port,
                open_port: peer.get_port(),
            };
            match Message::new(MessageKind::PeerIntroduce, &intro) {
                Ok(message) => Some(message),
                Err(e) => {
                    error!("Failed to encode introduction of {new_key}: {e}");
                    None
                }
            }
        })
    }
}

fn resolve(address: &str, port: u16) -> Result<SocketAddr> {
    (address, port)
        .to_socket_addrs()
        .map_err(|e| BlockchainError::Network(format!("Invalid address {address}:{port}: {e}")))?
        .next()
        .ok_or_else(|| BlockchainError::Network(format!("{address}:{port} did not resolve")))
}

// Drains the peer's queue in order until a write fails or the peer is removed
fn write_loop(mut stream: TcpStream, outbound: Receiver<Message>, key: &str) {
    for message in outbound {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode message for {key}: {e}");
                continue;
            }
        };
        if let Err(e) = stream.write_all(line.as_bytes()) {
            info!("Write to {key} failed: {e}");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::TestNode;
    use std::time::Instant;

    fn start(node: &TestNode) -> Server {
        Server::start(node.blockchain.clone(), node.mempool.clone(), "127.0.0.1:0").unwrap()
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_handshake_registers_both_sides() {
        let a = TestNode::new();
        let b = TestNode::new();
        let server_a = start(&a);
        let server_b = start(&b);

        server_b.connect_peer("127.0.0.1", server_a.listen_port()).unwrap();

        assert!(server_b
            .get_peers()
            .contains("127.0.0.1", server_a.listen_port()));
        assert!(wait_until(|| server_a
            .get_peers()
            .contains("127.0.0.1", server_b.listen_port())));
    }

    #[test]
    fn test_tx_broadcast_reaches_peer_pool() {
        let a = TestNode::new();
        let b = TestNode::new();
        let server_a = start(&a);
        let server_b = start(&b);
        server_b.connect_peer("127.0.0.1", server_a.listen_port()).unwrap();

        a.mine();
        let tx = a.send_to("recipient", 3);
        assert!(wait_until(|| server_a.get_peers().len() == 1));
        assert_eq!(server_a.broadcast_tx(&tx).unwrap(), 1);

        assert!(wait_until(|| b.mempool.contains(tx.get_id())));
    }

    #[test]
    fn test_all_chain_ignores_shorter_or_invalid_chains() {
        let local = TestNode::new();
        for _ in 0..2 {
            local.mine();
        }
        let server = start(&local);
        let tip = local.blockchain.last_hash();

        let remote = TestNode::new();
        remote.mine();
        let shorter = remote.blockchain.all_blocks().unwrap();
        server.handle_all_chain(shorter).unwrap();
        assert_eq!(local.blockchain.last_hash(), tip);

        // long enough, but the two blocks do not link
        let forged = vec![
            Block::new_test_block(1_000, "", 1, 0),
            Block::new_test_block(2_000, "", 1, 0),
        ];
        assert!(server.handle_all_chain(forged).is_err());
        assert_eq!(local.blockchain.last_hash(), tip);
    }

    #[test]
    fn test_all_chain_replaces_and_prunes_pool() {
        let remote = TestNode::new();
        remote.mine();
        let tx = remote.send_to("recipient", 2);
        remote.mine();

        let local = TestNode::new();
        let server = start(&local);
        local.mempool.submit(tx.clone());

        server
            .handle_all_chain(remote.blockchain.all_blocks().unwrap())
            .unwrap();

        assert_eq!(local.blockchain.last_hash(), remote.blockchain.last_hash());
        assert!(!local.mempool.contains(tx.get_id()));
    }

    #[test]
    fn test_block_from_peer_extends_tip() {
        let miner = TestNode::new();
        let genesis = miner.mine();

        let local = TestNode::new();
        local.blockchain.replace_chain(&[genesis]).unwrap();
        let server = start(&local);

        let block = miner.mine();
        server.handle_block("127.0.0.1", 1, block.clone()).unwrap();

        assert_eq!(local.blockchain.last_hash(), block.get_hash());
        assert!(server.get_mining_interrupt().load(Ordering::SeqCst));
    }

    #[test]
    fn test_block_from_peer_never_displaces_local_block() {
        // a slow genesis difficulty keeps the local miner busy for a while
        let genesis = Block::new_test_block(1_000, "", 1, 4);
        let miner = TestNode::new();
        miner.blockchain.replace_chain(&[genesis.clone()]).unwrap();
        let peer_block = miner.mine();

        let local = TestNode::new();
        local.blockchain.replace_chain(&[genesis]).unwrap();
        let server = start(&local);

        let mining_chain = local.blockchain.clone();
        let utxo_set = local.utxo_set.clone();
        let address = local.address();
        let mining = thread::spawn(move || mining_chain.append_local(&utxo_set, &address));
        thread::sleep(Duration::from_millis(20));
        server
            .handle_block("127.0.0.1", 1, peer_block.clone())
            .unwrap();
        let own_block = mining.join().unwrap().unwrap();

        // whichever came first, the locally mined block stays on the chain
        let blocks = local.blockchain.all_blocks().unwrap();
        assert!(blocks.contains(&own_block));
        assert_eq!(blocks[0], own_block);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].get_prev_hash(), pair[1].get_hash());
        }
    }

    #[test]
    fn test_dropped_peer_is_removed_from_registry() {
        let node = TestNode::new();
        let server = start(&node);

        let mut stream = TcpStream::connect(("127.0.0.1", server.listen_port())).unwrap();
        stream.write_all(b"{\"port\":4100}\n").unwrap();
        assert!(wait_until(|| server.get_peers().contains("127.0.0.1", 4100)));

        drop(stream);
        assert!(wait_until(|| !server.get_peers().contains("127.0.0.1", 4100)));
        assert!(server.get_peers().is_empty());
    }

    #[test]
    fn test_block_without_work_is_rejected() {
        let local = TestNode::new();
        let server = start(&local);
        let lazy = Block::new_test_block(1_000, "", 1, 64);

        assert!(server.handle_block("127.0.0.1", 1, lazy).is_err());
        assert_eq!(local.blockchain.height().unwrap(), 0);
    }
}
