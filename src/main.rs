// Node binary: parses the command line, loads config, and wires storage,
// wallet, chain, pool, and server together for the chosen command.
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use pow_ledger::{
    Blockchain, Command, Config, KeyWallet, MemoryPool, NodeApi, Opt, Server, SledStorage,
    Storage, UTXOSet, Wallet,
};
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    // Info by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.config.as_deref(), opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn open_chain(
    config: &Config,
) -> Result<(Arc<SledStorage>, Blockchain), Box<dyn std::error::Error>> {
    let storage = Arc::new(SledStorage::open(Path::new(&config.node_db_path()))?);
    let blockchain = Blockchain::open(storage.clone() as Arc<dyn Storage>, config.chain)?;
    Ok((storage, blockchain))
}

fn run_command(
    config_path: Option<&Path>,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(config_path)?;

    match command {
        Command::StartNode {
            port,
            peers,
            mine,
            mine_interval,
        } => {
            if let Some(port) = port {
                config.port = port;
            }
            let wallet: Arc<dyn Wallet> =
                Arc::new(KeyWallet::load_or_create(Path::new(&config.wallet_path))?);
            let (_storage, blockchain) = open_chain(&config)?;
            let mempool = Arc::new(MemoryPool::new());

            let server = Server::start(blockchain, mempool, &format!("0.0.0.0:{}", config.port))?;
            let api = NodeApi::new(server, wallet);
            info!("Node address: {}", api.my_address());

            for peer in &peers {
                if let Err(e) = api.connect_peer(&peer.address, peer.port) {
                    warn!("Could not connect to {peer}: {e}");
                }
            }

            loop {
                if mine {
                    match api.try_mine_block() {
                        Ok(Some(block)) => {
                            let height = block.get_height();
                            match api.get_balance(&api.my_address()) {
                                Ok(balance) => info!("Height {height} reached, balance {balance}"),
                                Err(e) => warn!("Height {height} reached, balance unavailable: {e}"),
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!("Mining failed: {e}"),
                    }
                }
                thread::sleep(Duration::from_secs(mine_interval.max(1)));
            }
        }
        Command::Balance { address } => {
            let address = match address {
                Some(address) => address,
                None => KeyWallet::load_or_create(Path::new(&config.wallet_path))?.address(),
            };
            let (_storage, blockchain) = open_chain(&config)?;
            let utxo_set = UTXOSet::new(blockchain, Arc::new(MemoryPool::new()));
            println!("Balance of {address}: {}", utxo_set.balance(&address)?);
        }
        Command::Printchain => {
            let (_storage, blockchain) = open_chain(&config)?;
            for block in blockchain.all_blocks()? {
                println!("Height: {}", block.get_height());
                println!("Hash: {}", block.get_hash());
                println!("Prev hash: {}", block.get_prev_hash());
                println!("Difficulty: {}", block.get_difficulty());
                println!("Nonce: {}", block.get_nonce());
                println!("Timestamp: {}", block.get_timestamp());
                for tx in block.get_transactions() {
                    println!("- Transaction {}", tx.get_id());
                    for input in tx.get_tx_ins() {
                        println!(
                            "-- Input {}:{} from {}",
                            input.get_tx_id(),
                            input.get_index(),
                            input.get_address()
                        );
                    }
                    for output in tx.get_tx_outs() {
                        println!("-- Output {} to {}", output.get_amount(), output.get_address());
                    }
                }
                println!();
            }
        }
        Command::Address => {
            let wallet = KeyWallet::load_or_create(Path::new(&config.wallet_path))?;
            println!("{}", wallet.address());
        }
    }
    Ok(())
}
