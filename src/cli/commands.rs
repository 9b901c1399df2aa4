use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

/// A peer given on the command line as `host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerArg {
    pub address: String,
    pub port: u16,
}

impl FromStr for PeerArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid peer: {s}. Expected host:port"))?;
        if address.is_empty() {
            return Err(format!("Invalid peer: {s}. Host is missing"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("Invalid peer port in {s}: {e}"))?;
        Ok(PeerArg {
            address: address.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for PeerArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Parser)]
#[command(name = "pow-ledger")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "Path to a TOML config file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "startnode", about = "Start a ledger node")]
    StartNode {
        #[arg(long = "port", help = "Port to listen on (overrides config)")]
        port: Option<u16>,
        #[arg(long = "peer", help = "Peer to connect to on startup, as host:port")]
        peers: Vec<PeerArg>,
        #[arg(long = "mine", help = "Keep mining blocks paying this node's address")]
        mine: bool,
        #[arg(
            long = "mine-interval",
            default_value_t = 10,
            help = "Seconds to wait between mined blocks"
        )]
        mine_interval: u64,
    },
    #[command(name = "balance", about = "Print the balance of an address")]
    Balance {
        #[arg(help = "The address (defaults to this node's address)")]
        address: Option<String>,
    },
    #[command(name = "printchain", about = "Print all blocks, newest first")]
    Printchain,
    #[command(name = "address", about = "Print this node's address")]
    Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_arg_parsing() {
        let peer: PeerArg = "127.0.0.1:4001".parse().unwrap();
        assert_eq!(peer.address, "127.0.0.1");
        assert_eq!(peer.port, 4001);
        assert_eq!(peer.to_string(), "127.0.0.1:4001");

        assert!("127.0.0.1".parse::<PeerArg>().is_err());
        assert!(":4001".parse::<PeerArg>().is_err());
        assert!("host:99999".parse::<PeerArg>().is_err());
    }

    #[test]
    fn test_startnode_flags() {
        let opt = Opt::parse_from([
            "pow-ledger",
            "startnode",
            "--port",
            "4001",
            "--peer",
            "127.0.0.1:4000",
            "--peer",
            "localhost:4002",
            "--mine",
        ]);
        match opt.command {
            Command::StartNode {
                port,
                peers,
                mine,
                mine_interval,
            } => {
                assert_eq!(port, Some(4001));
                assert_eq!(peers.len(), 2);
                assert!(mine);
                assert_eq!(mine_interval, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
