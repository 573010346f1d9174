//! Node configuration from command-line arguments and environment.

use crate::address::OnionAddress;
use crate::crypto::MIN_PEER_KEY_BITS;
use crate::error::{OnionChatError, Result};
use crate::handshake::IncomingPolicy;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default listen address; hidden services forward to loopback.
const DEFAULT_BIND: &str = "127.0.0.1:1111";

/// Default port peers listen on.
const DEFAULT_PEER_PORT: u16 = 1111;

/// Default data directory under the working directory.
const DEFAULT_DATA_DIR: &str = "onionchat_data";

/// Runtime configuration for the node daemon.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Local listen address for the inbound HTTP boundary.
    pub bind: SocketAddr,
    /// Directory for contacts, pending requests and key material.
    pub data_dir: PathBuf,
    /// This node's own onion address.
    pub my_address: OnionAddress,
    /// SOCKS5 proxy for outbound sends, e.g. `socks5h://127.0.0.1:9050`.
    pub socks_proxy: Option<String>,
    /// Port peers listen on.
    pub peer_port: u16,
    /// Policy for unsolicited introductions.
    pub incoming_policy: IncomingPolicy,
    /// Minimum accepted peer key size in bits.
    pub min_peer_key_bits: usize,
}

/// Usage text printed on `--help` or a parse error.
pub const USAGE: &str = "\
Usage: onionchat-node --address <ONION> [OPTIONS]

Options:
  --address <ONION>      this node's onion address (or ONIONCHAT_ADDRESS env)
  --bind <ADDR>          listen address (default 127.0.0.1:1111)
  --data-dir <PATH>      data directory (default ./onionchat_data)
  --socks <URL>          SOCKS5 proxy for outbound sends, e.g. socks5h://127.0.0.1:9050
  --peer-port <PORT>     port peers listen on (default 1111)
  --policy <POLICY>      incoming request policy: auto | reject | manual (default auto)
  --min-key-bits <BITS>  minimum accepted peer key size (default 3072)
  --help                 print this help
";

impl NodeConfig {
    /// Parses configuration from process arguments and environment.
    pub fn from_env() -> Result<Self> {
        Self::from_args(env::args().skip(1))
    }

    /// Parses configuration from an explicit argument list.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut bind = DEFAULT_BIND.to_string();
        let mut data_dir = DEFAULT_DATA_DIR.to_string();
        let mut address = env::var("ONIONCHAT_ADDRESS").ok();
        let mut socks_proxy = None;
        let mut peer_port = DEFAULT_PEER_PORT;
        let mut incoming_policy = IncomingPolicy::AutoAccept;
        let mut min_peer_key_bits = MIN_PEER_KEY_BITS;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let mut value_for = |flag: &str| {
                args.next()
                    .ok_or_else(|| OnionChatError::config(format!("{} requires a value", flag)))
            };
            match arg.as_str() {
                "--bind" => bind = value_for("--bind")?,
                "--data-dir" => data_dir = value_for("--data-dir")?,
                "--address" => address = Some(value_for("--address")?),
                "--socks" => socks_proxy = Some(value_for("--socks")?),
                "--peer-port" => {
                    peer_port = value_for("--peer-port")?
                        .parse()
                        .map_err(|e| OnionChatError::config(format!("bad --peer-port: {}", e)))?
                }
                "--policy" => {
                    incoming_policy = match value_for("--policy")?.as_str() {
                        "auto" => IncomingPolicy::AutoAccept,
                        "reject" => IncomingPolicy::Reject,
                        "manual" => IncomingPolicy::Manual,
                        other => {
                            return Err(OnionChatError::config(format!(
                                "unknown policy '{}', expected auto, reject or manual",
                                other
                            )))
                        }
                    }
                }
                "--min-key-bits" => {
                    min_peer_key_bits = value_for("--min-key-bits")?
                        .parse()
                        .map_err(|e| OnionChatError::config(format!("bad --min-key-bits: {}", e)))?
                }
                "--help" | "-h" => return Err(OnionChatError::config(USAGE)),
                other => {
                    return Err(OnionChatError::config(format!(
                        "unknown argument '{}'\n\n{}",
                        other, USAGE
                    )))
                }
            }
        }

        let address = address.ok_or_else(|| {
            OnionChatError::config(format!("--address is required\n\n{}", USAGE))
        })?;

        Ok(Self {
            bind: bind
                .parse()
                .map_err(|e| OnionChatError::config(format!("bad --bind address: {}", e)))?,
            data_dir: PathBuf::from(data_dir),
            my_address: OnionAddress::parse(&address)?,
            socks_proxy,
            peer_port,
            incoming_policy,
            min_peer_key_bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(list: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
        list.iter().map(|s| s.to_string())
    }

    #[test]
    fn test_minimal_config() {
        let config =
            NodeConfig::from_args(args(&["--address", "aaaabbbbccccdddd.onion"])).unwrap();
        assert_eq!(config.bind, DEFAULT_BIND.parse().unwrap());
        assert_eq!(config.peer_port, DEFAULT_PEER_PORT);
        assert_eq!(config.incoming_policy, IncomingPolicy::AutoAccept);
        assert_eq!(config.min_peer_key_bits, MIN_PEER_KEY_BITS);
        assert!(config.socks_proxy.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = NodeConfig::from_args(args(&[
            "--address",
            "aaaabbbbccccdddd.onion",
            "--bind",
            "127.0.0.1:2222",
            "--data-dir",
            "/tmp/ocdata",
            "--socks",
            "socks5h://127.0.0.1:9050",
            "--peer-port",
            "2222",
            "--policy",
            "manual",
            "--min-key-bits",
            "4096",
        ]))
        .unwrap();
        assert_eq!(config.bind.port(), 2222);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ocdata"));
        assert_eq!(config.socks_proxy.as_deref(), Some("socks5h://127.0.0.1:9050"));
        assert_eq!(config.incoming_policy, IncomingPolicy::Manual);
        assert_eq!(config.min_peer_key_bits, 4096);
    }

    #[test]
    fn test_missing_address_is_error() {
        // Only when the environment doesn't supply one either.
        if env::var("ONIONCHAT_ADDRESS").is_err() {
            assert!(NodeConfig::from_args(args(&[])).is_err());
        }
    }

    #[test]
    fn test_bad_policy_is_error() {
        let result = NodeConfig::from_args(args(&[
            "--address",
            "aaaabbbbccccdddd.onion",
            "--policy",
            "trusting",
        ]));
        assert!(matches!(result, Err(OnionChatError::Config(_))));
    }

    #[test]
    fn test_unknown_flag_is_error() {
        let result = NodeConfig::from_args(args(&[
            "--address",
            "aaaabbbbccccdddd.onion",
            "--verbose",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_address_is_error() {
        let result = NodeConfig::from_args(args(&["--address", "example.com"]));
        assert!(matches!(result, Err(OnionChatError::InvalidAddress(_))));
    }
}
