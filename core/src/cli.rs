//! Command line flags

use clap::Parser;
use libp2p::Multiaddr;

use crate::app::NodeSettings;
use crate::network::NetworkConfig;

#[derive(Debug, Parser)]
#[command(name = "disasternet", version, about = "DisasterNet gossip chat node")]
pub struct Cli {
    /// Port for the HTTP server
    #[arg(short, long, default_value_t = 3001)]
    pub port: u16,

    /// Bootstrap peer multiaddress
    #[arg(short, long)]
    pub bootstrap: Option<Multiaddr>,

    /// Listen address for the P2P node; may be repeated
    #[arg(long = "listen", value_name = "MULTIADDR")]
    pub listen: Vec<Multiaddr>,

    /// Disable mDNS discovery on the local network
    #[arg(long)]
    pub no_mdns: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn into_settings(self) -> NodeSettings {
        let mut network = NetworkConfig::default().with_listen_addrs(self.listen);
        network.enable_mdns = !self.no_mdns;

        NodeSettings {
            http_port: self.port,
            bootstrap: self.bootstrap.into_iter().collect(),
            network,
            ..NodeSettings::default()
        }
    }
}
