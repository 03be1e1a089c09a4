//! Peer discovery. `DnsDiscovery` is the default for public networks and
//! resolves every seed of the network at once.

use crate::network::NetworkError;

use bitcoin::Network;
use futures::future::join_all;
use std::net::SocketAddr;
use tracing::{debug, warn};

/// Source of candidate peer addresses.
#[async_trait::async_trait]
pub trait PeerDiscovery: Send + Sync {
	async fn peers(&self, network: Network) -> Result<Vec<SocketAddr>, NetworkError>;

	fn name(&self) -> &'static str;
}

/// P2P port peers listen on by default for `network`.
pub fn default_port(network: Network) -> u16 {
	match network {
		Network::Bitcoin => 8333,
		Network::Testnet => 18333,
		Network::Testnet4 => 48333,
		Network::Signet => 38333,
		Network::Regtest => 18444,
		_ => 8333,
	}
}

fn dns_seeds(network: Network) -> &'static [&'static str] {
	match network {
		Network::Bitcoin => &[
			"seed.bitcoin.sipa.be",
			"dnsseed.bluematt.me",
			"seed.bitcoinstats.com",
			"seed.bitcoin.jonasschnelli.ch",
			"seed.btc.petertodd.net",
			"seed.bitcoin.sprovoost.nl",
		],
		Network::Testnet => &[
			"testnet-seed.bitcoin.jonasschnelli.ch",
			"seed.tbtc.petertodd.net",
			"seed.testnet.bitcoin.sprovoost.nl",
			"testnet-seed.bluematt.me",
		],
		Network::Testnet4 => &[
			"seed.testnet4.bitcoin.sprovoost.nl",
			"seed.testnet4.wiz.biz",
		],
		Network::Signet => &["seed.signet.bitcoin.sprovoost.nl"],
		_ => &[],
	}
}

/// Resolves the network's DNS seeds concurrently.
#[derive(Debug, Clone)]
pub struct DnsDiscovery {
	seeds: Vec<String>,
	port: u16,
}

impl DnsDiscovery {
	pub fn new(network: Network) -> Self {
		Self {
			seeds: dns_seeds(network).iter().map(|s| s.to_string()).collect(),
			port: default_port(network),
		}
	}

	pub fn with_seeds(seeds: Vec<String>, port: u16) -> Self {
		Self { seeds, port }
	}

	pub fn seeds(&self) -> &[String] {
		&self.seeds
	}
}

#[async_trait::async_trait]
impl PeerDiscovery for DnsDiscovery {
	async fn peers(&self, network: Network) -> Result<Vec<SocketAddr>, NetworkError> {
		if self.seeds.is_empty() {
			return Err(NetworkError::Discovery(format!("no DNS seeds for {network}")));
		}

		let port = self.port;
		let lookups = self.seeds.iter().map(|seed| async move {
			(seed, tokio::net::lookup_host((seed.as_str(), port)).await)
		});

		let mut peers = Vec::new();
		for (seed, result) in join_all(lookups).await {
			match result {
				Ok(addrs) => {
					let before = peers.len();
					peers.extend(addrs);
					debug!("DNS seed {} returned {} addresses", seed, peers.len() - before);
				}
				Err(e) => warn!("DNS seed {} failed: {}", seed, e),
			}
		}

		if peers.is_empty() {
			return Err(NetworkError::Discovery(format!(
				"none of {} DNS seeds answered",
				self.seeds.len()
			)));
		}
		Ok(peers)
	}

	fn name(&self) -> &'static str {
		"dns"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ports_follow_the_network() {
		assert_eq!(default_port(Network::Bitcoin), 8333);
		assert_eq!(default_port(Network::Regtest), 18444);
		assert_eq!(DnsDiscovery::new(Network::Testnet).port, 18333);
	}

	#[test]
	fn testnet4_has_its_own_port_and_seeds() {
		let discovery = DnsDiscovery::new(Network::Testnet4);
		assert_eq!(discovery.port, 48333);
		assert!(!discovery.seeds().is_empty());
		assert!(discovery.seeds().iter().all(|seed| seed.contains("testnet4")));
	}

	#[test]
	fn regtest_has_no_seeds() {
		assert!(DnsDiscovery::new(Network::Regtest).seeds().is_empty());
	}

	#[tokio::test]
	async fn localhost_seed_resolves() {
		let discovery = DnsDiscovery::with_seeds(vec!["localhost".to_string()], 18444);
		let peers = discovery.peers(Network::Regtest).await.unwrap();
		assert!(peers.iter().all(|addr| addr.port() == 18444 && addr.ip().is_loopback()));
	}

	#[tokio::test]
	async fn discovery_without_seeds_fails() {
		let err = DnsDiscovery::new(Network::Regtest).peers(Network::Regtest).await.unwrap_err();
		assert!(matches!(err, NetworkError::Discovery(_)));
	}
}
