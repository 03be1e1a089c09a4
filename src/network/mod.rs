//! Peer network seam. The kit drives a `PeerNetwork` through this trait and
//! never touches the wire protocol itself.

pub mod discovery;
pub mod progress_tracker;

pub use discovery::{DnsDiscovery, PeerDiscovery, default_port};
pub use progress_tracker::{DownloadListener, DownloadListeners, DownloadProgressTracker, DownloadStats};

use crate::chain::ChainHandle;
use crate::wallet::SharedWallet;

use bitcoin::Network;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
	#[error("Peer network failed to start: {0}")]
	StartFailed(String),

	#[error("Discovery error: {0}")]
	Discovery(String),

	#[error("Broadcast error: {0}")]
	Broadcast(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Peer network is not running")]
	NotRunning,
}

/// Hands raw transactions to the network. Returns the transaction id.
#[async_trait::async_trait]
pub trait TransactionBroadcaster: Send + Sync {
	async fn broadcast(&self, raw_tx: Vec<u8>) -> Result<String, NetworkError>;
}

/// The P2P client. Configuration calls happen before `start`.
#[async_trait::async_trait]
pub trait PeerNetwork: Send + Sync {
	fn set_user_agent(&self, name: &str, version: &str);

	fn add_address(&self, address: SocketAddr);

	fn set_max_connections(&self, max: usize);

	fn add_discovery(&self, discovery: Arc<dyn PeerDiscovery>);

	fn add_wallet(&self, wallet: SharedWallet);

	async fn start(&self) -> Result<(), NetworkError>;

	/// Begin downloading headers. Progress is reported through `listener`.
	fn start_chain_download(&self, listener: Arc<dyn DownloadListener>);

	async fn stop(&self) -> Result<(), NetworkError>;

	fn broadcaster(&self) -> Arc<dyn TransactionBroadcaster>;
}

pub trait PeerNetworkFactory: Send + Sync {
	fn create(&self, network: Network, chain: ChainHandle) -> Arc<dyn PeerNetwork>;
}
