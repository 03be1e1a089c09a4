//! Bootstrap orchestration for an SPV wallet node.
//!
//! A [`WalletKit`] brings a persisted wallet, a block header store, a header
//! chain and a peer-to-peer client from cold storage into a running, wired
//! state. It decides whether to create, load or replay the wallet, seeds a
//! fresh header store from checkpoints, hands the network's broadcaster to
//! wallet extensions once the network is up, and tears everything down in
//! order on stop.
//!
//! The peer network itself is supplied by the caller through
//! [`PeerNetworkFactory`]. Wallet persistence, the header store and peer
//! discovery have file- and DNS-backed defaults behind their traits.

pub mod chain;
pub mod error;
pub mod kit;
pub mod logging;
pub mod network;
pub mod wallet;

pub use chain::{
	BlockStore, BlockStoreProvider, ChainHandle, Checkpoint, CheckpointSeeder, CheckpointSource,
	FileBlockStore, FileBlockStoreProvider, HeaderChain, StoreError, StoredHeader,
};
pub use error::{KitError, KitResult};
pub use kit::{
	EventDispatcher, KitConfig, KitEvent, KitEventHandler, ServiceState, SetupContext, Shutdown,
	WalletKit,
};
pub use network::{
	DnsDiscovery, DownloadListener, DownloadProgressTracker, NetworkError, PeerDiscovery,
	PeerNetwork, PeerNetworkFactory, TransactionBroadcaster,
};
pub use wallet::{
	FileWalletStore, StartupDecision, Wallet, WalletExtension, WalletHandle, WalletSeed, WalletStore,
};
