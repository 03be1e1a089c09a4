//! Kit configuration.
//!
//! `KitConfig::new` takes the four things every kit needs: the network, the
//! data directory, the wallet file name and the header store path. Everything
//! else has a default and a `with_*` builder method. The collaborators
//! (wallet factory and store, block store provider, discovery, extensions)
//! are trait objects so tests and embedders can swap them out.
//!
//! A config is consumed by `WalletKit::start`; the setup hook and download
//! listener are taken out of it during startup.

use crate::chain::{BlockStoreProvider, ChainHandle, CheckpointSource, FileBlockStoreProvider};
use crate::kit::events::KitEventHandler;
use crate::network::{DownloadListener, PeerDiscovery, PeerNetwork};
use crate::wallet::{
    DEFAULT_AUTO_SAVE_INTERVAL, DefaultWalletFactory, ExtensionFactory, FileWalletStore,
    WalletExtension, WalletFactory, WalletHandle, WalletSeed, WalletStore, no_extensions,
};

use bitcoin::Network;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What the setup hook gets to see: every component, wired but not started.
pub struct SetupContext<'a> {
    pub wallet: &'a WalletHandle,
    pub chain: &'a ChainHandle,
    pub network: &'a Arc<dyn PeerNetwork>,
}

/// Runs once after the wallet is attached and before the network starts.
pub type SetupHook = Box<dyn FnOnce(&SetupContext<'_>) -> Result<(), String> + Send>;

/// Everything a `WalletKit` needs to start.
pub struct KitConfig {
    pub network: Network,
    /// Base directory, created on start if missing.
    pub directory: PathBuf,
    /// Wallet file name inside `directory`.
    pub file_prefix: String,
    /// Header store path. May live outside `directory`.
    pub chain_file: PathBuf,
    /// In-memory checkpoints. Take precedence over any checkpoint file.
    pub checkpoints: Option<CheckpointSource>,
    /// Checkpoint file to read when no in-memory source is set.
    pub checkpoint_file: Option<PathBuf>,
    /// Rebuild the wallet from this seed, moving any existing wallet aside.
    pub restore_seed: Option<WalletSeed>,
    /// Wait for the header download before reporting `Running`.
    pub blocking_startup: bool,
    /// Static peers. When set, discovery is skipped.
    pub peer_addresses: Vec<SocketAddr>,
    /// Discovery for public networks. `DnsDiscovery` when unset.
    pub discovery: Option<Arc<dyn PeerDiscovery>>,
    pub use_tor: bool,
    /// `(name, version)` announced to peers.
    pub user_agent: Option<(String, String)>,
    pub auto_save: bool,
    pub auto_save_interval: Duration,
    /// Stop the kit on SIGINT/SIGTERM.
    pub auto_stop: bool,
    pub extensions: ExtensionFactory,
    pub wallet_factory: Arc<dyn WalletFactory>,
    pub wallet_store: Arc<dyn WalletStore>,
    pub block_store: Arc<dyn BlockStoreProvider>,
    /// Receives header download progress in both startup modes.
    pub download_listener: Option<Arc<dyn DownloadListener>>,
    pub setup_hook: Option<SetupHook>,
    pub event_handlers: Vec<Arc<dyn KitEventHandler>>,
}

impl KitConfig {
    /// Defaults: blocking startup, auto-save every 5 seconds, no signal
    /// handling, file-backed wallet and header stores.
    pub fn new(
        network: Network,
        directory: impl Into<PathBuf>,
        file_prefix: impl Into<String>,
        chain_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            network,
            directory: directory.into(),
            file_prefix: file_prefix.into(),
            chain_file: chain_file.into(),
            checkpoints: None,
            checkpoint_file: None,
            restore_seed: None,
            blocking_startup: true,
            peer_addresses: Vec::new(),
            discovery: None,
            use_tor: false,
            user_agent: None,
            auto_save: true,
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
            auto_stop: false,
            extensions: no_extensions(),
            wallet_factory: Arc::new(DefaultWalletFactory),
            wallet_store: Arc::new(FileWalletStore::new()),
            block_store: Arc::new(FileBlockStoreProvider::default()),
            download_listener: None,
            setup_hook: None,
            event_handlers: Vec::new(),
        }
    }

    /// `<directory>/<file_prefix>`
    pub fn wallet_path(&self) -> PathBuf {
        self.directory.join(&self.file_prefix)
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointSource) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Read checkpoints from `path`. A missing or corrupt file degrades to
    /// unseeded sync.
    pub fn with_checkpoint_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_file = Some(path.into());
        self
    }

    pub fn with_restore_seed(mut self, seed: WalletSeed) -> Self {
        self.restore_seed = Some(seed);
        self
    }

    pub fn with_blocking_startup(mut self, blocking: bool) -> Self {
        self.blocking_startup = blocking;
        self
    }

    /// Connect only to `addresses`, capping connections at their count.
    pub fn with_peer_addresses(mut self, addresses: Vec<SocketAddr>) -> Self {
        self.peer_addresses = addresses;
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn PeerDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// With Tor, DNS discovery is never added.
    pub fn with_tor(mut self, use_tor: bool) -> Self {
        self.use_tor = use_tor;
        self
    }

    pub fn with_user_agent(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.user_agent = Some((name.into(), version.into()));
        self
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }

    pub fn with_auto_stop(mut self, enabled: bool) -> Self {
        self.auto_stop = enabled;
        self
    }

    /// `factory` builds a fresh set of extensions for each wallet load.
    pub fn with_extensions<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Vec<Box<dyn WalletExtension>> + Send + Sync + 'static,
    {
        self.extensions = Arc::new(factory);
        self
    }

    pub fn with_wallet_factory(mut self, factory: Arc<dyn WalletFactory>) -> Self {
        self.wallet_factory = factory;
        self
    }

    pub fn with_wallet_store(mut self, store: Arc<dyn WalletStore>) -> Self {
        self.wallet_store = store;
        self
    }

    pub fn with_block_store(mut self, provider: Arc<dyn BlockStoreProvider>) -> Self {
        self.block_store = provider;
        self
    }

    pub fn with_download_listener(mut self, listener: Arc<dyn DownloadListener>) -> Self {
        self.download_listener = Some(listener);
        self
    }

    /// Run `hook` once the wallet is attached, before the network starts.
    /// An `Err` fails startup with `KitError::SetupHook`.
    pub fn with_setup_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&SetupContext<'_>) -> Result<(), String> + Send + 'static,
    {
        self.setup_hook = Some(Box::new(hook));
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn KitEventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }
}

impl fmt::Debug for KitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KitConfig")
            .field("network", &self.network)
            .field("directory", &self.directory)
            .field("file_prefix", &self.file_prefix)
            .field("chain_file", &self.chain_file)
            .field("checkpoints", &self.checkpoints.as_ref().map(CheckpointSource::len))
            .field("checkpoint_file", &self.checkpoint_file)
            .field("restore_seed", &self.restore_seed)
            .field("blocking_startup", &self.blocking_startup)
            .field("peer_addresses", &self.peer_addresses)
            .field("use_tor", &self.use_tor)
            .field("user_agent", &self.user_agent)
            .field("auto_save", &self.auto_save)
            .field("auto_save_interval", &self.auto_save_interval)
            .field("auto_stop", &self.auto_stop)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_block_and_auto_save() {
        let config = KitConfig::new(Network::Regtest, "/tmp/kit", "kit.wallet", "/tmp/kit/kit.spvchain");
        assert!(config.blocking_startup);
        assert!(config.auto_save);
        assert!(!config.auto_stop);
        assert_eq!(config.auto_save_interval, Duration::from_secs(5));
        assert_eq!(config.wallet_path(), PathBuf::from("/tmp/kit/kit.wallet"));
    }

    #[test]
    fn builder_overrides() {
        let config = KitConfig::new(Network::Testnet, "/data", "w", "/data/c")
            .with_blocking_startup(false)
            .with_tor(true)
            .with_user_agent("kit", "0.1.0")
            .with_peer_addresses(vec!["127.0.0.1:18333".parse().unwrap()]);
        assert!(!config.blocking_startup);
        assert!(config.use_tor);
        assert_eq!(config.user_agent, Some(("kit".to_string(), "0.1.0".to_string())));
        assert_eq!(config.peer_addresses.len(), 1);
    }
}
