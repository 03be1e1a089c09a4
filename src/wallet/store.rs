//! Wallet persistence.
//!
//! A wallet file is one bincode record: version, network, seed, keys, last
//! block seen, transactions and one opaque payload per extension. Each payload
//! carries its extension id and whether it is mandatory. On load the payloads
//! are handed to pre-registered extensions with the same id; a mandatory
//! payload nobody claims fails the load, an optional one is dropped.

use crate::chain::StoredHeader;
use crate::wallet::extensions::{ExtensionContext, ExtensionError, WalletExtension};
use crate::wallet::types::{Wallet, WalletKey, WalletSeed};

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const WALLET_FILE_VERSION: u32 = 1;

/// Errors that can occur while reading or writing a wallet file
#[derive(Debug, thiserror::Error)]
pub enum WalletStoreError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Encoding error: {0}")]
	Encoding(#[from] bincode::Error),

	#[error("Unsupported wallet file version {0}")]
	UnsupportedVersion(u32),

	#[error("Wallet is for network {found}, expected {expected}")]
	NetworkMismatch { expected: Network, found: Network },

	#[error("Unknown mandatory extension {0}")]
	UnknownMandatoryExtension(String),

	#[error("Extension {id} failed to load: {source}")]
	Extension {
		id: String,
		#[source]
		source: ExtensionError,
	},
}

/// Repository for wallet persistence
#[async_trait::async_trait]
pub trait WalletStore: Send + Sync {
	/// Load the wallet at `path`. Payloads in the file are handed to the
	/// matching pre-registered extension.
	async fn load(
		&self,
		path: &Path,
		network: Network,
		extensions: Vec<Box<dyn WalletExtension>>,
	) -> Result<Wallet, WalletStoreError>;

	async fn save(&self, wallet: &Wallet, path: &Path) -> Result<(), WalletStoreError>;
}

#[derive(Serialize, Deserialize)]
struct WalletRecord {
	version: u32,
	network: Network,
	seed: WalletSeed,
	keys: Vec<WalletKey>,
	last_block_seen: Option<StoredHeader>,
	transactions: Vec<String>,
	extensions: Vec<ExtensionRecord>,
}

#[derive(Serialize, Deserialize)]
struct ExtensionRecord {
	id: String,
	mandatory: bool,
	data: Vec<u8>,
}

/// File-based implementation of WalletStore
///
/// The wallet is bincode-encoded and replaced atomically: the new contents go
/// to a sibling temp file which is then renamed over the old one.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileWalletStore;

impl FileWalletStore {
	pub fn new() -> Self {
		Self
	}

	fn temp_path(path: &Path) -> PathBuf {
		let mut name = path
			.file_name()
			.map(OsString::from)
			.unwrap_or_else(|| OsString::from("wallet"));
		name.push(".tmp");
		path.with_file_name(name)
	}
}

#[async_trait::async_trait]
impl WalletStore for FileWalletStore {
	async fn load(
		&self,
		path: &Path,
		network: Network,
		extensions: Vec<Box<dyn WalletExtension>>,
	) -> Result<Wallet, WalletStoreError> {
		let bytes = tokio::fs::read(path).await?;
		let record: WalletRecord = bincode::deserialize(&bytes)?;

		if record.version != WALLET_FILE_VERSION {
			return Err(WalletStoreError::UnsupportedVersion(record.version));
		}
		if record.network != network {
			return Err(WalletStoreError::NetworkMismatch {
				expected: network,
				found: record.network,
			});
		}

		let mut wallet = Wallet::from_parts(
			record.network,
			record.seed,
			record.keys,
			record.last_block_seen,
			record.transactions.into_iter().collect(),
		);
		let ctx = ExtensionContext {
			network,
			earliest_key_time: wallet.earliest_key_creation_time(),
		};

		let mut known: HashMap<String, Box<dyn WalletExtension>> = extensions
			.into_iter()
			.map(|ext| (ext.id().to_string(), ext))
			.collect();

		for stored in record.extensions {
			match known.remove(&stored.id) {
				Some(mut ext) => {
					ext.deserialize(&ctx, &stored.data)
						.map_err(|source| WalletStoreError::Extension {
							id: stored.id.clone(),
							source,
						})?;
					wallet.add_extension(ext);
				}
				None if stored.mandatory => {
					return Err(WalletStoreError::UnknownMandatoryExtension(stored.id));
				}
				None => {
					warn!("Skipping unknown wallet extension {}", stored.id);
				}
			}
		}
		for id in known.keys() {
			debug!("Extension {} has no payload in {:?}, not attached", id, path);
		}

		wallet.mark_clean();
		info!(
			"Loaded wallet from {:?} with {} keys and {} extensions",
			path,
			wallet.keys().len(),
			wallet.extension_ids().len()
		);
		Ok(wallet)
	}

	async fn save(&self, wallet: &Wallet, path: &Path) -> Result<(), WalletStoreError> {
		let record = WalletRecord {
			version: WALLET_FILE_VERSION,
			network: wallet.network(),
			seed: wallet.seed().clone(),
			keys: wallet.keys().to_vec(),
			last_block_seen: wallet.last_block_seen().copied(),
			transactions: wallet.transactions().map(str::to_string).collect(),
			extensions: wallet
				.extensions()
				.map(|ext| ExtensionRecord {
					id: ext.id().to_string(),
					mandatory: ext.is_mandatory(),
					data: ext.serialize(),
				})
				.collect(),
		};
		let bytes = bincode::serialize(&record)?;

		let temp = Self::temp_path(path);
		tokio::fs::write(&temp, &bytes).await?;
		tokio::fs::rename(&temp, path).await?;

		debug!("Saved wallet to {:?} ({} bytes)", path, bytes.len());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	struct Notes {
		id: &'static str,
		mandatory: bool,
		body: Vec<u8>,
		loads: Arc<AtomicUsize>,
	}

	impl Notes {
		fn boxed(id: &'static str, mandatory: bool, body: &[u8]) -> Box<dyn WalletExtension> {
			Box::new(Self {
				id,
				mandatory,
				body: body.to_vec(),
				loads: Arc::new(AtomicUsize::new(0)),
			})
		}
	}

	impl WalletExtension for Notes {
		fn id(&self) -> &str {
			self.id
		}

		fn is_mandatory(&self) -> bool {
			self.mandatory
		}

		fn serialize(&self) -> Vec<u8> {
			self.body.clone()
		}

		fn deserialize(&mut self, _ctx: &ExtensionContext, data: &[u8]) -> Result<(), ExtensionError> {
			if data.is_empty() {
				return Err(ExtensionError("empty payload".to_string()));
			}
			self.body = data.to_vec();
			self.loads.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn sample_wallet() -> Wallet {
		let mut wallet = Wallet::new(Network::Regtest, WalletSeed::new(vec![9; 32], 1_700_000_000));
		wallet.fresh_receive_key();
		wallet.receive_transaction("f00d");
		wallet
	}

	#[tokio::test]
	async fn save_then_load_restores_wallet_and_extension_payloads() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("wallet");
		let store = FileWalletStore::new();

		let mut wallet = sample_wallet();
		wallet.add_extension(Notes::boxed("notes", false, b"hello"));
		store.save(&wallet, &path).await.unwrap();

		let loads = Arc::new(AtomicUsize::new(0));
		let fresh: Box<dyn WalletExtension> = Box::new(Notes {
			id: "notes",
			mandatory: false,
			body: Vec::new(),
			loads: loads.clone(),
		});
		let loaded = store.load(&path, Network::Regtest, vec![fresh]).await.unwrap();

		assert_eq!(loaded.keys(), wallet.keys());
		assert_eq!(loaded.earliest_key_creation_time(), 1_700_000_000);
		assert_eq!(loaded.transactions().collect::<Vec<_>>(), vec!["f00d"]);
		assert_eq!(loaded.extension("notes").unwrap().serialize(), b"hello");
		assert_eq!(loads.load(Ordering::SeqCst), 1);
		assert!(!loaded.is_dirty());
		assert!(!FileWalletStore::temp_path(&path).exists());
	}

	#[tokio::test]
	async fn unknown_mandatory_extension_fails_the_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("wallet");
		let store = FileWalletStore::new();

		let mut wallet = sample_wallet();
		wallet.add_extension(Notes::boxed("channels", true, b"state"));
		store.save(&wallet, &path).await.unwrap();

		let err = store.load(&path, Network::Regtest, Vec::new()).await.unwrap_err();
		assert!(matches!(err, WalletStoreError::UnknownMandatoryExtension(id) if id == "channels"));
	}

	#[tokio::test]
	async fn unknown_optional_extension_is_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("wallet");
		let store = FileWalletStore::new();

		let mut wallet = sample_wallet();
		wallet.add_extension(Notes::boxed("labels", false, b"x"));
		store.save(&wallet, &path).await.unwrap();

		let loaded = store.load(&path, Network::Regtest, Vec::new()).await.unwrap();
		assert!(loaded.extension_ids().is_empty());
	}

	#[tokio::test]
	async fn wallet_from_another_network_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("wallet");
		let store = FileWalletStore::new();
		store.save(&sample_wallet(), &path).await.unwrap();

		let err = store.load(&path, Network::Testnet, Vec::new()).await.unwrap_err();
		assert!(matches!(
			err,
			WalletStoreError::NetworkMismatch {
				expected: Network::Testnet,
				found: Network::Regtest
			}
		));
	}
}
