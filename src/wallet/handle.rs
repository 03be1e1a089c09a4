//! Shared access to the live wallet. Every holder (the kit, the auto-saver,
//! the header chain and the peer network) goes through the same async mutex,
//! so saves never interleave with updates.

use crate::wallet::store::{WalletStore, WalletStoreError};
use crate::wallet::types::Wallet;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// The wallet as handed to the header chain and the peer network.
pub type SharedWallet = Arc<Mutex<Wallet>>;

/// The live wallet plus where and how it is persisted.
#[derive(Clone)]
pub struct WalletHandle {
	path: PathBuf,
	wallet: SharedWallet,
	store: Arc<dyn WalletStore>,
}

impl WalletHandle {
	pub fn new(path: PathBuf, wallet: Wallet, store: Arc<dyn WalletStore>) -> Self {
		Self {
			path,
			wallet: Arc::new(Mutex::new(wallet)),
			store,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn shared(&self) -> SharedWallet {
		self.wallet.clone()
	}

	pub async fn lock(&self) -> MutexGuard<'_, Wallet> {
		self.wallet.lock().await
	}

	pub async fn earliest_key_creation_time(&self) -> u64 {
		self.wallet.lock().await.earliest_key_creation_time()
	}

	/// Write the wallet to disk regardless of the dirty flag.
	pub async fn flush(&self) -> Result<(), WalletStoreError> {
		let mut wallet = self.wallet.lock().await;
		self.store.save(&wallet, &self.path).await?;
		wallet.mark_clean();
		Ok(())
	}

	/// Write the wallet only if something changed. Returns whether it wrote.
	pub async fn flush_if_dirty(&self) -> Result<bool, WalletStoreError> {
		let mut wallet = self.wallet.lock().await;
		if !wallet.is_dirty() {
			return Ok(false);
		}
		self.store.save(&wallet, &self.path).await?;
		wallet.mark_clean();
		Ok(true)
	}
}

impl std::fmt::Debug for WalletHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WalletHandle").field("path", &self.path).finish()
	}
}
