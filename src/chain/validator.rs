//! The header chain the peer network feeds. It owns the block store for the
//! life of the kit and tells attached wallets about every new best block.

use crate::chain::store::{BlockStore, StoreError, StoredHeader};
use crate::wallet::SharedWallet;

use bitcoin::{BlockHash, Network};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// The chain as shared between the kit, the peer network and setup hooks.
pub type ChainHandle = Arc<Mutex<HeaderChain>>;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("Header {hash} at height {height} does not extend chain head {head_hash} at height {head_height}")]
	Disconnected {
		hash: BlockHash,
		height: u32,
		head_hash: BlockHash,
		head_height: u32,
	},
}

/// Header chain that only checks linkage: every header must sit directly on
/// top of the current head. Attached wallets hear about each new best block.
pub struct HeaderChain {
	network: Network,
	store: Box<dyn BlockStore>,
	wallets: Vec<SharedWallet>,
}

impl HeaderChain {
	pub fn new(network: Network, store: Box<dyn BlockStore>) -> Self {
		Self {
			network,
			store,
			wallets: Vec::new(),
		}
	}

	pub fn network(&self) -> Network {
		self.network
	}

	/// Attach a wallet. It is notified of every header added from now on.
	pub fn add_wallet(&mut self, wallet: SharedWallet) {
		self.wallets.push(wallet);
	}

	pub fn wallet_count(&self) -> usize {
		self.wallets.len()
	}

	pub fn store(&self) -> &dyn BlockStore {
		&*self.store
	}

	pub async fn head(&self) -> Result<StoredHeader, StoreError> {
		self.store.chain_head().await
	}

	/// Extend the chain by one header. `prev_hash` must be the current head
	/// and `header` must sit exactly one above it.
	pub async fn add_header(&mut self, prev_hash: BlockHash, header: StoredHeader) -> Result<(), ChainError> {
		let head = self.store.chain_head().await?;
		if prev_hash != head.hash || header.height != head.height + 1 {
			return Err(ChainError::Disconnected {
				hash: header.hash,
				height: header.height,
				head_hash: head.hash,
				head_height: head.height,
			});
		}

		self.store.put(header).await?;
		self.store.set_chain_head(header).await?;
		for wallet in &self.wallets {
			wallet.lock().await.notify_new_best_block(header);
		}
		debug!("Chain head advanced to {} ({})", header.height, header.hash);
		Ok(())
	}

	pub async fn close(&mut self) -> Result<(), StoreError> {
		self.store.close().await
	}
}
