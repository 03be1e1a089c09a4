//! Chain bootstrap: open the header store, decide whether it has to be
//! seeded, and hand back a `HeaderChain` bound to it.
//!
//! Seeding only happens for a store that did not exist before this start or
//! when the wallet is being replayed. A restore over an existing chain file
//! throws the old headers away first. The seed time is the restore seed's creation time when
//! restoring and the wallet's earliest key time otherwise; zero disables
//! seeding. Checkpoints come from the configured source, then the configured
//! file, then `<directory>/<network>.checkpoints`.

use crate::chain::checkpoints::{CheckpointSeeder, CheckpointSource};
use crate::chain::store::{BlockStore, BlockStoreProvider, StoreError};
use crate::chain::validator::HeaderChain;
use crate::error::{KitError, KitResult};
use crate::kit::{EventDispatcher, KitConfig, KitEvent};
use crate::wallet::{StartupDecision, WalletSeed};

use bitcoin::Network;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// What the bootstrapper needs to know about the wallet side of startup.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapPlan<'a> {
	pub decision: StartupDecision,
	/// Whether the chain file was on disk before this start touched it.
	pub chain_file_existed: bool,
	pub restore_seed: Option<&'a WalletSeed>,
	/// Earliest key creation time of the materialized wallet, in seconds.
	pub wallet_key_time: u64,
}

impl BootstrapPlan<'_> {
	fn needs_seeding(&self) -> bool {
		!self.chain_file_existed || self.decision.should_replay()
	}
}

/// Opens the block store, seeds it from checkpoints when it is new or being
/// replayed, and wraps it in a header chain.
pub struct ChainBootstrapper {
	network: Network,
	chain_path: PathBuf,
	directory: PathBuf,
	provider: Arc<dyn BlockStoreProvider>,
	checkpoints: Option<CheckpointSource>,
	checkpoint_file: Option<PathBuf>,
}

impl ChainBootstrapper {
	/// Capture the chain settings from `config`. Nothing is opened yet.
	pub fn from_config(config: &KitConfig) -> Self {
		Self {
			network: config.network,
			chain_path: config.chain_file.clone(),
			directory: config.directory.clone(),
			provider: config.block_store.clone(),
			checkpoints: config.checkpoints.clone(),
			checkpoint_file: config.checkpoint_file.clone(),
		}
	}

	/// Open the store, seed it if `plan` calls for it, and wrap it in a
	/// `HeaderChain`. On failure the store is closed before returning.
	pub async fn bootstrap(&self, plan: &BootstrapPlan<'_>, events: &EventDispatcher) -> KitResult<HeaderChain> {
		let mut store = self
			.provider
			.open(self.network, &self.chain_path)
			.await
			.map_err(|e| self.store_failure(e))?;

		if plan.needs_seeding() {
			if let Err(e) = self.prepare(&mut store, plan, events).await {
				if let Err(close_err) = store.close().await {
					warn!("Failed to close block store after bootstrap error: {}", close_err);
				}
				return Err(self.store_failure(e));
			}
		}

		let head = store.chain_head().await.map_err(|e| self.store_failure(e))?;
		info!(
			"Block store {:?} ready at height {}",
			self.chain_path, head.height
		);
		Ok(HeaderChain::new(self.network, store))
	}

	async fn prepare(
		&self,
		store: &mut Box<dyn BlockStore>,
		plan: &BootstrapPlan<'_>,
		events: &EventDispatcher,
	) -> Result<(), StoreError> {
		let Some(checkpoints) = self.resolve_checkpoints().await else {
			if plan.chain_file_existed {
				// Restoring over an old chain without checkpoints: start again from genesis.
				self.recreate(store).await?;
			}
			return Ok(());
		};

		let time = match plan.restore_seed {
			Some(seed) => {
				if plan.chain_file_existed {
					self.recreate(store).await?;
				}
				seed.creation_time()
			}
			None => plan.wallet_key_time,
		};

		if time == 0 {
			warn!(
				"Creating a new uncheckpointed block store due to a wallet with a creation time of zero: this will result in a very slow chain sync"
			);
			return Ok(());
		}

		if let Some(checkpoint) = CheckpointSeeder::seed(&checkpoints, &mut **store, time).await? {
			events
				.dispatch(&KitEvent::ChainSeeded {
					timestamp: time,
					height: checkpoint.height,
				})
				.await;
		}
		Ok(())
	}

	/// Close the store, delete its file and open a fresh one in its place.
	async fn recreate(&self, store: &mut Box<dyn BlockStore>) -> Result<(), StoreError> {
		info!("Deleting block store {:?} for a fresh start", self.chain_path);
		store.close().await?;
		tokio::fs::remove_file(&self.chain_path).await?;
		*store = self.provider.open(self.network, &self.chain_path).await?;
		Ok(())
	}

	async fn resolve_checkpoints(&self) -> Option<CheckpointSource> {
		if let Some(source) = &self.checkpoints {
			return Some(source.clone());
		}
		if let Some(path) = &self.checkpoint_file {
			return match CheckpointSource::open(path).await {
				Ok(source) => Some(source),
				Err(e) => {
					warn!("Ignoring checkpoints at {:?}: {}", path, e);
					None
				}
			};
		}
		CheckpointSource::open_default(self.network, &self.directory).await
	}

	fn store_failure(&self, e: StoreError) -> KitError {
		KitError::ChainStore {
			path: self.chain_path.clone(),
			source: std::io::Error::other(e),
		}
	}
}
