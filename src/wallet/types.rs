use crate::chain::StoredHeader;
use crate::network::TransactionBroadcaster;
use crate::wallet::extensions::WalletExtension;

use bitcoin::Network;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SEED_ENTROPY_BYTES: usize = 32;

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
	u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Wallet seed entropy plus the time the seed was first created.
///
/// A creation time of zero means "unknown" and disables checkpoint seeding.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSeed {
	entropy: Vec<u8>,
	creation_time: u64,
}

impl WalletSeed {
	pub fn new(entropy: Vec<u8>, creation_time: u64) -> Self {
		Self { entropy, creation_time }
	}

	/// Fresh random seed stamped with the current time.
	pub fn random() -> Self {
		let mut entropy = [0u8; SEED_ENTROPY_BYTES];
		rand::rng().fill(&mut entropy);
		Self::new(entropy.to_vec(), unix_now())
	}

	pub fn from_hex(entropy: &str, creation_time: u64) -> Result<Self, hex::FromHexError> {
		Ok(Self::new(hex::decode(entropy)?, creation_time))
	}

	pub fn entropy(&self) -> &[u8] {
		&self.entropy
	}

	pub fn creation_time(&self) -> u64 {
		self.creation_time
	}

	pub(crate) fn derive_key(&self, index: u32) -> String {
		let mut hasher = Sha256::new();
		hasher.update(&self.entropy);
		hasher.update(index.to_be_bytes());
		hex::encode(hasher.finalize())
	}
}

impl fmt::Debug for WalletSeed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WalletSeed")
			.field("entropy", &"<redacted>")
			.field("creation_time", &self.creation_time)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletKey {
	pub public_key: String,
	pub creation_time: u64,
}

/// Default wallet model: deterministic keys from a seed, the last block the
/// chain told us about, and a registry of persisted extensions.
pub struct Wallet {
	network: Network,
	seed: WalletSeed,
	keys: Vec<WalletKey>,
	last_block_seen: Option<StoredHeader>,
	transactions: BTreeSet<String>,
	extensions: BTreeMap<String, Box<dyn WalletExtension>>,
	dirty: bool,
}

impl Wallet {
	pub fn new(network: Network, seed: WalletSeed) -> Self {
		Self {
			network,
			seed,
			keys: Vec::new(),
			last_block_seen: None,
			transactions: BTreeSet::new(),
			extensions: BTreeMap::new(),
			dirty: true,
		}
	}

	pub(crate) fn from_parts(
		network: Network,
		seed: WalletSeed,
		keys: Vec<WalletKey>,
		last_block_seen: Option<StoredHeader>,
		transactions: BTreeSet<String>,
	) -> Self {
		Self {
			network,
			seed,
			keys,
			last_block_seen,
			transactions,
			extensions: BTreeMap::new(),
			dirty: false,
		}
	}

	pub fn network(&self) -> Network {
		self.network
	}

	pub fn seed(&self) -> &WalletSeed {
		&self.seed
	}

	pub fn keys(&self) -> &[WalletKey] {
		&self.keys
	}

	/// Derive the next receive key. Keys inherit the seed's creation time.
	pub fn fresh_receive_key(&mut self) -> &WalletKey {
		let index = u32::try_from(self.keys.len()).unwrap_or(u32::MAX);
		self.keys.push(WalletKey {
			public_key: self.seed.derive_key(index),
			creation_time: self.seed.creation_time,
		});
		self.dirty = true;
		&self.keys[self.keys.len() - 1]
	}

	/// Earliest creation time across keys, falling back to the seed time.
	pub fn earliest_key_creation_time(&self) -> u64 {
		self.keys
			.iter()
			.map(|key| key.creation_time)
			.min()
			.unwrap_or(self.seed.creation_time)
	}

	pub fn last_block_seen(&self) -> Option<&StoredHeader> {
		self.last_block_seen.as_ref()
	}

	pub fn notify_new_best_block(&mut self, header: StoredHeader) {
		self.last_block_seen = Some(header);
		self.dirty = true;
	}

	/// Record a relevant transaction. Returns false if it was already known.
	pub fn receive_transaction(&mut self, txid: impl Into<String>) -> bool {
		let inserted = self.transactions.insert(txid.into());
		self.dirty |= inserted;
		inserted
	}

	pub fn transactions(&self) -> impl Iterator<Item = &str> {
		self.transactions.iter().map(String::as_str)
	}

	/// Forget chain-derived state so the wallet can be rebuilt by a replay.
	pub fn reset(&mut self) {
		debug!(
			"Resetting wallet: dropping {} transactions and last block {:?}",
			self.transactions.len(),
			self.last_block_seen.map(|h| h.height)
		);
		self.last_block_seen = None;
		self.transactions.clear();
		self.dirty = true;
	}

	/// Attach an extension. An extension with the same id is left in place.
	pub fn add_extension(&mut self, extension: Box<dyn WalletExtension>) -> bool {
		let id = extension.id().to_string();
		if self.extensions.contains_key(&id) {
			warn!("Wallet already has extension {}, ignoring duplicate", id);
			return false;
		}
		self.extensions.insert(id, extension);
		self.dirty = true;
		true
	}

	pub fn extension(&self, id: &str) -> Option<&(dyn WalletExtension + 'static)> {
		self.extensions.get(id).map(|ext| &**ext)
	}

	pub fn extension_mut(&mut self, id: &str) -> Option<&mut (dyn WalletExtension + 'static)> {
		self.extensions.get_mut(id).map(|ext| &mut **ext)
	}

	pub fn extension_ids(&self) -> Vec<String> {
		self.extensions.keys().cloned().collect()
	}

	pub(crate) fn extensions(&self) -> impl Iterator<Item = &(dyn WalletExtension + 'static)> {
		self.extensions.values().map(|ext| &**ext)
	}

	/// Offer the broadcaster to every extension. Returns how many took it.
	pub fn bind_broadcaster(&mut self, broadcaster: &Arc<dyn TransactionBroadcaster>) -> usize {
		let mut bound = 0;
		for ext in self.extensions.values_mut() {
			if ext.bind_broadcaster(broadcaster.clone()) {
				bound += 1;
			}
		}
		bound
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty
	}

	pub(crate) fn mark_clean(&mut self) {
		self.dirty = false;
	}
}

impl fmt::Debug for Wallet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Wallet")
			.field("network", &self.network)
			.field("keys", &self.keys.len())
			.field("last_block_seen", &self.last_block_seen.map(|h| h.height))
			.field("transactions", &self.transactions.len())
			.field("extensions", &self.extension_ids())
			.finish()
	}
}

/// Creates wallets for the `CreateNew` path.
pub trait WalletFactory: Send + Sync {
	fn create(&self, network: Network, restore_seed: Option<&WalletSeed>) -> Wallet;
}

/// Uses the restore seed when one is given, fresh entropy otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWalletFactory;

impl WalletFactory for DefaultWalletFactory {
	fn create(&self, network: Network, restore_seed: Option<&WalletSeed>) -> Wallet {
		let seed = restore_seed.cloned().unwrap_or_else(WalletSeed::random);
		Wallet::new(network, seed)
	}
}
