//! Header storage.
//!
//! `BlockStore` is the seam the header chain writes through, and
//! `BlockStoreProvider` opens one per start. `FileBlockStore` is the default:
//! a single bincode file holding the chain head and a bounded window of
//! recent headers, rewritten by rename on every change.
//!
//! A store path can only be open once per process. The lease is released on
//! `close()` or when the store is dropped, so a failed startup never leaves
//! the path locked for the next attempt.

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::{BlockHash, Network};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Headers kept by a `FileBlockStore` unless configured otherwise.
pub const DEFAULT_STORE_CAPACITY: usize = 5000;

/// A header as the store keeps it: enough to link, locate and date a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
	pub height: u32,
	pub hash: BlockHash,
	pub time: u32,
}

impl StoredHeader {
	/// The genesis header of `network`, where every fresh store starts.
	pub fn genesis(network: Network) -> Self {
		let block = genesis_block(network);
		Self {
			height: 0,
			hash: block.block_hash(),
			time: block.header.time,
		}
	}
}

/// Errors raised by block store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Corrupt block store: {0}")]
	Corrupt(String),

	#[error("Block store {} is already open", .0.display())]
	AlreadyOpen(PathBuf),

	#[error("Block store is closed")]
	Closed,
}

/// Persistent header storage with a movable chain head.
#[async_trait::async_trait]
pub trait BlockStore: Send + Sync {
	/// Where the store lives on disk.
	fn path(&self) -> &Path;

	/// False once `close()` has run. Every other call then fails with
	/// `StoreError::Closed`.
	fn is_open(&self) -> bool;

	async fn chain_head(&self) -> Result<StoredHeader, StoreError>;

	async fn set_chain_head(&mut self, head: StoredHeader) -> Result<(), StoreError>;

	/// Store a header. Storing a known hash again is a no-op.
	async fn put(&mut self, header: StoredHeader) -> Result<(), StoreError>;

	async fn get(&self, hash: &BlockHash) -> Result<Option<StoredHeader>, StoreError>;

	/// Release the store. Closing twice is harmless.
	async fn close(&mut self) -> Result<(), StoreError>;
}

/// Opens block stores for the bootstrapper.
#[async_trait::async_trait]
pub trait BlockStoreProvider: Send + Sync {
	/// Open the store at `path`, creating it at genesis if it does not exist.
	async fn open(&self, network: Network, path: &Path) -> Result<Box<dyn BlockStore>, StoreError>;
}

static OPEN_STORES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive claim on a store path for this process.
#[derive(Debug)]
struct PathLease(PathBuf);

impl PathLease {
	fn acquire(path: &Path) -> Result<Self, StoreError> {
		let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
		let mut open = OPEN_STORES.lock().unwrap_or_else(|e| e.into_inner());
		if !open.insert(key.clone()) {
			return Err(StoreError::AlreadyOpen(path.to_path_buf()));
		}
		Ok(Self(key))
	}
}

impl Drop for PathLease {
	fn drop(&mut self) {
		let mut open = OPEN_STORES.lock().unwrap_or_else(|e| e.into_inner());
		open.remove(&self.0);
	}
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
	network: Network,
	head: StoredHeader,
	headers: VecDeque<StoredHeader>,
}

/// Flat-file header store keeping the chain head and the most recent
/// `capacity` headers. Every mutation rewrites the file.
#[derive(Debug)]
pub struct FileBlockStore {
	path: PathBuf,
	capacity: usize,
	head: StoredHeader,
	headers: VecDeque<StoredHeader>,
	network: Network,
	lease: Option<PathLease>,
}

impl FileBlockStore {
	/// Open the store at `path`, creating it at genesis when the file does
	/// not exist. Fails with `AlreadyOpen` if this process holds the path, and
	/// with `Corrupt` if the file cannot be decoded or is for another network.
	pub async fn open(network: Network, path: &Path, capacity: usize) -> Result<Self, StoreError> {
		let lease = PathLease::acquire(path)?;

		let file = match tokio::fs::read(path).await {
			Ok(bytes) => {
				let file: StoreFile = bincode::deserialize(&bytes)
					.map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))?;
				if file.network != network {
					return Err(StoreError::Corrupt(format!(
						"{} holds {} headers, expected {}",
						path.display(),
						file.network,
						network
					)));
				}
				debug!("Opened block store {:?} at height {}", path, file.head.height);
				file
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				let genesis = StoredHeader::genesis(network);
				info!("Creating block store {:?} at genesis", path);
				StoreFile {
					network,
					head: genesis,
					headers: VecDeque::from([genesis]),
				}
			}
			Err(e) => return Err(e.into()),
		};

		let store = Self {
			path: path.to_path_buf(),
			capacity: capacity.max(1),
			head: file.head,
			headers: file.headers,
			network,
			lease: Some(lease),
		};
		store.persist().await?;
		Ok(store)
	}

	fn ensure_open(&self) -> Result<(), StoreError> {
		if self.lease.is_some() {
			Ok(())
		} else {
			Err(StoreError::Closed)
		}
	}

	async fn persist(&self) -> Result<(), StoreError> {
		let file = StoreFile {
			network: self.network,
			head: self.head,
			headers: self.headers.clone(),
		};
		let bytes = bincode::serialize(&file).map_err(|e| StoreError::Corrupt(e.to_string()))?;

		// Replace the file by rename so a torn write never leaves a half store.
		let temp = Self::temp_path(&self.path);
		tokio::fs::write(&temp, bytes).await?;
		tokio::fs::rename(&temp, &self.path).await?;
		Ok(())
	}

	fn temp_path(path: &Path) -> PathBuf {
		let mut name = path
			.file_name()
			.map(OsString::from)
			.unwrap_or_else(|| OsString::from("headers"));
		name.push(".tmp");
		path.with_file_name(name)
	}
}

#[async_trait::async_trait]
impl BlockStore for FileBlockStore {
	fn path(&self) -> &Path {
		&self.path
	}

	fn is_open(&self) -> bool {
		self.lease.is_some()
	}

	async fn chain_head(&self) -> Result<StoredHeader, StoreError> {
		self.ensure_open()?;
		Ok(self.head)
	}

	async fn set_chain_head(&mut self, head: StoredHeader) -> Result<(), StoreError> {
		self.ensure_open()?;
		self.head = head;
		self.persist().await
	}

	async fn put(&mut self, header: StoredHeader) -> Result<(), StoreError> {
		self.ensure_open()?;
		if self.headers.iter().any(|h| h.hash == header.hash) {
			return Ok(());
		}
		self.headers.push_back(header);
		while self.headers.len() > self.capacity {
			self.headers.pop_front();
		}
		self.persist().await
	}

	async fn get(&self, hash: &BlockHash) -> Result<Option<StoredHeader>, StoreError> {
		self.ensure_open()?;
		Ok(self.headers.iter().rev().find(|h| &h.hash == hash).copied())
	}

	async fn close(&mut self) -> Result<(), StoreError> {
		if self.lease.take().is_some() {
			debug!("Closed block store {:?}", self.path);
		}
		Ok(())
	}
}

/// Opens `FileBlockStore`s.
#[derive(Debug, Clone, Copy)]
pub struct FileBlockStoreProvider {
	capacity: usize,
}

impl FileBlockStoreProvider {
	/// Stores opened by this provider keep at most `capacity` headers.
	pub fn new(capacity: usize) -> Self {
		Self { capacity }
	}
}

impl Default for FileBlockStoreProvider {
	fn default() -> Self {
		Self::new(DEFAULT_STORE_CAPACITY)
	}
}

#[async_trait::async_trait]
impl BlockStoreProvider for FileBlockStoreProvider {
	async fn open(&self, network: Network, path: &Path) -> Result<Box<dyn BlockStore>, StoreError> {
		Ok(Box::new(FileBlockStore::open(network, path, self.capacity).await?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bitcoin::hashes::Hash;

	fn header(height: u32) -> StoredHeader {
		let mut bytes = [0u8; 32];
		bytes[..4].copy_from_slice(&height.to_le_bytes());
		bytes[31] = 0xaa;
		StoredHeader {
			height,
			hash: BlockHash::from_byte_array(bytes),
			time: 1_600_000_000 + height * 600,
		}
	}

	#[tokio::test]
	async fn second_open_of_the_same_path_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("chain");

		let mut first = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap();
		let err = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap_err();
		assert!(matches!(err, StoreError::AlreadyOpen(_)));

		first.close().await.unwrap();
		let mut again = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap();
		again.close().await.unwrap();
	}

	#[tokio::test]
	async fn dropping_a_store_releases_its_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("chain");

		drop(FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap());
		assert!(FileBlockStore::open(Network::Regtest, &path, 10).await.is_ok());
	}

	#[tokio::test]
	async fn new_store_starts_at_genesis_and_head_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("chain");

		let mut store = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap();
		assert_eq!(store.chain_head().await.unwrap(), StoredHeader::genesis(Network::Regtest));

		let tip = header(1);
		store.put(tip).await.unwrap();
		store.set_chain_head(tip).await.unwrap();
		store.close().await.unwrap();
		assert!(matches!(store.chain_head().await, Err(StoreError::Closed)));

		let reopened = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap();
		assert_eq!(reopened.chain_head().await.unwrap(), tip);
		assert_eq!(reopened.get(&tip.hash).await.unwrap(), Some(tip));
	}

	#[tokio::test]
	async fn ring_keeps_only_the_most_recent_headers() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = FileBlockStore::open(Network::Regtest, &dir.path().join("chain"), 3)
			.await
			.unwrap();

		for height in 1..=5 {
			store.put(header(height)).await.unwrap();
		}

		assert_eq!(store.get(&header(2).hash).await.unwrap(), None);
		assert_eq!(store.get(&header(5).hash).await.unwrap(), Some(header(5)));
	}

	#[tokio::test]
	async fn torn_temp_write_leaves_the_store_intact() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("chain");

		let mut store = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap();
		let tip = header(1);
		store.put(tip).await.unwrap();
		store.set_chain_head(tip).await.unwrap();
		assert!(!FileBlockStore::temp_path(&path).exists());
		store.close().await.unwrap();
		assert!(!store.is_open());

		// A crash while writing the next version only leaves a torn sibling file.
		std::fs::write(FileBlockStore::temp_path(&path), b"half a store").unwrap();

		let mut reopened = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap();
		assert!(reopened.is_open());
		assert_eq!(reopened.chain_head().await.unwrap(), tip);
		reopened.put(header(2)).await.unwrap();
		assert!(!FileBlockStore::temp_path(&path).exists());
	}

	#[tokio::test]
	async fn garbage_file_is_reported_as_corrupt() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("chain");
		std::fs::write(&path, b"not a block store").unwrap();

		let err = FileBlockStore::open(Network::Regtest, &path, 10).await.unwrap_err();
		assert!(matches!(err, StoreError::Corrupt(_)));
	}
}
