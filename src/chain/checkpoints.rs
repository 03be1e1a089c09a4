//! Checkpoints: known-good headers used to skip most of the header download.
//!
//! The on-disk format is plain text, one `height hash time` record per line.
//! Blank lines and lines starting with `#` are ignored.

use crate::chain::store::{BlockStore, StoreError, StoredHeader};

use bitcoin::{BlockHash, Network};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Seeding backs off this far from the requested time to absorb clock skew
/// and block timestamp variance.
pub const CHECKPOINT_LOOKBACK_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
	pub height: u32,
	pub hash: BlockHash,
	pub time: u32,
}

impl From<Checkpoint> for StoredHeader {
	fn from(cp: Checkpoint) -> Self {
		StoredHeader {
			height: cp.height,
			hash: cp.hash,
			time: cp.time,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Malformed checkpoint on line {line}: {reason}")]
	Malformed { line: usize, reason: String },

	#[error("Checkpoint on line {line} is out of order")]
	OutOfOrder { line: usize },
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointSource {
	checkpoints: Vec<Checkpoint>,
}

impl CheckpointSource {
	/// Build from checkpoints already in memory. Heights must increase and
	/// times must not go backwards.
	pub fn new(checkpoints: Vec<Checkpoint>) -> Result<Self, CheckpointError> {
		for (index, pair) in checkpoints.windows(2).enumerate() {
			if pair[1].height <= pair[0].height || pair[1].time < pair[0].time {
				return Err(CheckpointError::OutOfOrder { line: index + 2 });
			}
		}
		Ok(Self { checkpoints })
	}

	pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, CheckpointError> {
		let mut checkpoints: Vec<Checkpoint> = Vec::new();

		for (index, line) in reader.lines().enumerate() {
			let line_no = index + 1;
			let line = line?;
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let checkpoint = parse_line(line).map_err(|reason| CheckpointError::Malformed {
				line: line_no,
				reason,
			})?;
			if let Some(last) = checkpoints.last() {
				if checkpoint.height <= last.height || checkpoint.time < last.time {
					return Err(CheckpointError::OutOfOrder { line: line_no });
				}
			}
			checkpoints.push(checkpoint);
		}

		Ok(Self { checkpoints })
	}

	pub async fn open(path: &Path) -> Result<Self, CheckpointError> {
		let text = tokio::fs::read_to_string(path).await?;
		let source = Self::from_reader(text.as_bytes())?;
		info!("Read {} checkpoints from {:?}", source.len(), path);
		Ok(source)
	}

	pub fn default_path(network: Network, directory: &Path) -> PathBuf {
		directory.join(format!("{network}.checkpoints"))
	}

	/// Look for `<directory>/<network>.checkpoints`. A missing file means no
	/// checkpoints. An unreadable one is logged and ignored.
	pub async fn open_default(network: Network, directory: &Path) -> Option<Self> {
		let path = Self::default_path(network, directory);
		match tokio::fs::try_exists(&path).await {
			Ok(true) => {}
			Ok(false) => return None,
			Err(e) => {
				warn!("Cannot check for checkpoints at {:?}: {}", path, e);
				return None;
			}
		}
		match Self::open(&path).await {
			Ok(source) => Some(source),
			Err(e) => {
				warn!("Ignoring checkpoints at {:?}: {}", path, e);
				None
			}
		}
	}

	pub fn len(&self) -> usize {
		self.checkpoints.len()
	}

	pub fn is_empty(&self) -> bool {
		self.checkpoints.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
		self.checkpoints.iter()
	}

	/// The latest checkpoint at or before `time`.
	pub fn checkpoint_before(&self, time: u64) -> Option<&Checkpoint> {
		self.checkpoints
			.iter()
			.rev()
			.find(|cp| u64::from(cp.time) <= time)
	}
}

fn parse_line(line: &str) -> Result<Checkpoint, String> {
	let mut fields = line.split_whitespace();
	let (Some(height), Some(hash), Some(time), None) =
		(fields.next(), fields.next(), fields.next(), fields.next())
	else {
		return Err("expected `height hash time`".to_string());
	};

	Ok(Checkpoint {
		height: height.parse().map_err(|e| format!("height: {e}"))?,
		hash: BlockHash::from_str(hash).map_err(|e| format!("hash: {e}"))?,
		time: time.parse().map_err(|e| format!("time: {e}"))?,
	})
}

/// Fast-forwards a fresh block store to a checkpoint.
pub struct CheckpointSeeder;

impl CheckpointSeeder {
	/// Make the latest checkpoint a week or more before `time` the chain
	/// head. Leaves the store alone when no checkpoint is old enough.
	pub async fn seed(
		source: &CheckpointSource,
		store: &mut dyn BlockStore,
		time: u64,
	) -> Result<Option<Checkpoint>, StoreError> {
		let target = time.saturating_sub(CHECKPOINT_LOOKBACK_SECS);
		let Some(checkpoint) = source.checkpoint_before(target).copied() else {
			info!(
				"No checkpoint before {}, block store stays at genesis",
				render_time(target)
			);
			return Ok(None);
		};

		let header = StoredHeader::from(checkpoint);
		store.put(header).await?;
		store.set_chain_head(header).await?;
		info!(
			"Seeded block store with checkpoint at height {} ({})",
			checkpoint.height,
			render_time(u64::from(checkpoint.time))
		);
		Ok(Some(checkpoint))
	}
}

fn render_time(secs: u64) -> String {
	i64::try_from(secs)
		.ok()
		.and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
		.map(|t| t.to_rfc3339())
		.unwrap_or_else(|| secs.to_string())
}
