//! Wallet extensions: opaque payloads persisted inside the wallet file by
//! subsystems that live outside the wallet itself.

use crate::network::TransactionBroadcaster;

use bitcoin::Network;
use std::sync::Arc;

/// Information handed to an extension while its payload is restored.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionContext {
	pub network: Network,
	pub earliest_key_time: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExtensionError(pub String);

pub trait WalletExtension: Send + Sync {
	/// Stable identifier used as the key in the wallet file.
	fn id(&self) -> &str;

	/// A mandatory extension that the loader does not recognise fails the load.
	fn is_mandatory(&self) -> bool {
		false
	}

	fn serialize(&self) -> Vec<u8>;

	fn deserialize(&mut self, ctx: &ExtensionContext, data: &[u8]) -> Result<(), ExtensionError>;

	/// Called once the peer network is up. Return true if the extension kept
	/// the broadcaster.
	fn bind_broadcaster(&mut self, _broadcaster: Arc<dyn TransactionBroadcaster>) -> bool {
		false
	}
}

/// Produces a fresh set of extension instances for every load or create.
pub type ExtensionFactory = Arc<dyn Fn() -> Vec<Box<dyn WalletExtension>> + Send + Sync>;

pub fn no_extensions() -> ExtensionFactory {
	Arc::new(|| Vec::new())
}
