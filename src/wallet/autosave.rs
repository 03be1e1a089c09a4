use crate::wallet::handle::WalletHandle;

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that flushes a dirty wallet on a fixed interval.
pub struct AutoSaver {
	stop: watch::Sender<bool>,
	task: JoinHandle<()>,
}

impl AutoSaver {
	pub fn spawn(wallet: WalletHandle, interval: Duration) -> Self {
		let (stop, mut stop_rx) = watch::channel(false);
		info!(
			"Auto-saving {:?} every {}ms",
			wallet.path(),
			interval.as_millis()
		);

		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// First tick completes immediately.
			ticker.tick().await;

			loop {
				tokio::select! {
					_ = ticker.tick() => {
						match wallet.flush_if_dirty().await {
							Ok(true) => debug!("Auto-saved wallet to {:?}", wallet.path()),
							Ok(false) => {}
							Err(e) => error!("Auto-save of {:?} failed: {}", wallet.path(), e),
						}
					}
					_ = stop_rx.changed() => break,
				}
			}
		});

		Self { stop, task }
	}

	/// Stop the task and wait for an in-flight save to finish.
	pub async fn shutdown(self) {
		let _ = self.stop.send(true);
		if let Err(e) = self.task.await {
			error!("Auto-save task ended abnormally: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wallet::{FileWalletStore, Wallet, WalletSeed};
	use bitcoin::Network;
	use std::sync::Arc;

	#[tokio::test]
	async fn flushes_only_dirty_wallets() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("wallet");
		let wallet = Wallet::new(Network::Regtest, WalletSeed::new(vec![3; 32], 10));
		let handle = WalletHandle::new(path.clone(), wallet, Arc::new(FileWalletStore::new()));

		let saver = AutoSaver::spawn(handle.clone(), Duration::from_millis(25));
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert!(path.exists());
		assert!(!handle.lock().await.is_dirty());

		std::fs::remove_file(&path).unwrap();
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert!(!path.exists(), "clean wallet must not be rewritten");

		handle.lock().await.receive_transaction("beef");
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert!(path.exists());

		saver.shutdown().await;
	}
}
