//! Orderly teardown of a started kit, plus shutdown signalling: a cloneable
//! trigger for scoped runs and an opt-in SIGINT/SIGTERM listener.

use crate::chain::ChainHandle;
use crate::error::{KitError, KitResult};
use crate::network::PeerNetwork;
use crate::wallet::{AutoSaver, WalletHandle};

use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owns everything startup built and knows the order to take it down in:
/// network, auto-saver, wallet flush, block store.
pub struct ShutdownCoordinator {
    wallet: WalletHandle,
    chain: ChainHandle,
    network: Arc<dyn PeerNetwork>,
    auto_saver: Option<AutoSaver>,
}

impl ShutdownCoordinator {
    pub fn new(
        wallet: WalletHandle,
        chain: ChainHandle,
        network: Arc<dyn PeerNetwork>,
        auto_saver: Option<AutoSaver>,
    ) -> Self {
        Self {
            wallet,
            chain,
            network,
            auto_saver,
        }
    }

    pub fn wallet(&self) -> &WalletHandle {
        &self.wallet
    }

    pub fn chain(&self) -> &ChainHandle {
        &self.chain
    }

    pub fn network(&self) -> &Arc<dyn PeerNetwork> {
        &self.network
    }

    /// Tear everything down. Every step runs even if an earlier one failed;
    /// the first wallet or store error is returned. `flush` controls whether
    /// the wallet is written one last time.
    pub async fn shutdown(self, flush: bool) -> KitResult<()> {
        if let Err(e) = self.network.stop().await {
            warn!("Peer network did not stop cleanly: {}", e);
        }
        if let Some(saver) = self.auto_saver {
            saver.shutdown().await;
        }

        let mut result = Ok(());
        if flush {
            if let Err(source) = self.wallet.flush().await {
                result = Err(KitError::WalletIo {
                    path: self.wallet.path().to_path_buf(),
                    source,
                });
            }
        }

        let mut chain = self.chain.lock().await;
        if let Err(e) = chain.close().await {
            let path = chain.store().path().to_path_buf();
            warn!("Failed to close block store {:?}: {}", path, e);
            if result.is_ok() {
                result = Err(KitError::ChainStore {
                    path,
                    source: std::io::Error::other(e),
                });
            }
        }

        info!("Shut down wallet {:?}", self.wallet.path());
        result
    }
}

/// Cloneable one-shot shutdown trigger for `WalletKit::run_until_stopped`
/// and the `auto_stop` signal listener. Triggering twice is harmless.
#[derive(Clone)]
pub struct Shutdown {
    sender: broadcast::Sender<()>,
    triggered: Arc<RwLock<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(RwLock::new(false)),
        }
    }

    /// Receiver for the trigger. Only sees triggers after this call; use
    /// `wait()` to also catch an earlier one.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub async fn trigger(&self) {
        let mut triggered = self.triggered.write().await;
        if !*triggered {
            *triggered = true;
            let _ = self.sender.send(());
        }
    }

    pub async fn is_triggered(&self) -> bool {
        *self.triggered.read().await
    }

    /// Resolve once `trigger` has been called, including before this call.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_triggered().await {
            return;
        }
        let _ = rx.recv().await;
    }
}

/// Trigger `shutdown` on SIGINT or SIGTERM (Ctrl+C elsewhere).
///
/// The handlers are installed before this returns, so a signal that arrives
/// once it has returned is never missed.
#[cfg(unix)]
pub fn listen_for_signals(shutdown: Shutdown) -> JoinHandle<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = signal(SignalKind::terminate())
        .and_then(|sigterm| Ok((sigterm, signal(SignalKind::interrupt())?)));

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match handlers {
            Ok(handlers) => handlers,
            Err(e) => {
                tracing::error!("Cannot install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        shutdown.trigger().await;
    })
}

/// Trigger `shutdown` on Ctrl+C.
#[cfg(not(unix))]
pub fn listen_for_signals(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C");
        shutdown.trigger().await;
    })
}
