//! Wallet lifecycle: decide whether to create, load or replay the wallet, move
//! an old wallet aside when restoring from a seed, and bring the wallet into
//! memory with its extensions attached.

use crate::error::{KitError, KitResult};
use crate::kit::{EventDispatcher, KitConfig, KitEvent};
use crate::wallet::autosave::AutoSaver;
use crate::wallet::extensions::ExtensionFactory;
use crate::wallet::handle::WalletHandle;
use crate::wallet::store::{WalletStore, WalletStoreError};
use crate::wallet::types::{WalletFactory, WalletSeed};

use bitcoin::Network;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What to do with the wallet file at startup. Computed once per start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupDecision {
    CreateNew,
    LoadExisting,
    /// Load, then reset so the chain download rebuilds wallet state.
    LoadAndReplay,
}

impl StartupDecision {
    pub fn decide(wallet_exists: bool, chain_exists: bool, has_restore: bool) -> Self {
        if (wallet_exists && !chain_exists) || has_restore {
            StartupDecision::LoadAndReplay
        } else if wallet_exists {
            StartupDecision::LoadExisting
        } else {
            StartupDecision::CreateNew
        }
    }

    pub fn should_replay(&self) -> bool {
        matches!(self, StartupDecision::LoadAndReplay)
    }
}

impl fmt::Display for StartupDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartupDecision::CreateNew => "create-new",
            StartupDecision::LoadExisting => "load-existing",
            StartupDecision::LoadAndReplay => "load-and-replay",
        };
        f.write_str(name)
    }
}

pub(crate) async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Rename `path` to `Backup <n> for <name>` in the same directory, picking the
/// smallest `n` that is not taken. Returns `None` when there is nothing to
/// move.
pub async fn move_wallet_out_of_the_way(path: &Path) -> KitResult<Option<PathBuf>> {
    if !file_exists(path).await {
        return Ok(None);
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    let mut counter = 1u32;
    let backup = loop {
        let candidate = parent.join(format!("Backup {counter} for {name}"));
        let taken = tokio::fs::try_exists(&candidate)
            .await
            .map_err(|source| KitError::WalletBackup {
                from: path.to_path_buf(),
                to: candidate.clone(),
                source,
            })?;
        if !taken {
            break candidate;
        }
        counter += 1;
    };

    tokio::fs::rename(path, &backup)
        .await
        .map_err(|source| KitError::WalletBackup {
            from: path.to_path_buf(),
            to: backup.clone(),
            source,
        })?;

    info!("Moved wallet {:?} out of the way to {:?}", path, backup);
    Ok(Some(backup))
}

/// Brings the wallet from disk (or from nothing) into a live `WalletHandle`.
pub struct WalletLifecycleManager {
    network: Network,
    wallet_path: PathBuf,
    restore_seed: Option<WalletSeed>,
    store: Arc<dyn WalletStore>,
    factory: Arc<dyn WalletFactory>,
    extensions: ExtensionFactory,
    auto_save: Option<Duration>,
}

impl WalletLifecycleManager {
    pub fn from_config(config: &KitConfig) -> Self {
        Self {
            network: config.network,
            wallet_path: config.wallet_path(),
            restore_seed: config.restore_seed.clone(),
            store: config.wallet_store.clone(),
            factory: config.wallet_factory.clone(),
            extensions: config.extensions.clone(),
            auto_save: config.auto_save.then_some(config.auto_save_interval),
        }
    }

    pub fn wallet_path(&self) -> &Path {
        &self.wallet_path
    }

    pub async fn materialize(
        &self,
        decision: StartupDecision,
        events: &EventDispatcher,
    ) -> KitResult<WalletHandle> {
        if self.restore_seed.is_some() {
            if let Some(backup) = move_wallet_out_of_the_way(&self.wallet_path).await? {
                events
                    .dispatch(&KitEvent::WalletBackedUp {
                        from: self.wallet_path.clone(),
                        to: backup,
                    })
                    .await;
            }
        }

        let wallet = if file_exists(&self.wallet_path).await {
            let mut wallet = self
                .store
                .load(&self.wallet_path, self.network, (self.extensions)())
                .await
                .map_err(|source| self.io_error(source))?;
            if decision.should_replay() {
                wallet.reset();
                events.dispatch(&KitEvent::WalletReplayed).await;
            }
            wallet
        } else {
            self.create_new().await?
        };

        info!(
            "Wallet ready at {:?} ({}), earliest key time {}",
            self.wallet_path,
            decision,
            wallet.earliest_key_creation_time()
        );
        events
            .dispatch(&KitEvent::WalletMaterialized {
                decision,
                path: self.wallet_path.clone(),
            })
            .await;

        Ok(WalletHandle::new(
            self.wallet_path.clone(),
            wallet,
            self.store.clone(),
        ))
    }

    /// Start periodic flushing if auto-save is enabled.
    pub fn start_auto_save(&self, wallet: &WalletHandle) -> Option<AutoSaver> {
        self.auto_save
            .map(|interval| AutoSaver::spawn(wallet.clone(), interval))
    }

    async fn create_new(&self) -> KitResult<crate::wallet::Wallet> {
        let mut wallet = self.factory.create(self.network, self.restore_seed.as_ref());
        wallet.fresh_receive_key();
        for extension in (self.extensions)() {
            wallet.add_extension(extension);
        }

        self.store
            .save(&wallet, &self.wallet_path)
            .await
            .map_err(|source| self.io_error(source))?;

        // Reload so every extension has been through a save/load cycle.
        self.store
            .load(&self.wallet_path, self.network, (self.extensions)())
            .await
            .map_err(|source| {
                warn!("Freshly created wallet failed to reload: {}", source);
                self.io_error(source)
            })
    }

    fn io_error(&self, source: WalletStoreError) -> KitError {
        KitError::WalletIo {
            path: self.wallet_path.clone(),
            source,
        }
    }
}
