//! Error taxonomy for the wallet kit.
//!
//! Every collaborator has its own error type (`WalletStoreError`, `StoreError`,
//! `NetworkError`); `KitError` is what the orchestrator reports. Block store
//! failures are flattened into `std::io::Error` on the way up so callers never
//! need to match on the store's internal error type.

use crate::kit::ServiceState;
use crate::network::NetworkError;
use crate::wallet::WalletStoreError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub type KitResult<T> = Result<T, KitError>;

#[derive(Debug, thiserror::Error)]
pub enum KitError {
    #[error("Could not create directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Wallet I/O failure on {}: {source}", path.display())]
    WalletIo {
        path: PathBuf,
        #[source]
        source: WalletStoreError,
    },

    #[error("Failed to rename wallet {} to {} for restore: {source}", from.display(), to.display())]
    WalletBackup {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Chain store failure on {}: {source}", path.display())]
    ChainStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Network failed to start: {0}")]
    NetworkStart(#[source] NetworkError),

    #[error("Setup hook failed: {0}")]
    SetupHook(String),

    #[error("Startup failed: {0}")]
    StartupFailed(#[source] Arc<KitError>),

    #[error("Wallet kit is not running (state: {0})")]
    NotRunning(ServiceState),

    #[error("Cannot {operation} while {state}")]
    IllegalState {
        operation: &'static str,
        state: ServiceState,
    },

    #[error("Startup interrupted by stop request")]
    Interrupted,
}

impl KitError {
    /// Strip `StartupFailed` wrappers and return the error that actually
    /// stopped the kit.
    pub fn root_cause(&self) -> &KitError {
        match self {
            KitError::StartupFailed(cause) => cause.root_cause(),
            other => other,
        }
    }
}
