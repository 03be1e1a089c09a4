//! Lifecycle events for the wallet kit.
//!
//! The orchestrator and its helpers emit `KitEvent`s at each step of startup
//! and shutdown. Registered `KitEventHandler`s observe them without being
//! able to influence the outcome: a handler error is logged and the next
//! handler still runs.

use crate::kit::ServiceState;
use crate::wallet::StartupDecision;

use std::path::PathBuf;
use std::sync::Arc;

/// Events that occur while the kit starts, runs and stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KitEvent {
    /// The state machine moved
    StateChanged { from: ServiceState, to: ServiceState },
    /// An existing wallet was renamed before restoring from a seed
    WalletBackedUp { from: PathBuf, to: PathBuf },
    /// A loaded wallet was reset so the chain download rebuilds it
    WalletReplayed,
    /// The wallet is in memory
    WalletMaterialized {
        decision: StartupDecision,
        path: PathBuf,
    },
    /// The block store was fast-forwarded to a checkpoint
    ChainSeeded { timestamp: u64, height: u32 },
    /// The block store and header chain are ready
    ChainReady { height: u32 },
    /// The wallet is attached to the chain and the network
    WalletAttached,
    /// The setup hook ran
    SetupCompleted,
    /// The peer network is up
    NetworkStarted,
    /// Extensions were offered the broadcaster
    BroadcasterBound { extensions: usize },
    /// The header download began
    ChainDownloadStarted,
    /// Wallet flushed and store closed
    Stopped,
}

/// Observer for kit events.
#[async_trait::async_trait]
pub trait KitEventHandler: Send + Sync {
    async fn handle(&self, event: &KitEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Fans events out to every registered handler in registration order.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn KitEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, handler: Arc<dyn KitEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn dispatch(&self, event: &KitEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process {:?}: {}", handler.name(), event, e);
            }
        }
    }
}
