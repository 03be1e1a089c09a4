//! The wallet kit orchestrator.
//!
//! `WalletKit` owns the startup state machine. `start()` hands the work to a
//! dedicated worker task which materializes the wallet, bootstraps the chain,
//! wires the peer network and then either waits for the header download
//! (blocking startup) or lets a separate task bring the network up.

pub mod config;
pub mod events;
pub mod shutdown;
pub mod state;

pub use config::{KitConfig, SetupContext, SetupHook};
pub use events::{EventDispatcher, KitEvent, KitEventHandler};
pub use shutdown::{Shutdown, ShutdownCoordinator, listen_for_signals};
pub use state::ServiceState;

use crate::chain::{BootstrapPlan, ChainBootstrapper, ChainHandle};
use crate::error::{KitError, KitResult};
use crate::network::{
    DnsDiscovery, DownloadListener, DownloadListeners, DownloadProgressTracker, PeerDiscovery,
    PeerNetwork, PeerNetworkFactory,
};
use crate::wallet::lifecycle::file_exists;
use crate::wallet::{StartupDecision, WalletHandle, WalletLifecycleManager};

use bitcoin::Network;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type SyncOutcome = Option<Result<(), Arc<KitError>>>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn stop_signalled(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Cheap clones of the running components, handed out by the accessors.
#[derive(Clone)]
struct Components {
    wallet: WalletHandle,
    chain: ChainHandle,
    network: Arc<dyn PeerNetwork>,
}

struct KitInner {
    state: watch::Sender<ServiceState>,
    sync_started: watch::Sender<SyncOutcome>,
    stop_requested: watch::Sender<bool>,
    failure: Mutex<Option<Arc<KitError>>>,
    config: Mutex<Option<KitConfig>>,
    network_factory: Arc<dyn PeerNetworkFactory>,
    events: EventDispatcher,
    components: Mutex<Option<Components>>,
    coordinator: Mutex<Option<ShutdownCoordinator>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    signal_tasks: Mutex<Vec<JoinHandle<()>>>,
    stop_lock: tokio::sync::Mutex<()>,
}

/// Bootstraps and runs an SPV wallet: wallet file, header store, header
/// chain and peer network.
#[derive(Clone)]
pub struct WalletKit {
    inner: Arc<KitInner>,
}

impl WalletKit {
    pub fn new(config: KitConfig, network_factory: Arc<dyn PeerNetworkFactory>) -> Self {
        let mut events = EventDispatcher::new();
        for handler in &config.event_handlers {
            events.register_handler(handler.clone());
        }

        Self {
            inner: Arc::new(KitInner {
                state: watch::Sender::new(ServiceState::Idle),
                sync_started: watch::Sender::new(None),
                stop_requested: watch::Sender::new(false),
                failure: Mutex::new(None),
                config: Mutex::new(Some(config)),
                network_factory,
                events,
                components: Mutex::new(None),
                coordinator: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                signal_tasks: Mutex::new(Vec::new()),
                stop_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.inner.state.subscribe()
    }

    /// The error that drove the kit to `Failed`, if any.
    pub fn failure(&self) -> Option<Arc<KitError>> {
        guard(&self.inner.failure).clone()
    }

    /// Begin startup on a worker task and return immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> KitResult<()> {
        // Held until the worker is registered so a racing stop() joins it.
        let mut tasks = guard(&self.inner.tasks);
        if !self.inner.transition(ServiceState::Idle, ServiceState::Starting) {
            return Err(KitError::IllegalState {
                operation: "start",
                state: self.state(),
            });
        }
        // Only a stop that won the Idle transition takes the config.
        let config = guard(&self.inner.config)
            .take()
            .ok_or(KitError::IllegalState {
                operation: "start",
                state: ServiceState::Starting,
            })?;

        info!(
            "Starting wallet kit for {} in {:?}",
            config.network, config.directory
        );

        let inner = self.inner.clone();
        tasks.push(tokio::spawn(async move { inner.run(config).await }));
        Ok(())
    }

    /// Resolve once the kit is `Running`. Errors if it fails or stops first.
    pub async fn await_running(&self) -> KitResult<()> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, ServiceState::Idle | ServiceState::Starting))
            .await
            .map(|s| *s)
            .map_err(|_| KitError::NotRunning(self.state()))?;

        match state {
            ServiceState::Running => Ok(()),
            ServiceState::Failed => Err(self.failure_error()),
            other => Err(KitError::NotRunning(other)),
        }
    }

    /// Resolve once the peer network has started (or failed to).
    pub async fn await_sync_started(&self) -> KitResult<()> {
        let mut rx = self.inner.sync_started.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone())
            .map_err(|_| KitError::NotRunning(self.state()))?;

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(cause)) => Err(KitError::StartupFailed(cause)),
            None => Err(KitError::NotRunning(self.state())),
        }
    }

    pub fn wallet(&self) -> KitResult<WalletHandle> {
        self.running_components().map(|c| c.wallet)
    }

    pub fn chain(&self) -> KitResult<ChainHandle> {
        self.running_components().map(|c| c.chain)
    }

    pub fn peer_network(&self) -> KitResult<Arc<dyn PeerNetwork>> {
        self.running_components().map(|c| c.network)
    }

    /// Stop the kit: stop the network, flush the wallet and close the store.
    ///
    /// Safe to call in any state. While starting, the worker is interrupted
    /// at its next step boundary and whatever it built is torn down.
    pub async fn stop(&self) -> KitResult<()> {
        let _serialized = self.inner.stop_lock.lock().await;

        if self.inner.transition(ServiceState::Idle, ServiceState::Terminated) {
            guard(&self.inner.config).take();
            self.inner.resolve_sync_started(Err(Arc::new(KitError::Interrupted)));
            self.inner
                .events
                .dispatch(&KitEvent::StateChanged {
                    from: ServiceState::Idle,
                    to: ServiceState::Terminated,
                })
                .await;
            return Ok(());
        }

        let state = self.state();
        if state.is_terminal() {
            return Ok(());
        }

        info!("Stopping wallet kit while {}", state);
        self.inner.stop_requested.send_replace(true);
        self.inner.join_tasks().await;

        if self.state() == ServiceState::Failed {
            return Ok(());
        }

        self.inner.set_state(ServiceState::Stopping).await;
        guard(&self.inner.components).take();
        let coordinator = guard(&self.inner.coordinator).take();
        let result = match coordinator {
            Some(coordinator) => coordinator.shutdown(true).await,
            None => Ok(()),
        };
        for task in guard(&self.inner.signal_tasks).drain(..) {
            task.abort();
        }

        self.inner.resolve_sync_started(Err(Arc::new(KitError::Interrupted)));
        self.inner.events.dispatch(&KitEvent::Stopped).await;
        self.inner.set_state(ServiceState::Terminated).await;
        result
    }

    /// Start the kit if needed, run until `shutdown` fires, then stop.
    pub async fn run_until_stopped(&self, shutdown: Shutdown) -> KitResult<()> {
        if self.state() == ServiceState::Idle {
            self.start()?;
        }

        let started = tokio::select! {
            result = self.await_running() => Some(result),
            _ = shutdown.wait() => None,
        };

        match started {
            Some(Err(e)) => {
                self.stop().await?;
                return Err(e);
            }
            Some(Ok(())) => {
                info!("Wallet kit running, waiting for shutdown");
                shutdown.wait().await;
            }
            None => info!("Shutdown requested before startup finished"),
        }
        self.stop().await
    }

    fn running_components(&self) -> KitResult<Components> {
        let state = self.state();
        if state != ServiceState::Running {
            return Err(KitError::NotRunning(state));
        }
        guard(&self.inner.components)
            .clone()
            .ok_or(KitError::NotRunning(state))
    }

    fn failure_error(&self) -> KitError {
        match self.failure() {
            Some(cause) => KitError::StartupFailed(cause),
            None => KitError::NotRunning(ServiceState::Failed),
        }
    }
}

impl KitInner {
    async fn run(self: Arc<Self>, config: KitConfig) {
        self.events
            .dispatch(&KitEvent::StateChanged {
                from: ServiceState::Idle,
                to: ServiceState::Starting,
            })
            .await;

        match self.startup(config).await {
            Ok(()) => {}
            Err(KitError::Interrupted) => info!("Startup interrupted by stop request"),
            Err(e) => self.fail(e).await,
        }
    }

    async fn startup(self: &Arc<Self>, mut config: KitConfig) -> KitResult<()> {
        let coordinator = self.assemble(&mut config).await?;
        let components = Components {
            wallet: coordinator.wallet().clone(),
            chain: coordinator.chain().clone(),
            network: coordinator.network().clone(),
        };
        *guard(&self.coordinator) = Some(coordinator);
        *guard(&self.components) = Some(components.clone());

        let listener = config.download_listener.take();
        if config.blocking_startup {
            self.start_blocking(&components, listener, config.auto_stop).await
        } else {
            self.spawn_network_start(components, listener, config.auto_stop);
            Ok(())
        }
    }

    /// Steps 1 to 6: directory, wallet, chain, network wiring, setup hook.
    /// On error everything built so far is released before returning.
    async fn assemble(&self, config: &mut KitConfig) -> KitResult<ShutdownCoordinator> {
        tokio::fs::create_dir_all(&config.directory)
            .await
            .map_err(|source| KitError::DirectoryCreation {
                path: config.directory.clone(),
                source,
            })?;

        let chain_file_existed = file_exists(&config.chain_file).await;
        let wallet_file_exists = file_exists(&config.wallet_path()).await;
        let decision = StartupDecision::decide(
            wallet_file_exists,
            chain_file_existed,
            config.restore_seed.is_some(),
        );
        info!(
            "Startup decision {} (wallet file: {}, chain file: {}, restore: {})",
            decision,
            wallet_file_exists,
            chain_file_existed,
            config.restore_seed.is_some()
        );

        let lifecycle = WalletLifecycleManager::from_config(config);
        let wallet = lifecycle.materialize(decision, &self.events).await?;
        let auto_saver = lifecycle.start_auto_save(&wallet);

        let plan = BootstrapPlan {
            decision,
            chain_file_existed,
            restore_seed: config.restore_seed.as_ref(),
            wallet_key_time: wallet.earliest_key_creation_time().await,
        };
        let bootstrapped = match self.ensure_not_stopping() {
            Ok(()) => {
                ChainBootstrapper::from_config(config)
                    .bootstrap(&plan, &self.events)
                    .await
            }
            Err(e) => Err(e),
        };
        let chain = match bootstrapped {
            Ok(chain) => chain,
            Err(e) => {
                if let Some(saver) = auto_saver {
                    saver.shutdown().await;
                }
                return Err(e);
            }
        };
        let height = chain.head().await.map(|h| h.height).unwrap_or_default();
        let chain: ChainHandle = Arc::new(tokio::sync::Mutex::new(chain));
        self.events.dispatch(&KitEvent::ChainReady { height }).await;

        let network = self.network_factory.create(config.network, chain.clone());
        let coordinator = ShutdownCoordinator::new(wallet, chain, network, auto_saver);

        match self.wire(config, &coordinator).await {
            Ok(()) => Ok(coordinator),
            Err(e) => {
                let flush = matches!(e, KitError::Interrupted);
                if let Err(release) = coordinator.shutdown(flush).await {
                    warn!("Releasing partially started kit failed: {}", release);
                }
                Err(e)
            }
        }
    }

    async fn wire(&self, config: &mut KitConfig, coordinator: &ShutdownCoordinator) -> KitResult<()> {
        self.ensure_not_stopping()?;
        let wallet = coordinator.wallet();
        let chain = coordinator.chain();
        let network = coordinator.network();

        if let Some((name, version)) = &config.user_agent {
            network.set_user_agent(name, version);
        }

        if !config.peer_addresses.is_empty() {
            for address in &config.peer_addresses {
                network.add_address(*address);
            }
            network.set_max_connections(config.peer_addresses.len());
        } else if config.network != Network::Regtest && !config.use_tor {
            let discovery: Arc<dyn PeerDiscovery> = match &config.discovery {
                Some(discovery) => discovery.clone(),
                None => Arc::new(DnsDiscovery::new(config.network)),
            };
            info!("Using {} peer discovery", discovery.name());
            network.add_discovery(discovery);
        }

        chain.lock().await.add_wallet(wallet.shared());
        network.add_wallet(wallet.shared());
        self.events.dispatch(&KitEvent::WalletAttached).await;

        if let Some(hook) = config.setup_hook.take() {
            let ctx = SetupContext {
                wallet,
                chain,
                network,
            };
            hook(&ctx).map_err(KitError::SetupHook)?;
        }
        self.events.dispatch(&KitEvent::SetupCompleted).await;

        self.ensure_not_stopping()
    }

    async fn start_blocking(
        self: &Arc<Self>,
        components: &Components,
        user_listener: Option<Arc<dyn DownloadListener>>,
        auto_stop: bool,
    ) -> KitResult<()> {
        self.start_network(&components.network).await?;
        self.register_shutdown(auto_stop);
        self.bind_broadcaster(components).await;

        let tracker = Arc::new(DownloadProgressTracker::new());
        let listener: Arc<dyn DownloadListener> = match user_listener {
            // The tracker goes last so the caller's listener has seen the
            // final block before startup completes.
            Some(user) => Arc::new(DownloadListeners(vec![user, tracker.clone()])),
            None => tracker.clone(),
        };
        components.network.start_chain_download(listener);
        self.events.dispatch(&KitEvent::ChainDownloadStarted).await;
        self.resolve_sync_started(Ok(()));

        tokio::select! {
            _ = tracker.await_done() => {}
            _ = stop_signalled(self.stop_requested.subscribe()) => return Err(KitError::Interrupted),
        }

        info!("Chain download complete: {}", tracker.stats().summary());
        self.set_state(ServiceState::Running).await;
        Ok(())
    }

    fn spawn_network_start(
        self: &Arc<Self>,
        components: Components,
        user_listener: Option<Arc<dyn DownloadListener>>,
        auto_stop: bool,
    ) {
        let inner = self.clone();
        let task = tokio::spawn(async move {
            match inner.start_network(&components.network).await {
                Ok(()) => {
                    inner.bind_broadcaster(&components).await;
                    let listener: Arc<dyn DownloadListener> = match user_listener {
                        Some(listener) => listener,
                        None => Arc::new(DownloadProgressTracker::new()),
                    };
                    components.network.start_chain_download(listener);
                    inner.events.dispatch(&KitEvent::ChainDownloadStarted).await;
                    inner.register_shutdown(auto_stop);

                    if inner.ensure_not_stopping().is_ok() {
                        inner.set_state(ServiceState::Running).await;
                        inner.resolve_sync_started(Ok(()));
                    }
                }
                Err(KitError::Interrupted) => info!("Network start interrupted by stop request"),
                Err(e) => inner.fail(e).await,
            }
        });
        guard(&self.tasks).push(task);
    }

    async fn start_network(&self, network: &Arc<dyn PeerNetwork>) -> KitResult<()> {
        tokio::select! {
            result = network.start() => {
                result.map_err(KitError::NetworkStart)?;
                info!("Peer network started");
                self.events.dispatch(&KitEvent::NetworkStarted).await;
                Ok(())
            }
            _ = stop_signalled(self.stop_requested.subscribe()) => Err(KitError::Interrupted),
        }
    }

    async fn bind_broadcaster(&self, components: &Components) {
        let broadcaster = components.network.broadcaster();
        let bound = components.wallet.lock().await.bind_broadcaster(&broadcaster);
        if bound > 0 {
            info!("Bound the transaction broadcaster to {} wallet extensions", bound);
        }
        self.events
            .dispatch(&KitEvent::BroadcasterBound { extensions: bound })
            .await;
    }

    /// With `auto_stop`, SIGINT/SIGTERM stops the kit.
    fn register_shutdown(self: &Arc<Self>, auto_stop: bool) {
        if !auto_stop {
            return;
        }
        let shutdown = Shutdown::new();
        let listener = listen_for_signals(shutdown.clone());
        let weak: Weak<KitInner> = Arc::downgrade(self);
        let watcher = tokio::spawn(async move {
            shutdown.wait().await;
            if let Some(inner) = weak.upgrade() {
                // The watcher is aborted by stop(), so stop runs on its own task.
                tokio::spawn(async move {
                    if let Err(e) = (WalletKit { inner }).stop().await {
                        error!("Signal-triggered stop failed: {}", e);
                    }
                });
            }
        });
        guard(&self.signal_tasks).extend([listener, watcher]);
    }

    /// Move `from -> to` atomically. False if the state was not `from`.
    fn transition(&self, from: ServiceState, to: ServiceState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    fn ensure_not_stopping(&self) -> KitResult<()> {
        if *self.stop_requested.borrow() {
            Err(KitError::Interrupted)
        } else {
            Ok(())
        }
    }

    async fn join_tasks(&self) {
        loop {
            let next = guard(&self.tasks).pop();
            let Some(task) = next else { break };
            if let Err(e) = task.await {
                error!("Wallet kit task ended abnormally: {}", e);
            }
        }
    }

    fn resolve_sync_started(&self, outcome: Result<(), Arc<KitError>>) {
        self.sync_started.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }

    async fn set_state(&self, to: ServiceState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!("Wallet kit {} -> {}", from, to);
            self.events.dispatch(&KitEvent::StateChanged { from, to }).await;
        }
    }

    async fn fail(&self, cause: KitError) {
        error!("Wallet kit failed: {}", cause);
        let cause = Arc::new(cause);
        *guard(&self.failure) = Some(cause.clone());
        self.resolve_sync_started(Err(cause));

        guard(&self.components).take();
        let coordinator = guard(&self.coordinator).take();
        if let Some(coordinator) = coordinator {
            if let Err(e) = coordinator.shutdown(false).await {
                warn!("Releasing failed kit: {}", e);
            }
        }
        self.set_state(ServiceState::Failed).await;
    }
}
